use std::{collections::HashMap, net::SocketAddr, path::PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "relayscope",
    about = "Archive and query relay consensus history"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import archived documents
    Import {
        #[command(subcommand)]
        kind: ImportKind,
    },
    /// Maintain the fingerprint index
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// List matching relays in the summary shape
    Summary(FilterArgs),
    /// List matching relays in the detail shape
    Details(FilterArgs),
    /// Show the status history of one relay
    Statuses(StatusesArgs),
    /// Show how the store would run a relay query
    Explain(FilterArgs),
    /// Database housekeeping
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },
    /// Show store statistics
    Status(StatusArgs),
    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Import --

#[derive(Debug, Subcommand)]
pub enum ImportKind {
    /// Import network status consensuses
    Consensuses {
        /// Source directories, one worker each
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Import server descriptors
    Descriptors {
        /// Source directories, one worker each
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Forget which files were imported, so the next import reads them all
    Reset,
}

// -- Index --

#[derive(Debug, Subcommand)]
pub enum IndexAction {
    /// Recreate the fingerprint index from stored status entries
    Rebuild,
    /// Lower first-seen times to the earliest stored status entry
    Backfill,
}

// -- Queries --

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Fingerprint, fingerprint prefix, address prefix or nickname fragment
    #[arg(short, long)]
    pub search: Option<String>,

    /// Exact fingerprint, optionally `$`-prefixed
    #[arg(long)]
    pub lookup: Option<String>,

    /// Only relays that are (true) or are not (false) in the latest snapshot
    #[arg(long)]
    pub running: Option<bool>,

    /// Lower bound on last seen (YYYY-MM-DD[ HH:MM:SS])
    #[arg(long)]
    pub from: Option<String>,

    /// Exclusive upper bound on last seen (YYYY-MM-DD[ HH:MM:SS])
    #[arg(long)]
    pub to: Option<String>,

    /// Number of results to skip
    #[arg(long)]
    pub offset: Option<String>,

    /// Maximum number of results (clamped to `result_limit`)
    #[arg(short = 'n', long)]
    pub limit: Option<String>,
}

impl FilterArgs {
    /// The filters as the query-string parameters the HTTP API accepts.
    pub fn to_params(&self) -> HashMap<String, String> {
        let running = self.running.map(|r| r.to_string());
        [
            ("search", self.search.as_ref()),
            ("lookup", self.lookup.as_ref()),
            ("running", running.as_ref()),
            ("from", self.from.as_ref()),
            ("to", self.to.as_ref()),
            ("offset", self.offset.as_ref()),
            ("limit", self.limit.as_ref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| Some((key.to_string(), value?.clone())))
        .collect()
    }
}

#[derive(Debug, Parser)]
pub struct StatusesArgs {
    /// Relay fingerprint, 40 hex characters
    pub fingerprint: String,

    /// Merge consecutive statuses into ranges
    #[arg(long)]
    pub condensed: bool,

    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Debug, Clone, Default, Args)]
pub struct WindowArgs {
    #[arg(long)]
    pub from: Option<String>,

    #[arg(long)]
    pub to: Option<String>,

    #[arg(long)]
    pub offset: Option<String>,

    #[arg(short = 'n', long)]
    pub limit: Option<String>,
}

impl StatusesArgs {
    pub fn to_params(&self) -> HashMap<String, String> {
        let filters = FilterArgs {
            lookup: Some(self.fingerprint.clone()),
            from: self.window.from.clone(),
            to: self.window.to.clone(),
            offset: self.window.offset.clone(),
            limit: self.window.limit.clone(),
            ..FilterArgs::default()
        };
        filters.to_params()
    }
}

// -- Maintenance --

#[derive(Debug, Subcommand)]
pub enum MaintenanceAction {
    /// Reclaim space and refresh planner statistics
    Vacuum,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the resolved settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting
    Set { key: String, value: String },
    /// Remove a stored setting (revert to default)
    Clear { key: String },
}

// -- Serve --

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to listen on (overrides the `bind_addr` setting)
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "relayscope",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_import_sources() {
        let cli =
            Cli::parse_from(["relayscope", "import", "consensuses", "a", "b"]);
        match cli.command {
            Command::Import {
                kind: ImportKind::Consensuses { sources },
            } => {
                assert_eq!(sources, [PathBuf::from("a"), PathBuf::from("b")]);
            }
            _ => panic!("expected import consensuses"),
        }
    }

    #[test]
    fn filter_args_become_query_params() {
        let cli = Cli::parse_from([
            "relayscope",
            "summary",
            "--search",
            "moria",
            "--running",
            "false",
            "-n",
            "5",
        ]);
        let Command::Summary(args) = cli.command else {
            panic!("expected summary command");
        };
        let params = args.to_params();
        assert_eq!(params.len(), 3);
        assert_eq!(params["search"], "moria");
        assert_eq!(params["running"], "false");
        assert_eq!(params["limit"], "5");
    }

    #[test]
    fn statuses_args_carry_lookup() {
        let cli = Cli::parse_from([
            "relayscope",
            "statuses",
            "9695DFC35FFEB861329B9F1AB04C46397020CE31",
            "--condensed",
        ]);
        let Command::Statuses(args) = cli.command else {
            panic!("expected statuses command");
        };
        assert!(args.condensed);
        assert_eq!(
            args.to_params()["lookup"],
            "9695DFC35FFEB861329B9F1AB04C46397020CE31"
        );
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(
            Cli::try_parse_from(["relayscope", "-q", "-v", "status"]).is_err()
        );
    }
}
