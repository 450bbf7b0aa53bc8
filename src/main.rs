use clap::Parser;
use relayscope::{
    Config,
    DataDir,
    Error,
    Ledger,
    Result,
    SearchFilters,
    Store,
    batch::{self, BatchReport},
    config,
    explain,
    fingerprint_index,
    maintenance,
    server::{self, AppState},
    service,
    timestamp,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

pub mod cli;

use cli::{
    Cli,
    Command,
    ConfigAction,
    ImportKind,
    IndexAction,
    MaintenanceAction,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("RELAYSCOPE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let ledger = Ledger::open(&data_dir.ledger_db())?;
    let config = Config::load(&ledger)?;

    match cli.command {
        Command::Import { kind } => {
            let report = match kind {
                ImportKind::Consensuses { sources } => {
                    batch::import_consensus_sources(
                        &data_dir.store_db(),
                        &ledger,
                        &sources,
                    )?
                }
                ImportKind::Descriptors { sources } => {
                    batch::import_descriptor_sources(
                        &data_dir.store_db(),
                        &ledger,
                        &sources,
                        config.commit_after,
                    )?
                }
                ImportKind::Reset => {
                    let forgotten = ledger.clear_processed()?;
                    eprintln!("Forgot {forgotten} imported files");
                    return Ok(());
                }
            };
            print_report(&report);
        }
        Command::Index { action } => {
            let mut store = Store::open(&data_dir.store_db())?;
            match action {
                IndexAction::Rebuild => {
                    let relays = fingerprint_index::rebuild(store.conn_mut())?;
                    eprintln!("Rebuilt index: {relays} relays");
                }
                IndexAction::Backfill => {
                    let lowered =
                        fingerprint_index::reconcile_first_seen(store.conn())?;
                    eprintln!("Lowered first seen for {lowered} relays");
                }
            }
        }
        Command::Summary(args) => {
            let store = Store::open(&data_dir.store_db())?;
            let filters = SearchFilters::from_params(&args.to_params())?;
            print_json(&service::summary(
                store.conn(),
                &filters,
                config.result_limit,
            )?)?;
        }
        Command::Details(args) => {
            let store = Store::open(&data_dir.store_db())?;
            let filters = SearchFilters::from_params(&args.to_params())?;
            print_json(&service::details(
                store.conn(),
                &filters,
                config.result_limit,
            )?)?;
        }
        Command::Statuses(args) => {
            let store = Store::open(&data_dir.store_db())?;
            let filters = SearchFilters::from_params(&args.to_params())?;
            print_json(&service::statuses(
                store.conn(),
                &filters,
                config.result_limit,
                args.condensed,
            )?)?;
        }
        Command::Explain(args) => {
            cmd_explain(&data_dir, &config, &args)?;
        }
        Command::Maintenance {
            action: MaintenanceAction::Vacuum,
        } => {
            let store = Store::open(&data_dir.store_db())?;
            if !maintenance::vacuum_analyze(store.conn()) {
                eprintln!("Maintenance failed; see log for details.");
            }
        }
        Command::Status(args) => {
            cmd_status(&data_dir, &ledger, args.json)?;
        }
        Command::Config { action } => {
            cmd_config(&ledger, config, action)?;
        }
        Command::Serve(args) => {
            let store = Store::open(&data_dir.store_db())?;
            let addr = args.bind.unwrap_or(config.bind_addr);
            let state = AppState::new(store, config.result_limit);
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(server::serve(state, addr))?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &BatchReport) {
    for source in &report.sources {
        match &source.error {
            Some(err) => {
                eprintln!("{}: failed: {err}", source.source.display());
            }
            None => eprintln!(
                "{}: {} files, {} unchanged, {} imported, {} duplicates",
                source.source.display(),
                source.files_seen,
                source.files_unchanged,
                source.imported,
                source.duplicates,
            ),
        }
    }
    for failure in report.failures() {
        eprintln!("  {}: {}", failure.path.display(), failure.error);
    }
    eprintln!(
        "Imported {} documents ({} duplicates, {} files unchanged).",
        report.imported(),
        report.duplicates(),
        report.files_unchanged(),
    );
}

fn cmd_explain(
    data_dir: &DataDir,
    config: &Config,
    args: &cli::FilterArgs,
) -> Result<()> {
    let store = Store::open(&data_dir.store_db())?;
    let filters = SearchFilters::from_params(&args.to_params())?;
    let latest = service::latest_valid_after(store.conn())?;
    let plan = relayscope::query::compile(&filters, latest, config.result_limit);
    let report = explain::explain(store.conn(), &plan)?;

    println!("{}", report.statement);
    println!();
    for step in &report.steps {
        println!("{step}");
    }
    if !report.full_scans.is_empty() {
        eprintln!("Full table scans: {}", report.full_scans.len());
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    data_dir: String,
    #[serde(serialize_with = "timestamp::serialize_opt")]
    latest_snapshot: Option<chrono::DateTime<chrono::Utc>>,
    snapshots: u64,
    status_entries: u64,
    relays: u64,
    descriptors: u64,
    processed_files: usize,
}

fn cmd_status(data_dir: &DataDir, ledger: &Ledger, json: bool) -> Result<()> {
    let store = Store::open(&data_dir.store_db())?;
    let stats = store.stats()?;
    let report = StatusReport {
        data_dir: data_dir.root().display().to_string(),
        latest_snapshot: store.latest_snapshot()?.map(|s| s.valid_after),
        snapshots: stats.snapshots,
        status_entries: stats.status_entries,
        relays: stats.relays,
        descriptors: stats.descriptors,
        processed_files: ledger.processed_count()?,
    };

    if json {
        return print_json(&report);
    }
    println!("Data directory: {}", report.data_dir);
    match report.latest_snapshot {
        Some(ts) => println!("Latest snapshot: {}", timestamp::format(&ts)),
        None => println!("Latest snapshot: none"),
    }
    println!("Snapshots: {}", report.snapshots);
    println!("Status entries: {}", report.status_entries);
    println!("Relays: {}", report.relays);
    println!("Descriptors: {}", report.descriptors);
    println!("Processed files: {}", report.processed_files);
    Ok(())
}

fn cmd_config(
    ledger: &Ledger,
    mut config: Config,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let entries = config.entries();
            if json {
                return print_json(&entries);
            }
            for (key, value) in &entries {
                println!("{key}\t{value}");
            }
        }
        ConfigAction::Set { key, value } => {
            config.apply(&key, &value)?;
            ledger.set_setting(&key, &value)?;
            println!("Set {key} = {value}");
        }
        ConfigAction::Clear { key } => {
            if !config::SETTINGS.iter().any(|(k, _)| *k == key) {
                return Err(Error::Config(format!("unknown setting {key:?}")));
            }
            match ledger.get_setting(&key)? {
                Some(old) => {
                    ledger.remove_setting(&key)?;
                    println!("Cleared {key} (was {old})");
                }
                None => println!("{key} was not set"),
            }
        }
    }
    Ok(())
}
