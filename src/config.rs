use std::{collections::BTreeMap, net::SocketAddr};

use crate::{
    error::{Error, Result},
    ledger::Ledger,
    query::DEFAULT_HARD_LIMIT,
};

pub const DEFAULT_COMMIT_AFTER: usize = 10_000;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5555";

/// Keys accepted by `config set`, with their defaults.
pub const SETTINGS: &[(&str, &str)] = &[
    ("result_limit", "50"),
    ("commit_after", "10000"),
    ("bind_addr", DEFAULT_BIND_ADDR),
];

/// Runtime settings resolved from the ledger over built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Hard cap on relays returned by one request.
    pub result_limit: u64,
    /// Descriptor rows per import transaction.
    pub commit_after: usize,
    pub bind_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            result_limit: DEFAULT_HARD_LIMIT,
            commit_after: DEFAULT_COMMIT_AFTER,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5555)),
        }
    }
}

impl Config {
    pub fn load(ledger: &Ledger) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in ledger.settings()? {
            config.apply(&key, &value)?;
        }
        Ok(config)
    }

    /// Validate and apply one setting.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = || {
            Error::Config(format!("invalid value {value:?} for {key}"))
        };
        match key {
            "result_limit" => {
                self.result_limit = value.parse().map_err(|_| invalid())?;
            }
            "commit_after" => {
                self.commit_after = value
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(invalid)?;
            }
            "bind_addr" => {
                self.bind_addr = value.parse().map_err(|_| invalid())?;
            }
            other => {
                return Err(Error::Config(format!("unknown setting {other:?}")));
            }
        }
        Ok(())
    }

    /// Every setting as text, for display.
    pub fn entries(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("result_limit", self.result_limit.to_string()),
            ("commit_after", self.commit_after.to_string()),
            ("bind_addr", self.bind_addr.to_string()),
        ])
    }
}
