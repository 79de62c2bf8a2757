//! C1: named tunables with typed reads. No file or environment loading
//! lives here — that collaborator stays outside the engine's scope. Values
//! are only ever changed through the `config.set` verb.

use std::collections::BTreeMap;

/// A config value is always an integer; `heartbeat` may be negative
/// (tests use this to force instant staleness).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    overrides: BTreeMap<String, i64>,
}

macro_rules! tunable {
    ($get:ident, $key:literal, $default:expr) => {
        pub fn $get(&self) -> i64 {
            self.overrides.get($key).copied().unwrap_or($default)
        }
    };
}

impl Config {
    tunable!(heartbeat, "heartbeat", 60);
    tunable!(grace_period, "grace-period", 10);
    tunable!(max_job_history, "max-job-history", 100);
    tunable!(jobs_history_count, "jobs-history-count", 50_000);
    tunable!(jobs_history, "jobs-history", 604_800);

    pub fn set(&mut self, key: &str, value: i64) {
        self.overrides.insert(key.to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        match key {
            "heartbeat" => Some(self.heartbeat()),
            "grace-period" => Some(self.grace_period()),
            "max-job-history" => Some(self.max_job_history()),
            "jobs-history-count" => Some(self.jobs_history_count()),
            "jobs-history" => Some(self.jobs_history()),
            _ => self.overrides.get(key).copied(),
        }
    }

    /// Returns the full effective config, defaults merged with overrides —
    /// useful for diagnostics.
    pub fn get_all(&self) -> BTreeMap<String, i64> {
        let mut all = BTreeMap::from([
            ("heartbeat".to_owned(), self.heartbeat()),
            ("grace-period".to_owned(), self.grace_period()),
            ("max-job-history".to_owned(), self.max_job_history()),
            ("jobs-history-count".to_owned(), self.jobs_history_count()),
            ("jobs-history".to_owned(), self.jobs_history()),
        ]);
        all.extend(self.overrides.clone());
        all
    }
}
