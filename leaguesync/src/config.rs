//! Pipeline configuration.
//!
//! Configuration comes from code (builder methods) or from
//! `LEAGUESYNC_*` environment variables via [`PipelineConfig::from_env`].
//! Unparseable environment values are logged and ignored rather than
//! failing startup.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Weekday;

use crate::pipeline::RetryConfig;

/// Tunable settings for a pipeline controller.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory for all managed state.
    pub data_root: PathBuf,
    /// Retry policy for retryable stages.
    pub retry: RetryConfig,
    /// Age after which a run-lock sentinel is considered abandoned.
    pub lock_stale_after: Duration,
    /// Overall wall-clock budget for a run, if any.
    pub run_timeout: Option<Duration>,
    /// Weekday on which incremental runs upgrade to a full refresh.
    pub weekly_refresh_day: Option<Weekday>,
    /// Shell command that fetches a dataset batch.
    pub fetch_command: Option<String>,
    /// Shell command that loads a dataset into the warehouse.
    pub load_command: Option<String>,
    /// Shell command validating the development environment.
    pub gate_dev_command: Option<String>,
    /// Shell command validating the production environment.
    pub gate_prod_command: Option<String>,
}

impl PipelineConfig {
    /// Creates a config with defaults rooted at the given data directory.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            retry: RetryConfig::default(),
            lock_stale_after: Duration::from_secs(1800),
            run_timeout: None,
            weekly_refresh_day: Some(Weekday::Mon),
            fetch_command: None,
            load_command: None,
            gate_dev_command: None,
            gate_prod_command: None,
        }
    }

    /// Reads configuration from `LEAGUESYNC_*` environment variables.
    ///
    /// Recognized variables: `LEAGUESYNC_DATA_DIR`,
    /// `LEAGUESYNC_LOCK_STALE_SECS`, `LEAGUESYNC_RUN_TIMEOUT_SECS`,
    /// `LEAGUESYNC_REFRESH_DAY` (a weekday name, or `none`),
    /// `LEAGUESYNC_MAX_ATTEMPTS`, `LEAGUESYNC_RETRY_BASE_MS`, and the
    /// collaborator commands `LEAGUESYNC_FETCH_CMD`, `LEAGUESYNC_LOAD_CMD`,
    /// `LEAGUESYNC_GATE_DEV_CMD`, `LEAGUESYNC_GATE_PROD_CMD`.
    #[must_use]
    pub fn from_env() -> Self {
        let data_root =
            env::var("LEAGUESYNC_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let mut config = Self::new(data_root);

        if let Some(secs) = read_env("LEAGUESYNC_LOCK_STALE_SECS") {
            config.lock_stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env("LEAGUESYNC_RUN_TIMEOUT_SECS") {
            config.run_timeout = Some(Duration::from_secs(secs));
        }
        if let Ok(day) = env::var("LEAGUESYNC_REFRESH_DAY") {
            if day.eq_ignore_ascii_case("none") {
                config.weekly_refresh_day = None;
            } else if let Ok(day) = Weekday::from_str(&day) {
                config.weekly_refresh_day = Some(day);
            } else {
                tracing::warn!(value = %day, "ignoring unparseable LEAGUESYNC_REFRESH_DAY");
            }
        }
        if let Some(attempts) = read_env("LEAGUESYNC_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = read_env("LEAGUESYNC_RETRY_BASE_MS") {
            config.retry.base_delay_ms = ms;
        }
        config.fetch_command = env::var("LEAGUESYNC_FETCH_CMD").ok();
        config.load_command = env::var("LEAGUESYNC_LOAD_CMD").ok();
        config.gate_dev_command = env::var("LEAGUESYNC_GATE_DEV_CMD").ok();
        config.gate_prod_command = env::var("LEAGUESYNC_GATE_PROD_CMD").ok();
        config
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the lock staleness threshold.
    #[must_use]
    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    /// Sets an overall run timeout.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Sets or clears the weekly full-refresh day.
    #[must_use]
    pub fn with_weekly_refresh_day(mut self, day: Option<Weekday>) -> Self {
        self.weekly_refresh_day = day;
        self
    }

    /// Path of the append-only checkpoint log.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_root.join("checkpoints.jsonl")
    }

    /// Path of the run-lock sentinel.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_root.join("leaguesync.lock")
    }

    /// The data root directory.
    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}

fn read_env<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(name, %value, "ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const VARS: [&str; 10] = [
        "LEAGUESYNC_DATA_DIR",
        "LEAGUESYNC_LOCK_STALE_SECS",
        "LEAGUESYNC_RUN_TIMEOUT_SECS",
        "LEAGUESYNC_REFRESH_DAY",
        "LEAGUESYNC_MAX_ATTEMPTS",
        "LEAGUESYNC_RETRY_BASE_MS",
        "LEAGUESYNC_FETCH_CMD",
        "LEAGUESYNC_LOAD_CMD",
        "LEAGUESYNC_GATE_DEV_CMD",
        "LEAGUESYNC_GATE_PROD_CMD",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let _guard = ENV_GUARD.lock();
        clear_vars();

        let config = PipelineConfig::from_env();

        assert_eq!(config.data_root, PathBuf::from("./data"));
        assert_eq!(config.lock_stale_after, Duration::from_secs(1800));
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.weekly_refresh_day, Some(Weekday::Mon));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.fetch_command, None);
    }

    #[test]
    fn test_collaborator_commands_from_env() {
        let _guard = ENV_GUARD.lock();
        clear_vars();
        env::set_var("LEAGUESYNC_FETCH_CMD", "python -m extract");
        env::set_var("LEAGUESYNC_GATE_DEV_CMD", "dbt test --target dev");

        let config = PipelineConfig::from_env();
        clear_vars();

        assert_eq!(config.fetch_command.as_deref(), Some("python -m extract"));
        assert_eq!(
            config.gate_dev_command.as_deref(),
            Some("dbt test --target dev")
        );
        assert_eq!(config.load_command, None);
    }

    #[test]
    fn test_environment_overrides() {
        let _guard = ENV_GUARD.lock();
        clear_vars();
        env::set_var("LEAGUESYNC_DATA_DIR", "/var/lib/leaguesync");
        env::set_var("LEAGUESYNC_LOCK_STALE_SECS", "60");
        env::set_var("LEAGUESYNC_RUN_TIMEOUT_SECS", "900");
        env::set_var("LEAGUESYNC_REFRESH_DAY", "sunday");
        env::set_var("LEAGUESYNC_MAX_ATTEMPTS", "5");
        env::set_var("LEAGUESYNC_RETRY_BASE_MS", "250");

        let config = PipelineConfig::from_env();
        clear_vars();

        assert_eq!(config.data_root, PathBuf::from("/var/lib/leaguesync"));
        assert_eq!(config.lock_stale_after, Duration::from_secs(60));
        assert_eq!(config.run_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.weekly_refresh_day, Some(Weekday::Sun));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
    }

    #[test]
    fn test_refresh_day_none_disables_weekly_refresh() {
        let _guard = ENV_GUARD.lock();
        clear_vars();
        env::set_var("LEAGUESYNC_REFRESH_DAY", "none");

        let config = PipelineConfig::from_env();
        clear_vars();

        assert_eq!(config.weekly_refresh_day, None);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let _guard = ENV_GUARD.lock();
        clear_vars();
        env::set_var("LEAGUESYNC_LOCK_STALE_SECS", "soon");
        env::set_var("LEAGUESYNC_REFRESH_DAY", "someday");

        let config = PipelineConfig::from_env();
        clear_vars();

        assert_eq!(config.lock_stale_after, Duration::from_secs(1800));
        assert_eq!(config.weekly_refresh_day, Some(Weekday::Mon));
    }

    #[test]
    fn test_derived_paths() {
        let config = PipelineConfig::new("/data");
        assert_eq!(config.checkpoint_path(), PathBuf::from("/data/checkpoints.jsonl"));
        assert_eq!(config.lock_path(), PathBuf::from("/data/leaguesync.lock"));
    }
}
