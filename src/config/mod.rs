use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub pool: PoolConfig,

    /// When true, internal errors are surfaced verbatim on the progress sink;
    /// otherwise workers report a generic failure line and the detail goes to
    /// the trace log only.
    #[serde(default)]
    pub debug: bool,
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry ceiling for transient (≥300, ≠404) responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff is uniform-random in `[0, max_wait_secs]` seconds per retry.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Concurrent team scrapes per division. 0 = auto (a third of the
    /// available processing units, minimum 1).
    #[serde(default)]
    pub team_workers: usize,

    /// Concurrent person scrapes per team list.
    #[serde(default = "default_person_workers")]
    pub person_workers: usize,
}

impl PoolConfig {
    pub fn team_workers(&self) -> usize {
        if self.team_workers > 0 {
            return self.team_workers;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus / 3).max(1)
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    20
}
fn default_max_wait_secs() -> u64 {
    25
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/58.0.3029.110 Safari/537.3"
        .to_string()
}
fn default_person_workers() -> usize {
    5
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("FMS").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            pool: PoolConfig::default(),
            debug: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_wait_secs: default_max_wait_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            team_workers: 0,
            person_workers: default_person_workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_workers_auto_is_at_least_one() {
        let pool = PoolConfig::default();
        assert!(pool.team_workers() >= 1);
    }

    #[test]
    fn test_explicit_team_workers_wins() {
        let pool = PoolConfig {
            team_workers: 7,
            person_workers: 5,
        };
        assert_eq!(pool.team_workers(), 7);
    }
}
