use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `USERPULSE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeConfig {
    /// Seconds between computation cycles for each workspace.
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Maximum assignments dispatched per batch when paging through a
    /// workspace's users.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsConfig {
    /// TTL for the per-workspace subscription map cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    500
}

fn default_cache_ttl_secs() -> u64 {
    60
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            page_size: default_page_size(),
        }
    }
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            compute: ComputeConfig::default(),
            subscriptions: SubscriptionsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("USERPULSE")
                .separator("__")
                .try_parsing(true),
        );
        let config = builder.build()?;
        config.try_deserialize()
    }
}
