use std::time::Duration;

use storage::Database;

use crate::cache::SwrCache;
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct ReadSettings {
    pub cache_enabled: bool,
    pub fallback_timeout: Duration,
    pub fallback_top_n: i64,
}

impl From<&Config> for ReadSettings {
    fn from(config: &Config) -> Self {
        Self {
            cache_enabled: config.cache_enabled,
            fallback_timeout: config.fallback_timeout,
            fallback_top_n: config.fallback_top_n,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cache: SwrCache,
    pub read: ReadSettings,
}
