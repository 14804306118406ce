use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub cache_enabled: bool,
    pub cache_fresh_ttl: Duration,
    pub cache_stale_multiplier: u32,
    pub fallback_timeout: Duration,
    pub fallback_top_n: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("HOST").context("Cannot load HOST env variable")?,
            port: std::env::var("PORT")
                .context("Cannot load PORT env variable")?
                .parse()
                .context("PORT must be a number")?,
            database_url: std::env::var("DATABASE_URL")
                .context("Cannot load DATABASE_URL env variable")?,
            cache_enabled: env_or("CACHE_ENABLED", true)?,
            cache_fresh_ttl: Duration::from_millis(env_or("CACHE_FRESH_TTL_MS", 1000u64)?),
            cache_stale_multiplier: env_or("CACHE_STALE_MULTIPLIER", 2u32)?,
            fallback_timeout: Duration::from_millis(env_or("FALLBACK_TIMEOUT_MS", 200u64)?),
            fallback_top_n: env_or("FALLBACK_TOP_N", 10i64)?,
        })
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a valid value")),
        Err(_) => Ok(default),
    }
}
