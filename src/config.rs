//
// Process-wide configuration
//
// Scoped to this core's settings (blob store location, cache TTL, grace
// period constants, storage retry/timeout bounds, private-backend mode).
// Loaded once from the environment, but kept behind an `RwLock` because the
// cache TTL is a test-only hook (§5, `CacheManager::set_ttl`) that must be
// adjustable without restarting the process.
//
use std::sync::RwLock;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::util::{get_env, get_env_bool};

pub static CONFIG: Lazy<Config> = Lazy::new(Config::load);

pub struct Config {
    inner: RwLock<Inner>,
}

struct Inner {
    data_folder: String,
    cache_ttl_secs: u64,
    grace_period_ms: i64,
    minimum_grace_period_end_ms: i64,
    storage_max_retries: u32,
    storage_timeout_secs: u64,
    private_backend: bool,
}

impl Config {
    fn load() -> Self {
        dotenvy::dotenv().ok();

        let inner = Inner {
            data_folder: get_env("DATA_FOLDER").unwrap_or_else(|| String::from("data")),
            cache_ttl_secs: get_env("CACHE_TTL_SECS").unwrap_or(15 * 60),
            grace_period_ms: get_env::<i64>("GRACE_PERIOD_DAYS").unwrap_or(15) * 24 * 60 * 60 * 1000,
            // A configured future cutoff date floors per-app grace calculations (§4.2, §8.1).
            // Left at the epoch (no floor) unless an operator sets a real cutoff.
            minimum_grace_period_end_ms: get_env("MINIMUM_GRACE_PERIOD_END_MS").unwrap_or(0),
            storage_max_retries: get_env("STORAGE_MAX_RETRIES").unwrap_or(5),
            storage_timeout_secs: get_env("STORAGE_TIMEOUT_SECS").unwrap_or(10),
            private_backend: get_env_bool("PRIVATE_BACKEND").unwrap_or(false),
        };

        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn data_folder(&self) -> String {
        self.inner.read().unwrap().data_folder.clone()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.inner.read().unwrap().cache_ttl_secs)
    }

    pub fn grace_period_ms(&self) -> i64 {
        self.inner.read().unwrap().grace_period_ms
    }

    pub fn minimum_grace_period_end_ms(&self) -> i64 {
        self.inner.read().unwrap().minimum_grace_period_end_ms
    }

    pub fn storage_max_retries(&self) -> u32 {
        self.inner.read().unwrap().storage_max_retries
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.read().unwrap().storage_timeout_secs)
    }

    pub fn private_backend(&self) -> bool {
        self.inner.read().unwrap().private_backend
    }

    /// Test-only hook (§5 "setTTL / clear are test-only hooks").
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.inner.write().unwrap().cache_ttl_secs = ttl.as_secs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grace_period_is_fifteen_days() {
        let cfg = Config::load();
        assert_eq!(cfg.grace_period_ms(), 15 * 24 * 60 * 60 * 1000);
    }

    #[test]
    fn set_cache_ttl_overrides_default() {
        let cfg = Config::load();
        cfg.set_cache_ttl(Duration::from_secs(5));
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(5));
    }
}
