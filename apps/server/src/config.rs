// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Server configuration loaded from environment variables.

use std::time::Duration;

/// Which key-value store backs the emission cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl CacheBackend {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "local" => CacheBackend::Memory,
            _ => CacheBackend::Redis,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on.
    pub port: u16,
    /// Cache backend selection.
    pub cache_backend: CacheBackend,
    /// Redis host.
    pub redis_host: String,
    /// Redis port.
    pub redis_port: u16,
    /// Expiry applied to every cache entry, in seconds.
    pub cache_ttl_secs: u64,
    /// Bearer credential for the emission-factor provider.
    pub climatiq_api_key: String,
    /// Provider base URL, without the `/estimate` suffix.
    pub climatiq_base_url: String,
    /// Emission-factor activity identifier sent with every estimate.
    pub activity_id: String,
    /// Timeout for a single outbound call, in seconds.
    pub upstream_timeout_secs: u64,
    /// Retries on transient transport failures.
    pub upstream_max_retries: u32,
    /// Inbound request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Allowed CORS origins (comma-separated, or "*" for all).
    pub cors_origins: Vec<String>,
    /// Emit JSON logs instead of pretty output.
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        Self {
            port: var("PORT", "5000").parse().unwrap_or(5000),
            cache_backend: CacheBackend::parse(&var("CACHE_BACKEND", "redis")),
            redis_host: var("REDIS_HOST", "redis"),
            redis_port: var("REDIS_PORT", "6379").parse().unwrap_or(6379),
            cache_ttl_secs: var("CACHE_TTL_SECS", "3600").parse().unwrap_or(3600),
            climatiq_api_key: var("CLIMATIQ_API_KEY", ""),
            climatiq_base_url: var("CLIMATIQ_BASE_URL", "https://api.climatiq.io")
                .trim_end_matches('/')
                .to_string(),
            activity_id: var("CLIMATIQ_ACTIVITY_ID", "electricity-energy_source_grid_mix"),
            upstream_timeout_secs: var("UPSTREAM_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            upstream_max_retries: var("UPSTREAM_MAX_RETRIES", "1").parse().unwrap_or(1),
            request_timeout_secs: var("REQUEST_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            cors_origins: var("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            json_logs: var("LOG_FORMAT", "pretty").eq_ignore_ascii_case("json"),
        }
    }

    /// Connection URL for the Redis backend.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// True when any origin may call the API.
    pub fn cors_allow_any(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
