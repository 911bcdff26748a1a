use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Namespace for every key this service writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Lease on a claimed settlement job, in seconds
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_key_prefix() -> String {
    "BLOCKER".to_string()
}

fn default_lease_secs() -> u64 {
    300
}

impl RedisConfig {
    /// Returns None when REDIS_URL is unset
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty())?;
        Some(Self {
            url,
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| default_key_prefix()),
            lease_secs: std::env::var("SETTLEMENT_LEASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_lease_secs),
        })
    }
}
