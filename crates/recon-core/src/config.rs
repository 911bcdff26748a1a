use crate::error::{ReconError, Result};
use crate::types::{parse_chain_address, ChainKind, Currency, Network, WalletRecord};
use alloy_primitives::Address;
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_NETWORKS_FILE: &str = "deployments/networks.json";

/// One network entry in the networks file
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub id: i64,
    pub label: String,
    #[serde(default)]
    pub chain_kind: ChainKind,
    /// Literal URL, or `$NAME` to read it from the environment
    pub rpc_url: String,
    #[serde(default = "default_reorg_window")]
    pub reorg_window: u64,
    #[serde(default)]
    pub currencies: Vec<CurrencyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    pub id: i64,
    pub symbol: String,
    /// `0x` hex, or TRON base58 / `41…` hex
    #[serde(deserialize_with = "chain_address")]
    pub contract: Address,
    pub decimals: u32,
}

fn chain_address<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Address, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_chain_address(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid address {}", raw)))
}

fn default_reorg_window() -> u64 {
    10
}

/// Deposit wallet seeded into the in-memory ledger when no database is configured
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub user_id: i64,
    #[serde(deserialize_with = "chain_address")]
    pub address: Address,
    /// Literal hex key, or `$NAME` to read it from the environment
    #[serde(default)]
    pub private_key: Option<String>,
}

impl WalletConfig {
    pub fn into_record(self) -> Result<WalletRecord> {
        Ok(WalletRecord {
            user_id: self.user_id,
            address: self.address,
            private_key: self.private_key.as_deref().map(resolve_env_ref).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworksFile {
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
}

impl NetworksFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|_| ReconError::NetworksFileNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: NetworksFile =
            serde_json::from_str(content).map_err(|e| ReconError::ConfigParse(e.to_string()))?;

        for net in &file.networks {
            if let Some(cur) = net.currencies.iter().find(|c| c.decimals > 28) {
                return Err(ReconError::ConfigParse(format!(
                    "{}: currency {} has {} decimals, at most 28 are supported",
                    net.label, cur.symbol, cur.decimals
                )));
            }
        }
        Ok(file)
    }
}

impl NetworkConfig {
    /// Split into the runtime network and its tracked currencies.
    pub fn into_parts(self) -> Result<(Network, Vec<Currency>)> {
        let rpc_url = resolve_env_ref(&self.rpc_url)?;
        let network = Network {
            id: self.id,
            label: self.label,
            chain_kind: self.chain_kind,
            rpc_url,
            reorg_window: self.reorg_window,
        };
        let currencies = self
            .currencies
            .into_iter()
            .map(|c| Currency {
                id: c.id,
                network_id: network.id,
                symbol: c.symbol,
                contract: c.contract,
                decimals: c.decimals,
            })
            .collect();
        Ok((network, currencies))
    }
}

/// Chain scanner tuning
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub min_chunk: u64,
    pub max_chunk: u64,
    pub initial_chunk: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Minimum time between checkpoint writes
    pub flush_interval_secs: u64,
    /// Sleep between passes
    pub pass_interval_secs: u64,
    pub rpc_timeout_secs: u64,
    pub registry_ttl_secs: u64,
    /// Above this many watched addresses the `to` topic filter is dropped
    pub topic_filter_max: usize,
}

impl ScannerConfig {
    pub fn from_env() -> Self {
        let min_chunk = env_or("SCAN_MIN_CHUNK", 10u64).max(1);
        let max_chunk = env_or("SCAN_MAX_CHUNK", 10_000u64).max(min_chunk);
        let initial_chunk = env_or("SCAN_INITIAL_CHUNK", 20u64).clamp(min_chunk, max_chunk);

        Self {
            min_chunk,
            max_chunk,
            initial_chunk,
            max_retries: env_or("SCAN_MAX_RETRIES", 30),
            retry_delay_ms: env_or("SCAN_RETRY_DELAY_MS", 3000),
            flush_interval_secs: env_or("SCAN_FLUSH_INTERVAL_SECS", 60),
            pass_interval_secs: env_or("SCAN_PASS_INTERVAL_SECS", 5),
            rpc_timeout_secs: env_or("SCAN_RPC_TIMEOUT_SECS", 30),
            registry_ttl_secs: env_or("REGISTRY_TTL_SECS", 60),
            topic_filter_max: env_or("SCAN_TOPIC_FILTER_MAX", 256),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Settlement worker configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub workers: usize,
    pub poll_interval_ms: u64,
    /// How long a claimed job stays invisible to other workers
    pub lease_secs: u64,
    pub recovery_interval_secs: u64,
    /// Key used for platform-funded payouts
    pub platform_private_key: Option<String>,
}

impl SettlementConfig {
    pub fn from_env() -> Self {
        Self {
            max_retries: env_or("SETTLEMENT_MAX_RETRIES", 3),
            retry_backoff_secs: env_or("SETTLEMENT_RETRY_BACKOFF_SECS", 60),
            workers: env_or("SETTLEMENT_WORKERS", 4usize).max(1),
            poll_interval_ms: env_or("SETTLEMENT_POLL_INTERVAL_MS", 1000),
            lease_secs: env_or("SETTLEMENT_LEASE_SECS", 300),
            recovery_interval_secs: env_or("SETTLEMENT_RECOVERY_INTERVAL_SECS", 300),
            platform_private_key: env::var("SETTLEMENT_PRIVATE_KEY")
                .ok()
                .map(sanitize_value)
                .filter(|k| !k.is_empty()),
        }
    }

    /// How often a running job's lease is extended
    pub fn lease_renewal(&self) -> Duration {
        Duration::from_millis((self.lease_secs.saturating_mul(1000) / 3).max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Complete reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconConfig {
    pub networks: Vec<(Network, Vec<Currency>)>,
    /// Wallets for the in-memory ledger. Ignored when a database is configured.
    pub wallets: Vec<WalletRecord>,
    pub scanner: ScannerConfig,
    pub settlement: SettlementConfig,
}

impl ReconConfig {
    /// Load the networks file named by `RECON_NETWORKS_FILE` plus env tuning.
    pub fn load() -> Result<Self> {
        let path = env::var("RECON_NETWORKS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_NETWORKS_FILE));
        let file = NetworksFile::load(&path)?;

        let networks = file
            .networks
            .into_iter()
            .map(NetworkConfig::into_parts)
            .collect::<Result<Vec<_>>>()?;
        let wallets = file
            .wallets
            .into_iter()
            .map(WalletConfig::into_record)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            networks,
            wallets,
            scanner: ScannerConfig::default(),
            settlement: SettlementConfig::default(),
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Remove surrounding quotes and whitespace
fn sanitize_value(value: String) -> String {
    let trimmed = value.trim();
    let without_quotes = if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2
    {
        &trimmed[1..trimmed.len() - 1]
    } else if trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2 {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };
    without_quotes.to_string()
}

fn resolve_env_ref(value: &str) -> Result<String> {
    match value.strip_prefix('$') {
        Some(name) => env::var(name)
            .map(sanitize_value)
            .map_err(|_| ReconError::MissingEnvVar(name.to_string())),
        None => Ok(sanitize_value(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "networks": [
            {
                "id": 1,
                "label": "ETH",
                "rpc_url": "https://rpc.example",
                "currencies": [
                    { "id": 7, "symbol": "USDT", "contract": "0xdac17f958d2ee523a2206206994597c13d831ec7", "decimals": 6 }
                ]
            },
            {
                "id": 2,
                "label": "TRON",
                "chain_kind": "tron",
                "rpc_url": "'https://tron.example/jsonrpc'",
                "reorg_window": 20,
                "currencies": [
                    { "id": 8, "symbol": "USDT", "contract": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", "decimals": 6 }
                ]
            }
        ],
        "wallets": [
            { "user_id": 1, "address": "0x00000000000000000000000000000000000000aa" },
            { "user_id": 2, "address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", "private_key": "$RECON_TEST_SURELY_UNSET_KEY" }
        ]
    }"#;

    #[test]
    fn test_parse_networks_file() {
        let file = NetworksFile::parse(SAMPLE).unwrap();
        assert_eq!(file.networks.len(), 2);

        let (eth, currencies) = file.networks[0].clone().into_parts().unwrap();
        assert_eq!(eth.label, "ETH");
        assert_eq!(eth.chain_kind, ChainKind::Evm);
        assert_eq!(eth.reorg_window, 10);
        assert_eq!(currencies.len(), 1);
        assert_eq!(currencies[0].network_id, 1);
        assert_eq!(currencies[0].decimals, 6);

        let (tron, tron_currencies) = file.networks[1].clone().into_parts().unwrap();
        assert_eq!(tron.chain_kind, ChainKind::Tron);
        assert_eq!(tron.reorg_window, 20);
        assert_eq!(tron.rpc_url, "https://tron.example/jsonrpc");
        assert_eq!(
            tron_currencies[0].contract,
            "0xa614f803b6fd780986a42c78ec9c7f77e6ded13c".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_wallets_accept_tron_addresses() {
        let file = NetworksFile::parse(SAMPLE).unwrap();
        assert_eq!(file.wallets.len(), 2);

        let custodial = file.wallets[0].clone().into_record().unwrap();
        assert_eq!(custodial.user_id, 1);
        assert!(custodial.private_key.is_none());

        // Key references resolve from the environment like RPC URLs
        assert!(matches!(
            file.wallets[1].clone().into_record(),
            Err(ReconError::MissingEnvVar(_))
        ));
        assert_eq!(
            file.wallets[1].address,
            "0xa614f803b6fd780986a42c78ec9c7f77e6ded13c".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_rejects_malformed_contract() {
        let content = r#"{"networks":[{"id":1,"label":"X","rpc_url":"http://x","currencies":[
            {"id":1,"symbol":"BAD","contract":"TNotAnAddress","decimals":6}]}]}"#;
        assert!(matches!(
            NetworksFile::parse(content),
            Err(ReconError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_rejects_unsupported_decimals() {
        let content = r#"{"networks":[{"id":1,"label":"X","rpc_url":"http://x","currencies":[
            {"id":1,"symbol":"BIG","contract":"0x0000000000000000000000000000000000000001","decimals":30}]}]}"#;
        assert!(matches!(
            NetworksFile::parse(content),
            Err(ReconError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_env_reference() {
        let err = resolve_env_ref("$RECON_TEST_SURELY_UNSET_VAR").unwrap_err();
        assert!(matches!(err, ReconError::MissingEnvVar(name) if name == "RECON_TEST_SURELY_UNSET_VAR"));
    }

    #[test]
    fn test_sanitize_value() {
        assert_eq!(sanitize_value("  \"abc\" ".to_string()), "abc");
        assert_eq!(sanitize_value("'abc'".to_string()), "abc");
        assert_eq!(sanitize_value("abc".to_string()), "abc");
    }
}
