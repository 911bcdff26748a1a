use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain family. Both are scanned over the Ethereum JSON-RPC log API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    #[default]
    Evm,
    Tron,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Evm => "evm",
            ChainKind::Tron => "tron",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "evm" => Some(ChainKind::Evm),
            "tron" => Some(ChainKind::Tron),
            _ => None,
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub id: i64,
    /// Stable label, also the checkpoint key
    pub label: String,
    pub chain_kind: ChainKind,
    pub rpc_url: String,
    /// Blocks re-scanned at the start of every pass
    pub reorg_window: u64,
}

impl Network {
    /// Root of the TRON HTTP API, served next to the `/jsonrpc` endpoint.
    pub fn http_api_url(&self) -> &str {
        let url = self.rpc_url.trim_end_matches('/');
        url.strip_suffix("/jsonrpc").unwrap_or(url)
    }
}

/// Token tracked on one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub id: i64,
    pub network_id: i64,
    pub symbol: String,
    pub contract: Address,
    pub decimals: u32,
}

/// Deposit wallet owned by a user.
#[derive(Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub user_id: i64,
    pub address: Address,
    /// Hex signing key when the platform custodies the wallet
    pub private_key: Option<String>,
}

impl fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletRecord")
            .field("user_id", &self.user_id)
            .field("address", &self.address)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
