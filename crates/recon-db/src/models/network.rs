use crate::{DatabaseError, Result};
use alloy_primitives::Address;
use recon_core::types::{ChainKind, Currency, Network};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database model for networks table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbNetwork {
    pub id: i64,
    pub label: String,
    pub chain_kind: String,
    pub rpc_url: String,
    pub reorg_window: i64,
}

impl TryFrom<DbNetwork> for Network {
    type Error = DatabaseError;

    fn try_from(row: DbNetwork) -> Result<Self> {
        let chain_kind = ChainKind::from_str(&row.chain_kind).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown chain kind {}", row.chain_kind))
        })?;
        Ok(Network {
            id: row.id,
            label: row.label,
            chain_kind,
            rpc_url: row.rpc_url,
            reorg_window: row.reorg_window.max(0) as u64,
        })
    }
}

/// Database model for currencies table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbCurrency {
    pub id: i64,
    pub network_id: i64,
    pub symbol: String,
    /// Token contract address
    pub contract: String,
    pub decimals: i32,
}

impl TryFrom<DbCurrency> for Currency {
    type Error = DatabaseError;

    fn try_from(row: DbCurrency) -> Result<Self> {
        let contract: Address = row
            .contract
            .parse()
            .map_err(|e| DatabaseError::Serialization(format!("currency {}: {}", row.id, e)))?;
        Ok(Currency {
            id: row.id,
            network_id: row.network_id,
            symbol: row.symbol,
            contract,
            decimals: row.decimals.max(0) as u32,
        })
    }
}
