mod address;
mod job;
mod ledger;
mod network;
mod transfer;

pub use address::{parse_chain_address, to_tron_base58, to_tron_hex, TRON_ADDRESS_PREFIX};
pub use job::{lease_token, JobKind, JobLease, SettlementJob};
pub use ledger::{
    decimal_to_raw, raw_to_decimal, AttemptOutcome, Balance, BalanceEffect, ChangeType,
    DepositWrite, EntryArgs, LedgerEntry, LedgerStatus, NewDeposit, Resolution,
    SettlementAttempt,
};
pub use network::{ChainKind, Currency, Network, WalletRecord};
pub use transfer::{IngestOutcome, TransferEvent, TransferQuery};

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
