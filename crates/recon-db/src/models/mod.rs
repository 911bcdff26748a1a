mod balance;
mod ledger_entry;
mod network;
mod wallet;

pub use balance::DbBalance;
pub use ledger_entry::DbLedgerEntry;
pub use network::{DbCurrency, DbNetwork};
pub use wallet::DbWallet;

use alloy_primitives::Address;

/// Lowercase 0x-prefixed form used for every stored address
pub fn address_key(address: &Address) -> String {
    format!("{:?}", address)
}
