mod attempt;
mod balance;
mod ledger;
mod network;
mod sync_state;
mod wallet;

pub use attempt::AttemptRepository;
pub use balance::BalanceRepository;
pub use ledger::LedgerRepository;
pub use network::NetworkRepository;
pub use sync_state::SyncStateRepository;
pub use wallet::WalletRepository;
