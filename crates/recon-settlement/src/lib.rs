//! Outbound settlement: job dispatch, the transfer state machine and the
//! on-chain clients that sign withdrawals and payouts.

mod client;
mod dispatcher;
mod executor;
mod registry;
mod tron;

#[cfg(test)]
mod testing;

pub use client::EvmTransferClient;
pub use dispatcher::{HoldOutcome, SettlementDispatcher};
pub use executor::{Execution, TransferExecutor};
pub use registry::{HandlerRegistry, JobHandler, TransferClients};
pub use tron::TronTransferClient;
