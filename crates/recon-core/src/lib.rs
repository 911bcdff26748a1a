pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use config::{
    NetworkConfig, NetworksFile, ReconConfig, ScannerConfig, SettlementConfig, WalletConfig,
};
pub use error::{ReconError, Result};
