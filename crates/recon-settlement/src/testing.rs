//! Scripted chain client and ledger fixtures for settlement tests.

use alloy::primitives::{address, Address, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use recon_core::traits::{
    ReceiptStatus, SignedTransfer, TransferClient, TransferRequest, TransferSource,
};
use recon_core::types::{Currency, WalletRecord};
use recon_core::{ReconError, Result, SettlementConfig};
use recon_store::MemoryLedger;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const NETWORK_ID: i64 = 1;
pub const CURRENCY_ID: i64 = 10;
pub const USER_ID: i64 = 1;
pub const USER_WALLET: Address = address!("00000000000000000000000000000000000000aa");
pub const DESTINATION: &str = "0x00000000000000000000000000000000000000dd";

pub fn settlement_config() -> SettlementConfig {
    SettlementConfig {
        max_retries: 3,
        retry_backoff_secs: 0,
        workers: 2,
        poll_interval_ms: 10,
        lease_secs: 300,
        recovery_interval_secs: 300,
        platform_private_key: None,
    }
}

pub fn currency() -> Currency {
    Currency {
        id: CURRENCY_ID,
        network_id: NETWORK_ID,
        symbol: "USDT".to_string(),
        contract: address!("00000000000000000000000000000000000000cc"),
        decimals: 6,
    }
}

/// Ledger with one custodial user wallet, one currency and a starting balance.
pub fn ledger(balance: Decimal) -> Arc<MemoryLedger> {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.add_currency(currency());
    ledger.add_wallet(WalletRecord {
        user_id: USER_ID,
        address: USER_WALLET,
        private_key: Some("01".repeat(32)),
    });
    ledger.set_balance(USER_ID, CURRENCY_ID, balance);
    ledger
}

/// How the scripted node answers a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Accept,
    /// Connection drops before the node sees the transaction
    Lost,
    /// Transaction lands but the reply never arrives
    LandedButFailed,
}

/// Chain double that records signed and submitted transfers and answers
/// receipts from a script.
pub struct ScriptedClient {
    balance: Mutex<U256>,
    fail_signing: AtomicBool,
    fail_receipt: AtomicBool,
    submit_mode: Mutex<SubmitMode>,
    /// Receipt status assigned to transactions once they land
    mined_as: Mutex<ReceiptStatus>,
    receipts: Mutex<HashMap<String, ReceiptStatus>>,
    signed: Mutex<Vec<TransferRequest>>,
    submissions: Mutex<Vec<String>>,
    nonce: AtomicU64,
}

impl ScriptedClient {
    pub fn new(balance: u64) -> Self {
        Self {
            balance: Mutex::new(U256::from(balance)),
            fail_signing: AtomicBool::new(false),
            fail_receipt: AtomicBool::new(false),
            submit_mode: Mutex::new(SubmitMode::Accept),
            mined_as: Mutex::new(ReceiptStatus::Confirmed),
            receipts: Mutex::new(HashMap::new()),
            signed: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn fail_signing(&self, fail: bool) {
        self.fail_signing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_receipts(&self, fail: bool) {
        self.fail_receipt.store(fail, Ordering::SeqCst);
    }

    pub fn submit_as(&self, mode: SubmitMode) {
        *self.submit_mode.lock() = mode;
    }

    pub fn mine_as(&self, status: ReceiptStatus) {
        *self.mined_as.lock() = status;
    }

    pub fn set_receipt(&self, tx_hash: &str, status: ReceiptStatus) {
        self.receipts.lock().insert(tx_hash.to_string(), status);
    }

    /// Every distinct transaction signed, in order.
    pub fn signed(&self) -> Vec<TransferRequest> {
        self.signed.lock().clone()
    }

    /// Tx hash of every submission, resubmissions included.
    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().clone()
    }

    /// Distinct transactions that reached the chain.
    pub fn landed(&self) -> usize {
        self.receipts.lock().len()
    }
}

#[async_trait]
impl TransferClient for ScriptedClient {
    async fn source_balance(&self, _source: &TransferSource, _currency: &Currency) -> Result<U256> {
        Ok(*self.balance.lock())
    }

    async fn sign(&self, request: &TransferRequest) -> Result<SignedTransfer> {
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(ReconError::TransientRpc("connection reset by peer".to_string()));
        }
        self.signed.lock().push(request.clone());
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SignedTransfer {
            tx_hash: format!("0x{:064x}", nonce),
            raw: format!("0x02f8{:060x}", nonce),
        })
    }

    async fn submit(&self, signed: &SignedTransfer) -> Result<()> {
        self.submissions.lock().push(signed.tx_hash.clone());
        let mode = *self.submit_mode.lock();
        if mode != SubmitMode::Lost {
            let mined_as = *self.mined_as.lock();
            self.receipts
                .lock()
                .entry(signed.tx_hash.clone())
                .or_insert(mined_as);
        }
        match mode {
            SubmitMode::Accept => Ok(()),
            SubmitMode::Lost => Err(ReconError::TransientRpc("connection reset by peer".to_string())),
            SubmitMode::LandedButFailed => {
                Err(ReconError::TransientRpc("request timed out".to_string()))
            }
        }
    }

    async fn receipt(&self, tx_hash: &str) -> Result<ReceiptStatus> {
        if self.fail_receipt.load(Ordering::SeqCst) {
            return Err(ReconError::TransientRpc("request timed out".to_string()));
        }
        Ok(self
            .receipts
            .lock()
            .get(tx_hash)
            .copied()
            .unwrap_or(ReceiptStatus::Pending))
    }
}
