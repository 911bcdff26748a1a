//! Scripted chain used by the scanner and engine tests.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use recon_core::traits::LogSource;
use recon_core::types::{TransferEvent, TransferQuery};
use recon_core::{ReconError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub struct ScriptedSource {
    head: AtomicU64,
    events: Mutex<Vec<TransferEvent>>,
    /// Ranges spanning more blocks than this fail with "too many logs"
    max_span: Mutex<Option<u64>>,
    /// Fail this many upcoming calls regardless of range
    failures: AtomicU32,
    calls: Mutex<Vec<(u64, u64)>>,
}

impl ScriptedSource {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            events: Mutex::new(Vec::new()),
            max_span: Mutex::new(None),
            failures: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push(&self, event: TransferEvent) {
        self.events.lock().push(event);
    }

    pub fn limit_span(&self, span: Option<u64>) {
        *self.max_span.lock() = span;
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn head_block(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn transfer_logs(&self, query: &TransferQuery) -> Result<Vec<TransferEvent>> {
        self.calls.lock().push((query.from_block, query.to_block));

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ReconError::TransientRpc("connection reset by peer".to_string()));
        }
        if let Some(span) = *self.max_span.lock() {
            if query.to_block - query.from_block + 1 > span {
                return Err(ReconError::TransientRpc(
                    "query returned more than 10000 results".to_string(),
                ));
            }
        }

        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.block_number >= query.from_block && e.block_number <= query.to_block)
            .filter(|e| query.contracts.contains(&e.contract))
            .filter(|e| query.recipients.as_ref().map_or(true, |r| r.contains(&e.to)))
            .cloned()
            .collect())
    }
}

pub fn transfer(block: u64, contract: Address, to: Address, value: u64) -> TransferEvent {
    TransferEvent {
        block_number: block,
        tx_hash: B256::left_padding_from(&block.to_be_bytes()),
        log_index: 0,
        contract,
        from: Address::repeat_byte(0xf1),
        to,
        value: U256::from(value),
    }
}
