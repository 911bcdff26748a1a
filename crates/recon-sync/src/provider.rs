use alloy::network::Ethereum;
use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use recon_core::events::Transfer;
use recon_core::traits::LogSource;
use recon_core::types::{TransferEvent, TransferQuery};
use recon_core::{ReconError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Boxed provider trait for HTTP connections
pub type BoxedProvider = Arc<dyn Provider<Ethereum> + Send + Sync>;

/// Manages the HTTP provider for one network
pub struct ProviderManager {
    http: BoxedProvider,
    label: String,
}

impl ProviderManager {
    pub fn new(label: &str, http_url: &str) -> Result<Self> {
        let http_url: reqwest::Url = http_url
            .parse()
            .map_err(|e| ReconError::ConfigParse(format!("Invalid RPC URL for {}: {}", label, e)))?;

        let http = ProviderBuilder::new().connect_http(http_url);

        Ok(Self {
            http: Arc::new(http),
            label: label.to_string(),
        })
    }

    pub fn http(&self) -> &BoxedProvider {
        &self.http
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Decode a raw log into the typed transfer shape.
pub fn decode_transfer(log: &Log) -> Result<TransferEvent> {
    let decoded = Transfer::decode_log(&log.inner)
        .map_err(|e| ReconError::EventDecode(format!("Transfer: {}", e)))?;

    Ok(TransferEvent {
        block_number: log
            .block_number
            .ok_or_else(|| ReconError::EventDecode("log without block number".to_string()))?,
        tx_hash: log
            .transaction_hash
            .ok_or_else(|| ReconError::EventDecode("log without transaction hash".to_string()))?,
        log_index: log.log_index.unwrap_or_default(),
        contract: log.inner.address,
        from: decoded.data.from,
        to: decoded.data.to,
        value: decoded.data.value,
    })
}

/// `eth_getLogs` over an alloy HTTP provider with a per-call timeout.
pub struct RpcLogSource {
    provider: Arc<ProviderManager>,
    timeout: Duration,
}

impl RpcLogSource {
    pub fn new(provider: Arc<ProviderManager>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    fn timed_out(&self, method: &str) -> ReconError {
        ReconError::TransientRpc(format!(
            "{} timed out after {}s on {}",
            method,
            self.timeout.as_secs(),
            self.provider.label()
        ))
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn head_block(&self) -> Result<u64> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.provider.http().get_block_number())
            .await
            .map_err(|_| self.timed_out("eth_blockNumber"))?
            .map_err(|e| ReconError::TransientRpc(format!("{:?}", e)));
        recon_metrics::histograms::rpc_request_duration(started.elapsed(), "eth_blockNumber");
        result
    }

    async fn transfer_logs(&self, query: &TransferQuery) -> Result<Vec<TransferEvent>> {
        if query.contracts.is_empty() {
            return Ok(vec![]);
        }

        let mut filter = Filter::new()
            .address(query.contracts.clone())
            .event_signature(Transfer::SIGNATURE_HASH)
            .from_block(query.from_block)
            .to_block(query.to_block);
        if let Some(recipients) = &query.recipients {
            let topics: Vec<B256> = recipients.iter().map(|a| a.into_word()).collect();
            filter = filter.topic2(topics);
        }

        let started = Instant::now();
        let logs = tokio::time::timeout(self.timeout, self.provider.http().get_logs(&filter))
            .await
            .map_err(|_| self.timed_out("eth_getLogs"))?
            // Debug format keeps the full error chain including response details
            .map_err(|e| ReconError::TransientRpc(format!("{:?}", e)))?;
        recon_metrics::histograms::rpc_request_duration(started.elapsed(), "eth_getLogs");

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_transfer(log) {
                Ok(event) => events.push(event),
                // ERC-721 shares the Transfer signature with an indexed value
                Err(e) => warn!(
                    network = %self.provider.label(),
                    tx_hash = ?log.transaction_hash,
                    error = %e,
                    "Skipping undecodable Transfer log"
                ),
            }
        }

        if !events.is_empty() {
            debug!(
                network = %self.provider.label(),
                from = query.from_block,
                to = query.to_block,
                count = events.len(),
                "Fetched Transfer logs"
            );
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, Address, LogData, U256};

    fn raw_transfer(to: Address, value: u64) -> Log {
        let data = Transfer {
            from: address!("00000000000000000000000000000000000000f1"),
            to,
            value: U256::from(value),
        }
        .encode_log_data();
        Log {
            inner: alloy::primitives::Log {
                address: address!("00000000000000000000000000000000000000c1"),
                data,
            },
            block_number: Some(150),
            transaction_hash: Some(b256!(
                "1111111111111111111111111111111111111111111111111111111111111111"
            )),
            log_index: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_transfer() {
        let to = address!("00000000000000000000000000000000000000a1");
        let event = decode_transfer(&raw_transfer(to, 1_000_000)).unwrap();

        assert_eq!(event.block_number, 150);
        assert_eq!(event.log_index, 3);
        assert_eq!(event.to, to);
        assert_eq!(event.value, U256::from(1_000_000u64));
        assert_eq!(event.contract, address!("00000000000000000000000000000000000000c1"));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let mut log = raw_transfer(Address::ZERO, 1);
        log.inner.data = LogData::new_unchecked(vec![Transfer::SIGNATURE_HASH], Default::default());
        assert!(matches!(decode_transfer(&log), Err(ReconError::EventDecode(_))));

        let mut log = raw_transfer(Address::ZERO, 1);
        log.block_number = None;
        assert!(matches!(decode_transfer(&log), Err(ReconError::EventDecode(_))));
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ProviderManager::new("ETH", "not a url"),
            Err(ReconError::ConfigParse(_))
        ));
    }
}
