use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, SendableTx};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use recon_core::traits::{
    ReceiptStatus, SignedTransfer, TransferClient, TransferRequest, TransferSource,
};
use recon_core::types::Currency;
use recon_core::{ReconError, Result};
use std::future::IntoFuture;
use std::time::{Duration, Instant};
use tracing::debug;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 value) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// ERC-20 transfers over JSON-RPC, signed locally.
///
/// Withdrawals are signed with the user's custodial wallet key, payouts with
/// the platform key.
pub struct EvmTransferClient {
    label: String,
    url: reqwest::Url,
    platform: Option<PrivateKeySigner>,
    timeout: Duration,
}

impl EvmTransferClient {
    pub fn new(
        label: &str,
        rpc_url: &str,
        platform_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| ReconError::ConfigParse(format!("Invalid RPC URL for {}: {}", label, e)))?;

        Ok(Self {
            label: label.to_string(),
            url,
            platform: parse_platform_key(platform_key)?,
            timeout,
        })
    }

    /// Address payouts are sent from, if a platform key is configured.
    pub fn platform_address(&self) -> Option<Address> {
        self.platform.as_ref().map(|s| s.address())
    }

    fn signer(&self, source: &TransferSource) -> Result<PrivateKeySigner> {
        source_signer(self.platform.as_ref(), source)
    }

    fn source_address(&self, source: &TransferSource) -> Result<Address> {
        source_address(self.platform.as_ref(), source)
    }

    async fn timed<T, E, F>(&self, method: &str, call: F) -> Result<T>
    where
        E: std::fmt::Debug,
        F: IntoFuture<Output = std::result::Result<T, E>>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                ReconError::TransientRpc(format!(
                    "{} timed out after {}s on {}",
                    method,
                    self.timeout.as_secs(),
                    self.label
                ))
            })?
            .map_err(|e| ReconError::Chain(format!("{:?}", e)));
        recon_metrics::histograms::rpc_request_duration(started.elapsed(), method);
        result
    }
}

#[async_trait]
impl TransferClient for EvmTransferClient {
    async fn source_balance(&self, source: &TransferSource, currency: &Currency) -> Result<U256> {
        let owner = self.source_address(source)?;
        let provider = ProviderBuilder::new().connect_http(self.url.clone());
        let token = IERC20::new(currency.contract, &provider);
        self.timed("eth_call", async { token.balanceOf(owner).call().await })
            .await
    }

    async fn sign(&self, request: &TransferRequest) -> Result<SignedTransfer> {
        let signer = self.signer(&request.source)?;
        let from = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(self.url.clone());
        let token = IERC20::new(request.currency.contract, &provider);
        let tx = token
            .transfer(request.to, request.amount)
            .into_transaction_request()
            .with_from(from);

        // Nonce, gas and fees are filled from the node, then signed locally
        let filled = self.timed("eth_fillTransaction", provider.fill(tx)).await?;
        let SendableTx::Envelope(envelope) = filled else {
            return Err(ReconError::Chain(format!(
                "Transfer from {} on {} was not signed",
                from, self.label
            )));
        };
        let signed = SignedTransfer {
            tx_hash: format!("{:?}", envelope.tx_hash()),
            raw: format!("0x{}", hex::encode(envelope.encoded_2718())),
        };

        debug!(
            network = %self.label,
            from = %from,
            to = %request.to,
            token = %request.currency.symbol,
            tx_hash = %signed.tx_hash,
            "Transfer signed"
        );
        Ok(signed)
    }

    async fn submit(&self, signed: &SignedTransfer) -> Result<()> {
        let raw = decode_raw(&signed.raw)?;
        let provider = ProviderBuilder::new().connect_http(self.url.clone());
        match self
            .timed("eth_sendRawTransaction", provider.send_raw_transaction(&raw))
            .await
        {
            Ok(_) => Ok(()),
            Err(ReconError::Chain(message)) if is_already_known(&message) => {
                debug!(network = %self.label, tx_hash = %signed.tx_hash, "Node already has the transaction");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn receipt(&self, tx_hash: &str) -> Result<ReceiptStatus> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| ReconError::PermanentData(format!("Malformed tx hash {}", tx_hash)))?;
        let provider = ProviderBuilder::new().connect_http(self.url.clone());

        let receipt = self
            .timed("eth_getTransactionReceipt", provider.get_transaction_receipt(hash))
            .await?;
        Ok(match receipt {
            Some(receipt) if receipt.status() => ReceiptStatus::Confirmed,
            Some(_) => ReceiptStatus::Reverted,
            None => ReceiptStatus::Pending,
        })
    }
}

pub(crate) fn parse_platform_key(key: Option<&str>) -> Result<Option<PrivateKeySigner>> {
    key.map(|key| {
        key.trim().parse::<PrivateKeySigner>().map_err(|_| {
            ReconError::ConfigParse("SETTLEMENT_PRIVATE_KEY is not a valid key".to_string())
        })
    })
    .transpose()
}

/// Key that signs for `source`: the platform key for payouts, the wallet's own otherwise.
pub(crate) fn source_signer(
    platform: Option<&PrivateKeySigner>,
    source: &TransferSource,
) -> Result<PrivateKeySigner> {
    match source {
        TransferSource::Platform => platform.cloned().ok_or_else(|| {
            ReconError::PermanentData("No platform signing key configured".to_string())
        }),
        TransferSource::Wallet(wallet) => wallet
            .private_key
            .as_deref()
            .ok_or_else(|| {
                ReconError::PermanentData(format!("Wallet {} has no signing key", wallet.address))
            })?
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|_| {
                ReconError::PermanentData(format!("Wallet {} has an invalid signing key", wallet.address))
            }),
    }
}

pub(crate) fn source_address(
    platform: Option<&PrivateKeySigner>,
    source: &TransferSource,
) -> Result<Address> {
    match source {
        TransferSource::Platform => platform.map(|s| s.address()).ok_or_else(|| {
            ReconError::PermanentData("No platform signing key configured".to_string())
        }),
        TransferSource::Wallet(wallet) => Ok(wallet.address),
    }
}

fn decode_raw(raw: &str) -> Result<Vec<u8>> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| ReconError::PermanentData(format!("Stored transaction is not hex: {}", e)))
}

/// Node rejection meaning the same bytes were accepted earlier.
fn is_already_known(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already known") || message.contains("already imported")
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::types::WalletRecord;

    // Well-known development key, never funded outside local chains
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn client(platform_key: Option<&str>) -> EvmTransferClient {
        EvmTransferClient::new("ETH", "http://localhost:8545", platform_key, Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_platform_key_is_parsed() {
        let funded = client(Some(DEV_KEY));
        assert_eq!(
            funded.platform_address(),
            Some("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap())
        );
        assert!(client(None).platform_address().is_none());
    }

    #[test]
    fn test_bad_configuration_is_rejected() {
        assert!(matches!(
            EvmTransferClient::new("ETH", "not a url", None, Duration::from_secs(1)),
            Err(ReconError::ConfigParse(_))
        ));
        assert!(matches!(
            EvmTransferClient::new("ETH", "http://localhost:8545", Some("nope"), Duration::from_secs(1)),
            Err(ReconError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_keys_are_permanent() {
        let client = client(None);
        assert!(matches!(
            client.signer(&TransferSource::Platform),
            Err(ReconError::PermanentData(_))
        ));

        let wallet = WalletRecord {
            user_id: 1,
            address: Address::ZERO,
            private_key: None,
        };
        assert!(matches!(
            client.signer(&TransferSource::Wallet(wallet.clone())),
            Err(ReconError::PermanentData(_))
        ));
        assert_eq!(client.source_address(&TransferSource::Wallet(wallet)).unwrap(), Address::ZERO);
    }

    #[test]
    fn test_resubmission_of_known_transaction_is_accepted() {
        assert!(is_already_known("server returned an error response: error code -32000: already known"));
        assert!(is_already_known("Transaction Already Imported"));
        assert!(!is_already_known("nonce too low"));
    }

    #[test]
    fn test_stored_raw_transaction_decodes() {
        assert_eq!(decode_raw("0x02f8").unwrap(), vec![0x02, 0xf8]);
        assert_eq!(decode_raw("02f8").unwrap(), vec![0x02, 0xf8]);
        assert!(matches!(decode_raw("0xzz"), Err(ReconError::PermanentData(_))));
    }
}
