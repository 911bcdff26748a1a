//! TRC-20 transfers over the TRON HTTP API.
//!
//! The node builds the unsigned transaction. We check its id against the
//! raw bytes, sign the id locally and keep the signed JSON as the raw form,
//! so a resubmission sends exactly what was stored.

use crate::client::{parse_platform_key, source_address, source_signer};
use alloy::primitives::{Address, Signature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use recon_core::traits::{
    ReceiptStatus, SignedTransfer, TransferClient, TransferRequest, TransferSource,
};
use recon_core::types::{to_tron_hex, Currency};
use recon_core::{ReconError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::debug;

/// Energy budget per transfer, in sun
pub const TRC20_FEE_LIMIT: u64 = 5_000_000;

const BALANCE_OF: &str = "balanceOf(address)";
const TRANSFER: &str = "transfer(address,uint256)";
const DUPLICATE: &str = "DUP_TRANSACTION_ERROR";

#[derive(Debug, Serialize)]
struct TriggerRequest {
    owner_address: String,
    contract_address: String,
    function_selector: &'static str,
    parameter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_limit: Option<u64>,
    call_value: u64,
    visible: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    #[serde(default)]
    result: ApiResult,
    #[serde(default)]
    constant_result: Vec<String>,
    #[serde(default)]
    transaction: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TxReceipt {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TransactionInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    receipt: TxReceipt,
}

pub struct TronTransferClient {
    label: String,
    api_url: String,
    http: reqwest::Client,
    platform: Option<PrivateKeySigner>,
}

impl TronTransferClient {
    pub fn new(
        label: &str,
        api_url: &str,
        platform_key: Option<&str>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_url = api_url.trim_end_matches('/');
        reqwest::Url::parse(api_url)
            .map_err(|e| ReconError::ConfigParse(format!("Invalid API URL for {}: {}", label, e)))?;

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(key.trim())
                .map_err(|_| ReconError::ConfigParse("TRON_API_KEY is not a valid header".to_string()))?;
            headers.insert("TRON-PRO-API-KEY", value);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ReconError::ConfigParse(format!("HTTP client for {}: {}", label, e)))?;

        Ok(Self {
            label: label.to_string(),
            api_url: api_url.to_string(),
            http,
            platform: parse_platform_key(platform_key)?,
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, method: &str, body: &B) -> Result<R> {
        let started = Instant::now();
        let url = format!("{}/wallet/{}", self.api_url, method);
        let result = async {
            let response = self.http.post(&url).json(body).send().await.map_err(|e| {
                ReconError::TransientRpc(format!("{} on {}: {}", method, self.label, e))
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(ReconError::TransientRpc(format!(
                    "{} on {} returned HTTP {}",
                    method, self.label, status
                )));
            }
            response
                .json::<R>()
                .await
                .map_err(|e| ReconError::Chain(format!("{} on {}: {}", method, self.label, e)))
        }
        .await;
        recon_metrics::histograms::rpc_request_duration(started.elapsed(), method);
        result
    }
}

#[async_trait]
impl TransferClient for TronTransferClient {
    async fn source_balance(&self, source: &TransferSource, currency: &Currency) -> Result<U256> {
        let owner = source_address(self.platform.as_ref(), source)?;
        let request = TriggerRequest {
            owner_address: to_tron_hex(&owner),
            contract_address: to_tron_hex(&currency.contract),
            function_selector: BALANCE_OF,
            parameter: encode_words(&[address_word(&owner)]),
            fee_limit: None,
            call_value: 0,
            visible: false,
        };
        let response: TriggerResponse = self.post("triggerconstantcontract", &request).await?;
        check_result(&response.result, BALANCE_OF)?;
        let word = response
            .constant_result
            .first()
            .ok_or_else(|| ReconError::Chain(format!("{} returned no value", BALANCE_OF)))?;
        U256::from_str_radix(word, 16)
            .map_err(|e| ReconError::Chain(format!("{} returned {}: {}", BALANCE_OF, word, e)))
    }

    async fn sign(&self, request: &TransferRequest) -> Result<SignedTransfer> {
        let signer = source_signer(self.platform.as_ref(), &request.source)?;
        let from = signer.address();
        let trigger = TriggerRequest {
            owner_address: to_tron_hex(&from),
            contract_address: to_tron_hex(&request.currency.contract),
            function_selector: TRANSFER,
            parameter: encode_words(&[address_word(&request.to), request.amount.to_be_bytes::<32>()]),
            fee_limit: Some(TRC20_FEE_LIMIT),
            call_value: 0,
            visible: false,
        };
        let response: TriggerResponse = self.post("triggersmartcontract", &trigger).await?;
        check_result(&response.result, TRANSFER)?;
        let unsigned = response
            .transaction
            .ok_or_else(|| ReconError::Chain(format!("{} returned no transaction", TRANSFER)))?;

        let signed = sign_transaction(unsigned, &signer)?;
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
        let transaction: Value = serde_json::from_str(&signed.raw)
            .map_err(|e| ReconError::PermanentData(format!("Stored transaction is not JSON: {}", e)))?;
        let response: ApiResult = self.post("broadcasttransaction", &transaction).await?;
        if response.code.as_deref() == Some(DUPLICATE) {
            debug!(network = %self.label, tx_hash = %signed.tx_hash, "Node already has the transaction");
            return Ok(());
        }
        check_result(&response, "broadcasttransaction")
    }

    async fn receipt(&self, tx_hash: &str) -> Result<ReceiptStatus> {
        let body = serde_json::json!({ "value": tx_hash.trim_start_matches("0x") });
        let info: TransactionInfo = self.post("gettransactioninfobyid", &body).await?;
        Ok(receipt_status(&info))
    }
}

/// Left-pad an address to one ABI word.
fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn encode_words(words: &[[u8; 32]]) -> String {
    words.iter().map(hex::encode).collect()
}

fn check_result(result: &ApiResult, method: &str) -> Result<()> {
    if result.result {
        return Ok(());
    }
    Err(ReconError::Chain(format!(
        "{} rejected: {} {}",
        method,
        result.code.as_deref().unwrap_or("UNKNOWN"),
        result.message.as_deref().map(decode_message).unwrap_or_default()
    )))
}

/// Node error messages arrive hex-encoded.
fn decode_message(message: &str) -> String {
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

/// The node-supplied id must be the sha256 of the raw transaction bytes.
fn verify_tx_id(tx_id: &str, raw_data_hex: &str) -> Result<B256> {
    let raw = hex::decode(raw_data_hex)
        .map_err(|e| ReconError::Chain(format!("raw_data_hex is not hex: {}", e)))?;
    let digest = B256::from_slice(&Sha256::digest(&raw));
    let claimed: B256 = tx_id
        .parse()
        .map_err(|_| ReconError::Chain(format!("Malformed txID {}", tx_id)))?;
    if digest != claimed {
        return Err(ReconError::Chain(format!(
            "txID {} does not match the transaction bytes",
            tx_id
        )));
    }
    Ok(digest)
}

/// 65-byte `r || s || recovery id` form TRON expects.
fn signature_bytes(signature: &Signature) -> [u8; 65] {
    let mut bytes = [0u8; 65];
    bytes[..32].copy_from_slice(&signature.r().to_be_bytes::<32>());
    bytes[32..64].copy_from_slice(&signature.s().to_be_bytes::<32>());
    bytes[64] = signature.v() as u8;
    bytes
}

fn sign_transaction(mut transaction: Value, signer: &PrivateKeySigner) -> Result<SignedTransfer> {
    let field = |name: &str| {
        transaction
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ReconError::Chain(format!("Transaction has no {}", name)))
    };
    let tx_id = field("txID")?;
    let digest = verify_tx_id(&tx_id, &field("raw_data_hex")?)?;

    let signature = signer
        .sign_hash_sync(&digest)
        .map_err(|e| ReconError::PermanentData(format!("Signing {} failed: {}", tx_id, e)))?;
    transaction
        .as_object_mut()
        .ok_or_else(|| ReconError::Chain("Transaction is not an object".to_string()))?
        .insert(
            "signature".to_string(),
            Value::Array(vec![Value::String(hex::encode(signature_bytes(&signature)))]),
        );

    Ok(SignedTransfer {
        tx_hash: tx_id,
        raw: transaction.to_string(),
    })
}

fn receipt_status(info: &TransactionInfo) -> ReceiptStatus {
    if info.id.is_none() {
        return ReceiptStatus::Pending;
    }
    match info.receipt.result.as_deref() {
        Some("SUCCESS") => ReceiptStatus::Confirmed,
        Some(_) => ReceiptStatus::Reverted,
        None if info.result.as_deref() == Some("FAILED") => ReceiptStatus::Reverted,
        None => ReceiptStatus::Confirmed,
    }
}
