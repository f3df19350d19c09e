use crate::config::{RetryPolicy, WalletConfig};
use crate::errors::{ApiError, WalletError};
use crate::retry::retry;
use aster_primitives::{Address, TxId};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: u64,
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Signed transaction in `CreateTransaction` form. Amounts and gas travel as
/// decimal strings; `toAddr` is checksummed without the `0x` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxPayload {
    pub version: u32,
    pub nonce: u64,
    pub to_addr: String,
    pub amount: String,
    pub pub_key: String,
    pub gas_price: String,
    pub gas_limit: String,
    pub code: String,
    pub data: String,
    pub signature: String,
    pub priority: bool,
}

/// `CreateTransaction` result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmitResponse {
    #[serde(rename = "TranID")]
    pub tran_id: String,
    #[serde(rename = "Info", default)]
    pub info: String,
    #[serde(rename = "ContractAddress", default)]
    pub contract_address: Option<String>,
}

/// Coarse reading of a node status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Pending,
    Confirmed,
    Failed,
}

/// `GetTransactionStatus` result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeTxStatus {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "modificationState")]
    pub modification_state: u8,
    pub status: u16,
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "epochInserted", default)]
    pub epoch_inserted: Option<String>,
    #[serde(rename = "epochUpdated", default)]
    pub epoch_updated: Option<String>,
}

/// Modification state of a transaction the node has finished with
const MODIFICATION_FINAL: u8 = 2;
const STATUS_CONFIRMED: u16 = 3;

impl NodeTxStatus {
    pub fn outcome(&self) -> StatusOutcome {
        match (self.modification_state, self.status) {
            (MODIFICATION_FINAL, STATUS_CONFIRMED) => StatusOutcome::Confirmed,
            (MODIFICATION_FINAL, _) => StatusOutcome::Failed,
            _ => StatusOutcome::Pending,
        }
    }

    pub fn message(&self) -> &'static str {
        status_message(self.status)
    }
}

/// Human-readable text for a node status code
pub fn status_message(code: u16) -> &'static str {
    match code {
        0 => "Transaction not found",
        1 => "Pending - Dispatched",
        2 => "Pending - Soft-confirmed (awaiting Tx block generation)",
        3 => "Confirmed",
        4 => "Pending - Nonce is higher than expected",
        5 => "Pending - Microblock gas limit exceeded",
        6 => "Pending - Consensus failure in network",
        10 => "Rejected - Transaction caused math error",
        11 => "Rejected - Scilla invocation error",
        12 => "Rejected - Contract account initialization error",
        13 => "Rejected - Invalid source account",
        14 => "Rejected - Gas limit higher than shard gas limit",
        15 => "Rejected - Unknown transaction type",
        16 => "Rejected - Transaction sent to wrong shard",
        17 => "Rejected - Contract & source account cross-shard issue",
        18 => "Rejected - Code size exceeded limit",
        19 => "Rejected - Transaction verification failed",
        20 => "Rejected - Gas limit too low",
        21 => "Rejected - Insufficient balance",
        22 => "Rejected - Insufficient gas to invoke Scilla checker",
        23 => "Rejected - Duplicate transaction exists",
        24 => "Rejected - Transaction with same nonce but same/higher gas price exists",
        25 => "Rejected - Invalid destination address",
        26 => "Rejected - Failed to add contract account to state",
        27 => "Rejected - Nonce is lower than expected",
        255 => "Rejected - Internal error",
        _ => "Unknown status",
    }
}

/// Account balance and the nonce of its last accepted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceAndNonce {
    pub balance: u128,
    pub nonce: u64,
}

#[derive(Deserialize)]
struct RawBalance {
    balance: String,
    nonce: u64,
}

/// What the transaction lifecycle needs from a node
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Broadcast a signed transaction. Never retried.
    async fn submit(&self, payload: &TxPayload) -> Result<TxId, WalletError>;

    async fn get_status(&self, id: &TxId) -> Result<NodeTxStatus, WalletError>;

    /// `(0, 0)` for an account the node has never seen
    async fn get_balance_and_nonce(&self, address: &Address) -> Result<BalanceAndNonce, WalletError>;
}

/// HTTP JSON-RPC client for a single trusted node
pub struct RpcClient {
    url: String,
    client: Client,
    request_id: AtomicU64,
    retry: RetryPolicy,
}

impl RpcClient {
    /// Create new RPC client
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: Client::new(),
            request_id: AtomicU64::new(1),
            retry: RetryPolicy::default(),
        }
    }

    /// Client with the configured endpoint, timeout and retry policy
    pub fn from_config(config: &WalletConfig) -> Result<Self, WalletError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| WalletError::Network(e.to_string()))?;

        Ok(Self {
            url: config.rpc_url.clone(),
            client,
            request_id: AtomicU64::new(1),
            retry: config.retry.clone(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a single RPC call
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            id,
            jsonrpc: "2.0",
            method,
            params,
        };

        debug!("RPC {} #{}", method, id);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(WalletError::Network(format!("{} returned HTTP {}", method, status)));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ApiError::invalid_response(format!("{}: {}", method, e)))?;

        into_result(body)
    }

    /// RPC call for read-only methods, retried on transient failures
    pub async fn read_call(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        retry(&self.retry, method, WalletError::is_transient, || {
            self.call(method, params.clone())
        })
        .await
    }
}

#[async_trait]
impl NodeClient for RpcClient {
    async fn submit(&self, payload: &TxPayload) -> Result<TxId, WalletError> {
        let result = self.call("CreateTransaction", json!([payload])).await?;
        let response = parse_submit(result)?;
        debug!("CreateTransaction accepted {}: {}", response.tran_id, response.info);
        Ok(TxId::from_hex(&response.tran_id)
            .map_err(|e| ApiError::invalid_response(format!("TranID: {}", e)))?)
    }

    async fn get_status(&self, id: &TxId) -> Result<NodeTxStatus, WalletError> {
        let result = self
            .read_call("GetTransactionStatus", json!([id.to_hex()]))
            .await?;
        parse_value(result, "GetTransactionStatus")
    }

    async fn get_balance_and_nonce(&self, address: &Address) -> Result<BalanceAndNonce, WalletError> {
        match self.read_call("GetBalance", json!([address.to_hex()])).await {
            Ok(result) => parse_balance(result),
            Err(e) if e.is_not_found() => Ok(BalanceAndNonce::default()),
            Err(e) => Err(e),
        }
    }
}

/// Normalize a response envelope into its result or an `ApiError`
fn into_result(response: RpcResponse) -> Result<Value, WalletError> {
    if let Some(error) = response.error {
        return Err(ApiError::from_envelope(error.code, error.message, error.data).into());
    }

    match response.result {
        Some(Value::Null) | None => Err(ApiError::invalid_response("response has no result").into()),
        Some(result) => Ok(result),
    }
}

fn parse_value<T: serde::de::DeserializeOwned>(value: Value, method: &str) -> Result<T, WalletError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::invalid_response(format!("{}: {}", method, e)).into())
}

fn parse_submit(value: Value) -> Result<SubmitResponse, WalletError> {
    parse_value(value, "CreateTransaction")
}

fn parse_balance(value: Value) -> Result<BalanceAndNonce, WalletError> {
    let raw: RawBalance = parse_value(value, "GetBalance")?;
    let balance = raw
        .balance
        .parse::<u128>()
        .map_err(|e| ApiError::invalid_response(format!("GetBalance balance: {}", e)))?;

    Ok(BalanceAndNonce {
        balance,
        nonce: raw.nonce,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiErrorKind;

    fn envelope(json: &str) -> Result<Value, WalletError> {
        into_result(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_envelope_result() {
        let value = envelope(r#"{"id":1,"jsonrpc":"2.0","result":{"balance":"10","nonce":2}}"#).unwrap();
        assert_eq!(
            parse_balance(value).unwrap(),
            BalanceAndNonce { balance: 10, nonce: 2 }
        );
    }

    #[test]
    fn test_envelope_errors() {
        let err = envelope(r#"{"id":1,"jsonrpc":"2.0","error":{"code":-5,"message":"Account is not created"}}"#)
            .unwrap_err();
        assert!(err.is_not_found());

        let err = envelope(
            r#"{"id":1,"jsonrpc":"2.0","error":{"code":-8,"message":"Nonce is lower than expected","data":null}}"#,
        )
        .unwrap_err();
        assert!(err.is_nonce_conflict());

        let err = envelope(r#"{"id":1,"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params"}}"#)
            .unwrap_err();
        assert_eq!(err.api_kind(), Some(ApiErrorKind::Rejected));

        let err = envelope(r#"{"id":1,"jsonrpc":"2.0"}"#).unwrap_err();
        assert_eq!(err.api_kind(), Some(ApiErrorKind::InvalidResponse));

        let err = envelope(r#"{"id":1,"jsonrpc":"2.0","result":null}"#).unwrap_err();
        assert_eq!(err.api_kind(), Some(ApiErrorKind::InvalidResponse));
    }

    #[test]
    fn test_malformed_results() {
        let err = parse_balance(json!({"balance": "lots", "nonce": 1})).unwrap_err();
        assert_eq!(err.api_kind(), Some(ApiErrorKind::InvalidResponse));

        let err = parse_value::<NodeTxStatus>(json!("pending"), "GetTransactionStatus").unwrap_err();
        assert_eq!(err.api_kind(), Some(ApiErrorKind::InvalidResponse));
    }

    #[test]
    fn test_status_outcomes() {
        let status = |modification_state, status| NodeTxStatus {
            id: String::new(),
            modification_state,
            status,
            success: false,
            epoch_inserted: None,
            epoch_updated: None,
        };

        assert_eq!(status(2, 3).outcome(), StatusOutcome::Confirmed);
        assert_eq!(status(2, 27).outcome(), StatusOutcome::Failed);
        assert_eq!(status(1, 2).outcome(), StatusOutcome::Pending);
        assert_eq!(status(0, 1).outcome(), StatusOutcome::Pending);
        assert_eq!(status(2, 27).message(), "Rejected - Nonce is lower than expected");
    }

    #[test]
    fn test_node_status_json() {
        let parsed: NodeTxStatus = serde_json::from_value(json!({
            "ID": "b7a1",
            "modificationState": 2,
            "status": 3,
            "success": true,
            "epochInserted": "1013",
            "epochUpdated": "1013",
            "amount": "0"
        }))
        .unwrap();
        assert_eq!(parsed.outcome(), StatusOutcome::Confirmed);
        assert_eq!(parsed.epoch_updated.as_deref(), Some("1013"));
    }

    #[test]
    fn test_payload_wire_names() {
        let payload = TxPayload {
            version: 65_537,
            nonce: 1,
            to_addr: "29FB201154c9D44371612639472a45E2aAa1735C".into(),
            amount: "1000".into(),
            pub_key: "03".into(),
            gas_price: "2000000000".into(),
            gas_limit: "50".into(),
            code: String::new(),
            data: String::new(),
            signature: "00".into(),
            priority: false,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["toAddr"], "29FB201154c9D44371612639472a45E2aAa1735C");
        assert_eq!(value["pubKey"], "03");
        assert_eq!(value["gasPrice"], "2000000000");
        assert_eq!(value["gasLimit"], "50");

        let response: SubmitResponse = serde_json::from_value(json!({
            "Info": "Contract Creation txn, sent to shard",
            "TranID": "2d1eea871d8845472e98dbe9b7a7d788fbcce226f52e4216612592167b89042c",
            "ContractAddress": "a1b5df19ba354046396e29feac5cd92eb35bef60"
        }))
        .unwrap();
        assert_eq!(response.contract_address.as_deref(), Some("a1b5df19ba354046396e29feac5cd92eb35bef60"));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_network_error() {
        let client = RpcClient::new("http://127.0.0.1:1").with_retry(RetryPolicy::none());
        let err = client.call("GetBalance", json!(["00"])).await.unwrap_err();
        assert!(err.is_transient());
    }
}
