use crate::{
    envelope::RawCallData,
    error::{
        GameError,
        Result,
    },
    transport::{
        CallResponse,
        ReadRequest,
        ReceiptStatus,
        TransactionReceipt,
        TransactionRequest,
        Transport,
    },
};
use alloy_primitives::{
    Address,
    TxHash,
    U256,
};
use async_trait::async_trait;
use serde::{
    Deserialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};
use std::{
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Duration,
};
use tokio::time;
use tracing::debug;

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// [`Transport`] over HTTP JSON-RPC against a wallet-enabled node.
#[derive(Debug)]
pub struct JsonRpcTransport {
    url: String,
    http: reqwest::Client,
    receipt_poll_interval: Duration,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptDto {
    transaction_hash: TxHash,
    status: Option<String>,
}

impl JsonRpcTransport {
    pub fn new(url: impl Into<String>, receipt_poll_interval: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| GameError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            receipt_poll_interval,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let chain_id: Option<U256> = self.rpc_call("eth_chainId", json!([])).await?;
        let chain_id = required("eth_chainId", chain_id)?;
        u64::try_from(chain_id)
            .map_err(|_| GameError::decode(format!("eth_chainId: {chain_id} does not fit in u64")))
    }

    async fn rpc_call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<R>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        debug!(%method, id, "sending rpc request");
        let res = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GameError::transport(format!("{method} request failed: {e}")))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| GameError::transport(format!("{method} response unreadable: {e}")))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(GameError::transport(format!(
                "{method} returned HTTP {status}: {body}"
            )));
        }
        parse_rpc_response(method, &bytes)
    }
}

fn parse_rpc_response<R: DeserializeOwned>(method: &str, bytes: &[u8]) -> Result<Option<R>> {
    let response: RpcResponse<R> = serde_json::from_slice(bytes)
        .map_err(|e| GameError::decode(format!("{method} response: {e}")))?;
    if let Some(err) = response.error {
        return Err(GameError::transport(format!(
            "{method} failed ({}): {}",
            err.code, err.message
        )));
    }
    Ok(response.result)
}

fn required<R>(method: &str, result: Option<R>) -> Result<R> {
    result.ok_or_else(|| GameError::decode(format!("{method} response without result")))
}

fn receipt_status(status: Option<&str>) -> ReceiptStatus {
    match status {
        Some("0x1") | Some("0x01") => ReceiptStatus::Success,
        _ => ReceiptStatus::Failure,
    }
}

#[async_trait]
impl Transport for JsonRpcTransport {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let accounts = self.rpc_call("eth_requestAccounts", json!([])).await?;
        required("eth_requestAccounts", accounts)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        let accounts = self.rpc_call("eth_accounts", json!([])).await?;
        Ok(accounts.unwrap_or_default())
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash> {
        let hash = self
            .rpc_call("eth_sendTransaction", json!([request]))
            .await?;
        required("eth_sendTransaction", hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt> {
        loop {
            let receipt: Option<ReceiptDto> = self
                .rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if let Some(receipt) = receipt {
                return Ok(TransactionReceipt {
                    tx_hash: receipt.transaction_hash,
                    status: receipt_status(receipt.status.as_deref()),
                });
            }
            debug!(%tx_hash, "receipt not available yet");
            time::sleep(self.receipt_poll_interval).await;
        }
    }

    async fn call(&self, request: &ReadRequest) -> Result<CallResponse> {
        let data: Option<RawCallData> = self
            .rpc_call("eth_call", json!([request, "latest"]))
            .await?;
        Ok(CallResponse { data })
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        let balance = self
            .rpc_call("eth_getBalance", json!([address, "latest"]))
            .await?;
        required("eth_getBalance", balance)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn parse_rpc_response__numeric_array_call_result() {
        // given
        let body = br#"{"jsonrpc":"2.0","id":1,"result":[0,0,7]}"#;

        // when
        let parsed: Option<RawCallData> = parse_rpc_response("eth_call", body).unwrap();

        // then
        assert_eq!(parsed, Some(RawCallData::ByteArray(vec![0, 0, 7])));
    }

    #[test]
    fn parse_rpc_response__null_result_is_none() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let parsed: Option<ReceiptDto> =
            parse_rpc_response("eth_getTransactionReceipt", body).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_rpc_response__error_object_is_transport_error() {
        // given
        let body =
            br#"{"jsonrpc":"2.0","id":1,"error":{"code":4001,"message":"User rejected the request."}}"#;

        // when
        let err = parse_rpc_response::<TxHash>("eth_sendTransaction", body).unwrap_err();

        // then
        match err {
            GameError::Transport(msg) => assert!(msg.contains("User rejected")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_rpc_response__malformed_body_is_decode_error() {
        let err = parse_rpc_response::<U256>("eth_getBalance", b"<html>").unwrap_err();
        assert!(matches!(err, GameError::Decode(_)));
    }

    #[test]
    fn parse_rpc_response__hex_quantity_balance() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":"0xde0b6b3a7640000"}"#;
        let balance: Option<U256> = parse_rpc_response("eth_getBalance", body).unwrap();
        assert_eq!(balance, Some(U256::from(1_000_000_000_000_000_000u128)));
    }

    #[test]
    fn receipt_dto__maps_status_codes() {
        // given
        let hash = "0x".to_string() + &"ab".repeat(32);
        let ok = json!({"transactionHash": hash, "status": "0x1"});
        let failed = json!({"transactionHash": hash, "status": "0x0"});

        // when
        let ok: ReceiptDto = serde_json::from_value(ok).unwrap();
        let failed: ReceiptDto = serde_json::from_value(failed).unwrap();

        // then
        assert_eq!(receipt_status(ok.status.as_deref()), ReceiptStatus::Success);
        assert_eq!(
            receipt_status(failed.status.as_deref()),
            ReceiptStatus::Failure
        );
        assert_eq!(ok.transaction_hash, TxHash::repeat_byte(0xab));
    }

    #[test]
    fn transaction_request__serializes_wallet_shape() {
        // given
        let request = TransactionRequest {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            data: "0x0400".to_string(),
            value: Some(U256::from(16)),
        };

        // when
        let value = serde_json::to_value(&request).unwrap();

        // then
        assert_eq!(value["data"], "0x0400");
        assert_eq!(value["value"], "0x10");
        let without_value = TransactionRequest {
            value: None,
            ..request
        };
        let value = serde_json::to_value(&without_value).unwrap();
        assert!(value.get("value").is_none());
    }
}
