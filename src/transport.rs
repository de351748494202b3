use crate::{
    calls::ContractCall,
    envelope::RawCallData,
    error::Result,
};
use alloy_primitives::{
    Address,
    TxHash,
    U256,
};
use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::Arc;

/// Transaction handed to the wallet. `data` is already enveloped.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl TransactionRequest {
    pub fn from_call(call: &ContractCall, from: Address) -> Result<Self> {
        Ok(Self {
            from,
            to: call.to,
            data: call.enveloped_data()?,
            value: call.value,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub to: Address,
    pub data: String,
}

impl ReadRequest {
    pub fn from_call(call: &ContractCall) -> Result<Self> {
        Ok(Self {
            to: call.to,
            data: call.enveloped_data()?,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(default)]
    pub data: Option<RawCallData>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReceiptStatus {
    Success,
    Failure,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
}

/// Wallet and chain access. Implementations never expose keys; signing is
/// the wallet's business.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Asks the wallet to authorise accounts, prompting if needed.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Accounts already authorised, without prompting.
    async fn accounts(&self) -> Result<Vec<Address>>;

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash>;

    /// Resolves once the transaction has been executed. No timeout.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt>;

    async fn call(&self, request: &ReadRequest) -> Result<CallResponse>;

    async fn get_balance(&self, address: Address) -> Result<U256>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        (**self).request_accounts().await
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        (**self).accounts().await
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash> {
        (**self).send_transaction(request).await
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt> {
        (**self).wait_for_receipt(tx_hash).await
    }

    async fn call(&self, request: &ReadRequest) -> Result<CallResponse> {
        (**self).call(request).await
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        (**self).get_balance(address).await
    }
}
