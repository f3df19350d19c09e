use crate::config::{pack_version, WalletConfig};
use crate::errors::{ApiError, WalletError};
use crate::rpc_client::{NodeClient, NodeTxStatus, StatusOutcome, TxPayload};
use futures::future::join_all;
use aster_primitives::{derive_contract_address, Address, PublicKey, Signature, TxId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Created,
    Signed,
    /// Accepted by the node. `submit` moves on to `Pending` before it
    /// returns, so a transaction is never observed in this state.
    Submitted,
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed)
    }
}

/// Outcome recorded once a transaction reaches Confirmed or Failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub success: bool,
    /// Node status code when the transaction was rejected
    pub error_code: Option<u16>,
    pub status_code: u16,
    pub status_message: String,
    pub epoch_inserted: Option<String>,
    pub epoch_updated: Option<String>,
}

impl TxReceipt {
    fn from_node(status: &NodeTxStatus, confirmed: bool) -> Self {
        Self {
            success: confirmed,
            error_code: (!confirmed).then_some(status.status),
            status_code: status.status,
            status_message: status.message().to_string(),
            epoch_inserted: status.epoch_inserted.clone(),
            epoch_updated: status.epoch_updated.clone(),
        }
    }
}

/// A transfer, contract call or contract deployment
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    version: u32,
    nonce: u64,
    amount: u128,
    gas_price: u128,
    gas_limit: u64,
    sender_pub_key: PublicKey,
    to_addr: Address,
    code: String,
    data: String,
    priority: bool,
    signature: Option<Signature>,
    id: Option<TxId>,
    receipt: Option<TxReceipt>,
    status: TxStatus,
}

impl Transaction {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn amount(&self) -> u128 {
        self.amount
    }

    pub fn gas_price(&self) -> u128 {
        self.gas_price
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn sender_pub_key(&self) -> &PublicKey {
        &self.sender_pub_key
    }

    pub fn sender_address(&self) -> Address {
        self.sender_pub_key.address()
    }

    pub fn to_addr(&self) -> &Address {
        &self.to_addr
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn priority(&self) -> bool {
        self.priority
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn id(&self) -> Option<&TxId> {
        self.id.as_ref()
    }

    pub fn receipt(&self) -> Option<&TxReceipt> {
        self.receipt.as_ref()
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Contract deployments carry code and target the zero address
    pub fn is_deploy(&self) -> bool {
        self.to_addr.is_zero() && !self.code.is_empty()
    }

    /// Address the contract will live at once this deployment lands
    pub fn contract_address(&self) -> Result<Address, WalletError> {
        if !self.is_deploy() {
            return Err(WalletError::InvalidTransaction(
                "only deployments create a contract".into(),
            ));
        }
        Ok(derive_contract_address(&self.sender_address(), self.nonce)?)
    }

    /// Big-endian encoding of every signed field
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + 8 + 20 + 33 + 16 + 16 + 8 + 8 + self.code.len() + self.data.len());

        data.extend_from_slice(&self.version.to_be_bytes());
        data.extend_from_slice(&self.nonce.to_be_bytes());
        data.extend_from_slice(self.to_addr.as_bytes());
        data.extend_from_slice(self.sender_pub_key.as_bytes());
        data.extend_from_slice(&self.amount.to_be_bytes());
        data.extend_from_slice(&self.gas_price.to_be_bytes());
        data.extend_from_slice(&self.gas_limit.to_be_bytes());

        // Variable-length fields, u32 length prefixed
        data.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        data.extend_from_slice(self.code.as_bytes());
        data.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        data.extend_from_slice(self.data.as_bytes());

        data
    }

    /// SHA-256 of the canonical bytes; the message that gets signed
    pub fn signing_digest(&self) -> [u8; 32] {
        Sha256::digest(self.canonical_bytes()).into()
    }

    pub(crate) fn check_signable(&self) -> Result<(), WalletError> {
        if self.id.is_some() {
            return Err(WalletError::InvalidState(
                "transaction was already submitted".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn attach_signature(&mut self, signature: Signature) {
        self.signature = Some(signature);
        self.status = TxStatus::Signed;
    }

    /// `CreateTransaction` parameters for this signed transaction
    pub fn to_payload(&self) -> Result<TxPayload, WalletError> {
        let signature = self
            .signature
            .ok_or_else(|| WalletError::InvalidState("transaction is not signed".into()))?;

        Ok(TxPayload {
            version: self.version,
            nonce: self.nonce,
            to_addr: self.to_addr.to_checksum()[2..].to_string(),
            amount: self.amount.to_string(),
            pub_key: self.sender_pub_key.to_hex(),
            gas_price: self.gas_price.to_string(),
            gas_limit: self.gas_limit.to_string(),
            code: self.code.clone(),
            data: self.data.clone(),
            signature: signature.to_hex(),
            priority: self.priority,
        })
    }

    /// Broadcast once. A rejection leaves the transaction Signed; use
    /// [`Transaction::resubmit`] to try again.
    pub async fn submit(&mut self, client: &dyn NodeClient) -> Result<TxId, WalletError> {
        if self.status != TxStatus::Signed || self.id.is_some() {
            return Err(WalletError::InvalidState(format!(
                "cannot submit a {:?} transaction",
                self.status
            )));
        }

        let payload = self.to_payload()?;
        let id = match client.submit(&payload).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Submission of nonce {} from {} failed: {}", self.nonce, self.sender_address(), e);
                return Err(e);
            }
        };

        info!("Submitted transaction {} (nonce {})", id, self.nonce);
        self.id = Some(id);
        // Submitted moves straight on to Pending
        self.status = TxStatus::Pending;
        Ok(id)
    }

    /// Submit without risking a duplicate: a transaction the node already
    /// knows is not resent, and a nonce the account has already used fails
    /// with a nonce conflict.
    pub async fn resubmit(&mut self, client: &dyn NodeClient) -> Result<TxId, WalletError> {
        if self.signature.is_none() {
            return Err(WalletError::InvalidState("transaction is not signed".into()));
        }

        if let Some(id) = self.id {
            match client.get_status(&id).await {
                Ok(_) => {
                    debug!("Transaction {} already known to the node", id);
                    return Ok(id);
                }
                Err(e) if e.is_not_found() => {
                    debug!("Transaction {} unknown to the node, checking nonce", id);
                }
                Err(e) => return Err(e),
            }
        }

        let account = client.get_balance_and_nonce(&self.sender_address()).await?;
        if account.nonce >= self.nonce {
            return Err(ApiError::nonce_conflict(format!(
                "account nonce {} has reached transaction nonce {}",
                account.nonce, self.nonce
            ))
            .into());
        }

        self.id = None;
        self.receipt = None;
        self.status = TxStatus::Signed;
        self.submit(client).await
    }

    /// Poll until the transaction reaches a terminal state
    pub async fn confirm(
        &mut self,
        client: &dyn NodeClient,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<TxStatus, WalletError> {
        self.confirm_until(client, max_attempts, interval, &CancellationToken::new())
            .await
    }

    /// Poll until terminal, timeout, or cancellation. The first poll is
    /// immediate and polls are `interval` apart. Timeout and cancellation
    /// leave the transaction Pending.
    pub async fn confirm_until(
        &mut self,
        client: &dyn NodeClient,
        max_attempts: u32,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<TxStatus, WalletError> {
        let id = self.require_id()?;
        if self.status.is_terminal() {
            return Ok(self.status);
        }

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WalletError::Cancelled),
                    _ = sleep(interval) => {}
                }
            }

            debug!("Polling {} (attempt {}/{})", id, attempt, max_attempts);
            if let Some(status) = self.poll_once(client, cancel).await? {
                return Ok(status);
            }
        }

        warn!("Transaction {} still pending after {} polls", id, max_attempts);
        Err(WalletError::Timeout {
            id,
            attempts: max_attempts,
        })
    }

    fn require_id(&self) -> Result<TxId, WalletError> {
        self.id
            .ok_or_else(|| WalletError::InvalidState("transaction has not been submitted".into()))
    }

    /// One status query. `Some` once terminal; node silence counts as pending.
    async fn poll_once(
        &mut self,
        client: &dyn NodeClient,
        cancel: &CancellationToken,
    ) -> Result<Option<TxStatus>, WalletError> {
        let id = self.require_id()?;

        let report = tokio::select! {
            _ = cancel.cancelled() => return Err(WalletError::Cancelled),
            report = client.get_status(&id) => report,
        };

        match report {
            Ok(node) => Ok(self.apply_node_status(&id, &node)),
            Err(e) if e.is_not_found() || e.is_transient() => {
                debug!("No activity for {}: {}", id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn apply_node_status(&mut self, id: &TxId, node: &NodeTxStatus) -> Option<TxStatus> {
        let status = match node.outcome() {
            StatusOutcome::Pending => {
                self.status = TxStatus::Pending;
                return None;
            }
            StatusOutcome::Confirmed => TxStatus::Confirmed,
            StatusOutcome::Failed => TxStatus::Failed,
        };

        if self.receipt.is_none() {
            self.receipt = Some(TxReceipt::from_node(node, status == TxStatus::Confirmed));
        }
        self.status = status;

        match status {
            TxStatus::Confirmed => info!("Transaction {} confirmed", id),
            _ => warn!("Transaction {} failed: {}", id, node.message()),
        }
        Some(status)
    }
}

/// Confirm many transactions at once. Each transaction polls on its own
/// schedule, so a slow or silent one never delays the others.
pub async fn batch_confirm(
    txs: &mut [Transaction],
    client: &dyn NodeClient,
    max_attempts: u32,
    interval: Duration,
) -> Vec<Result<TxStatus, WalletError>> {
    batch_confirm_until(txs, client, max_attempts, interval, &CancellationToken::new()).await
}

/// [`batch_confirm`] with cancellation. One result per transaction, in order;
/// transactions still unresolved when `cancel` fires report `Cancelled`.
pub async fn batch_confirm_until(
    txs: &mut [Transaction],
    client: &dyn NodeClient,
    max_attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Vec<Result<TxStatus, WalletError>> {
    debug!("Confirming {} transactions", txs.len());

    let polls = txs
        .iter_mut()
        .map(|tx| tx.confirm_until(client, max_attempts, interval, cancel));
    join_all(polls).await
}

/// Validating builder for [`Transaction`]
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    version: Option<u32>,
    nonce: Option<u64>,
    amount: u128,
    gas_price: Option<u128>,
    gas_limit: Option<u64>,
    sender_pub_key: Option<PublicKey>,
    to_addr: Option<Address>,
    code: String,
    data: String,
    priority: bool,
}

impl TransactionBuilder {
    /// Create new transaction builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded with the configured version and gas defaults
    pub fn from_config(config: &WalletConfig) -> Self {
        Self {
            version: Some(config.version()),
            gas_price: Some(config.default_gas_price),
            gas_limit: Some(config.default_gas_limit),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Version from its chain and message parts
    pub fn chain(mut self, chain_id: u16, msg_version: u16) -> Self {
        self.version = Some(pack_version(chain_id, msg_version));
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn amount(mut self, amount: u128) -> Self {
        self.amount = amount;
        self
    }

    pub fn gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn sender(mut self, sender_pub_key: PublicKey) -> Self {
        self.sender_pub_key = Some(sender_pub_key);
        self
    }

    pub fn to(mut self, to_addr: Address) -> Self {
        self.to_addr = Some(to_addr);
        self
    }

    /// Contract deployment: sets the code and targets the zero address
    pub fn deploy(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self.to_addr = Some(Address::zero());
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn build(self) -> Result<Transaction, WalletError> {
        let missing = |field: &str| WalletError::InvalidTransaction(format!("{} not set", field));

        let sender_pub_key = self.sender_pub_key.ok_or_else(|| missing("sender"))?;
        let to_addr = self.to_addr.ok_or_else(|| missing("recipient"))?;
        let version = self.version.ok_or_else(|| missing("version"))?;
        let gas_price = self.gas_price.ok_or_else(|| missing("gas price"))?;
        let gas_limit = self.gas_limit.ok_or_else(|| missing("gas limit"))?;
        let nonce = self.nonce.ok_or_else(|| missing("nonce"))?;

        if nonce == 0 {
            return Err(WalletError::InvalidTransaction("nonce starts at 1".into()));
        }
        if gas_limit == 0 {
            return Err(WalletError::InvalidTransaction("gas limit must be positive".into()));
        }
        if to_addr.is_zero() && self.code.is_empty() {
            return Err(WalletError::InvalidTransaction(
                "zero recipient is only valid for deployments".into(),
            ));
        }

        Ok(Transaction {
            version,
            nonce,
            amount: self.amount,
            gas_price,
            gas_limit,
            sender_pub_key,
            to_addr,
            code: self.code,
            data: self.data,
            priority: self.priority,
            signature: None,
            id: None,
            receipt: None,
            status: TxStatus::Created,
        })
    }
}
