pub mod config;
pub mod errors;
pub mod keystore;
pub mod retry;
pub mod rpc_client;
pub mod transaction;
pub mod wallet;

pub use config::{pack_version, ConfirmConfig, RetryPolicy, WalletConfig};
pub use errors::{ApiError, ApiErrorKind, WalletError};
pub use keystore::{Kdf, KdfKind, KeystoreFile};
pub use rpc_client::{BalanceAndNonce, NodeClient, NodeTxStatus, RpcClient, StatusOutcome, TxPayload};
pub use transaction::{
    batch_confirm, batch_confirm_until, Transaction, TransactionBuilder, TxReceipt, TxStatus,
};
pub use wallet::{Account, Wallet};

pub use aster_primitives as primitives;
