use aster_primitives::{CryptoError, EncodingError, TxId};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Account not found: {0}")]
    UnknownAccount(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("KDF error: {0}")]
    Kdf(String),

    #[error("API error: {0}")]
    Api(ApiError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction {id} still pending after {attempts} polls")]
    Timeout { id: TxId, attempts: u32 },

    #[error("Confirmation cancelled")]
    Cancelled,

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WalletError {
    /// Failures worth retrying for read-only calls
    pub fn is_transient(&self) -> bool {
        matches!(self, WalletError::Network(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WalletError::Api(e) if e.kind == ApiErrorKind::NotFound)
    }

    pub fn is_nonce_conflict(&self) -> bool {
        matches!(self, WalletError::Api(e) if e.kind == ApiErrorKind::NonceConflict)
    }

    /// Classification of an API error, if this is one
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            WalletError::Api(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl From<ApiError> for WalletError {
    fn from(e: ApiError) -> Self {
        WalletError::Api(e)
    }
}

impl From<EncodingError> for WalletError {
    fn from(e: EncodingError) -> Self {
        WalletError::Format(e.to_string())
    }
}

impl From<CryptoError> for WalletError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Encoding(inner) => inner.into(),
            CryptoError::InvalidNonce(n) => {
                WalletError::InvalidTransaction(format!("nonce {} cannot deploy a contract", n))
            }
            other => WalletError::Key(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The node refused the request
    Rejected,
    /// The transaction nonce has already been used or is out of order
    NonceConflict,
    /// Unknown transaction or account
    NotFound,
    /// Malformed or missing result
    InvalidResponse,
}

/// Error envelope returned by the node
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// Node code for an unknown account or transaction
pub const CODE_NOT_FOUND: i64 = -5;

impl ApiError {
    /// Classify a JSON-RPC error envelope
    pub fn from_envelope(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        let message = message.into();
        let kind = if code == CODE_NOT_FOUND {
            ApiErrorKind::NotFound
        } else if message.to_ascii_lowercase().contains("nonce") {
            ApiErrorKind::NonceConflict
        } else {
            ApiErrorKind::Rejected
        };

        Self {
            kind,
            code,
            message,
            data,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::InvalidResponse,
            code: 0,
            message: message.into(),
            data: None,
        }
    }

    pub fn nonce_conflict(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::NonceConflict,
            code: 0,
            message: message.into(),
            data: None,
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.kind, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_classification() {
        let e = ApiError::from_envelope(-5, "Account is not created", None);
        assert_eq!(e.kind(), ApiErrorKind::NotFound);

        let e = ApiError::from_envelope(-8, "Nonce (3) lower than current (5)", None);
        assert_eq!(e.kind(), ApiErrorKind::NonceConflict);

        let e = ApiError::from_envelope(-8, "Invalid signature", None);
        assert_eq!(e.kind(), ApiErrorKind::Rejected);
    }

    #[test]
    fn test_crypto_errors_map_to_taxonomy() {
        let format: WalletError = CryptoError::Encoding(EncodingError::InvalidHex("zz".into())).into();
        assert!(matches!(format, WalletError::Format(_)));

        let key: WalletError = CryptoError::InvalidPrivateKey("zero scalar".into()).into();
        assert!(matches!(key, WalletError::Key(_)));

        let nonce: WalletError = CryptoError::InvalidNonce(0).into();
        assert!(matches!(nonce, WalletError::InvalidTransaction(_)));
    }

    #[test]
    fn test_predicates() {
        assert!(WalletError::Network("reset".into()).is_transient());
        assert!(!WalletError::Cancelled.is_transient());

        let conflict: WalletError = ApiError::nonce_conflict("stale").into();
        assert!(conflict.is_nonce_conflict());
        assert_eq!(conflict.api_kind(), Some(ApiErrorKind::NonceConflict));
        assert!(!conflict.is_not_found());
    }
}
