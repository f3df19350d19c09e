//! Text encodings for addresses and key material.
//!
//! Hex accepts an optional `0x` prefix on the way in and never emits one on
//! the way out. Base-58 uses the Bitcoin alphabet, which leaves out `0`, `O`,
//! `I` and `l`. Bech32 is the BIP-173 checksummed form with a human-readable
//! prefix.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid base58: {0}")]
    InvalidBase58(String),

    #[error("Invalid bech32: {0}")]
    InvalidBech32(String),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
}

/// Strip an optional `0x` / `0X` prefix
pub fn strip_0x(input: &str) -> &str {
    input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input)
}

pub mod hex {
    use super::{strip_0x, EncodingError};

    /// Lowercase hex, no prefix
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        ::hex::encode(bytes)
    }

    /// Decode hex text, with or without a `0x` prefix
    pub fn decode(text: &str) -> Result<Vec<u8>, EncodingError> {
        ::hex::decode(strip_0x(text)).map_err(|e| EncodingError::InvalidHex(e.to_string()))
    }

    /// Decode hex text into a fixed-width array
    pub fn decode_fixed<const N: usize>(text: &str) -> Result<[u8; N], EncodingError> {
        let bytes = decode(text)?;
        if bytes.len() != N {
            return Err(EncodingError::InvalidLength {
                expected: N,
                actual: bytes.len(),
            });
        }

        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

pub mod base58 {
    use super::{hex, EncodingError};

    /// Encode bytes; every leading zero byte becomes one leading `1`
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bs58::encode(bytes).into_string()
    }

    /// Encode the bytes behind a hex string (optional `0x` prefix)
    pub fn encode_hex(text: &str) -> Result<String, EncodingError> {
        Ok(encode(hex::decode(text)?))
    }

    /// Exact inverse of [`encode`]
    pub fn decode(text: &str) -> Result<Vec<u8>, EncodingError> {
        bs58::decode(text)
            .into_vec()
            .map_err(|e| EncodingError::InvalidBase58(e.to_string()))
    }

    pub fn is_valid(text: &str) -> bool {
        decode(text).is_ok()
    }
}

pub mod bech32 {
    use super::EncodingError;
    use ::bech32::primitives::decode::CheckedHrpstring;
    use ::bech32::{Bech32, Hrp};

    /// Lowercase bech32 of `bytes` under prefix `hrp`
    pub fn encode(hrp: &str, bytes: &[u8]) -> Result<String, EncodingError> {
        let hrp = Hrp::parse(hrp).map_err(|e| EncodingError::InvalidBech32(e.to_string()))?;
        ::bech32::encode::<Bech32>(hrp, bytes).map_err(|e| EncodingError::InvalidBech32(e.to_string()))
    }

    /// Decode bech32 text, requiring the prefix `hrp`. Either case is
    /// accepted, mixed case is not.
    pub fn decode(hrp: &str, text: &str) -> Result<Vec<u8>, EncodingError> {
        let checked = CheckedHrpstring::new::<Bech32>(text)
            .map_err(|e| EncodingError::InvalidBech32(e.to_string()))?;
        if !checked.hrp().as_str().eq_ignore_ascii_case(hrp) {
            return Err(EncodingError::InvalidBech32(format!(
                "expected prefix {}, got {}",
                hrp,
                checked.hrp()
            )));
        }
        Ok(checked.byte_iter().collect())
    }
}
