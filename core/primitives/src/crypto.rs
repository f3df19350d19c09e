use crate::encoding::{hex, EncodingError};
use crate::types::{Address, PublicKey, Signature, PUBLIC_KEY_LEN};
use hmac::{Hmac, Mac};
use k256::{
    elliptic_curve::{ops::Reduce, sec1::ToEncodedPoint, PrimeField},
    FieldBytes, ProjectivePoint, Scalar, SecretKey, U256,
};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid nonce: {0}")]
    InvalidNonce(u64),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Source of secret randomness for key, salt and IV generation
pub trait EntropySource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// Operating-system randomness
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Reproducible ChaCha20 stream, for tests and fixtures only
pub struct SeededEntropy {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededEntropy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl EntropySource for SeededEntropy {
    fn fill_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().fill_bytes(dest);
    }
}

/// 32-byte secp256k1 secret scalar. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Accepts any value in `[1, n-1]`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidPrivateKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        let key = PrivateKey(key);
        key.scalar()?;
        Ok(key)
    }

    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(text)?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        public_key_from_private(self)
    }

    fn scalar(&self) -> Result<Scalar, CryptoError> {
        let repr = *FieldBytes::from_slice(&self.0);
        let scalar: Option<Scalar> = Scalar::from_repr(repr).into();
        match scalar {
            Some(s) if !bool::from(s.is_zero()) => Ok(s),
            Some(_) => Err(CryptoError::InvalidPrivateKey("zero scalar".into())),
            None => Err(CryptoError::InvalidPrivateKey("not below curve order".into())),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Draw a fresh key pair, redrawing candidates outside `[1, n-1]`
pub fn generate_key_pair(entropy: &dyn EntropySource) -> (PrivateKey, PublicKey) {
    loop {
        let mut candidate = [0u8; 32];
        entropy.fill_bytes(&mut candidate);
        let key = PrivateKey::from_bytes(&candidate);
        candidate.zeroize();

        if let Ok(key) = key {
            if let Ok(public_key) = public_key_from_private(&key) {
                return (key, public_key);
            }
        }
    }
}

/// Compressed public key for a private key
pub fn public_key_from_private(private_key: &PrivateKey) -> Result<PublicKey, CryptoError> {
    let secret = SecretKey::from_slice(private_key.as_bytes())
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
    let encoded = secret.public_key().to_encoded_point(true);

    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(encoded.as_bytes());
    Ok(PublicKey::new(out))
}

pub fn derive_address(public_key: &PublicKey) -> Address {
    Address::from_public_key(public_key)
}

/// Schnorr signature over secp256k1.
///
/// `r = H(Q || P || m) mod n` with `Q = k·G`, and `s = k - r·x mod n`. The
/// nonce `k` comes from HMAC-SHA256 keyed by the private key over
/// `P || m || counter`, so the same key and message always give the same
/// signature.
pub fn sign(private_key: &PrivateKey, message: &[u8]) -> Result<Signature, CryptoError> {
    let x = private_key.scalar()?;
    let public_key = public_key_from_private(private_key)?;

    for counter in 0u32.. {
        let Some(k) = nonce_candidate(private_key, &public_key, message, counter)? else {
            continue;
        };

        let q = ProjectivePoint::GENERATOR * k;
        let r = challenge(&q, &public_key, message)?;
        if bool::from(r.is_zero()) {
            continue;
        }

        let s = k - r * x;
        if bool::from(s.is_zero()) {
            continue;
        }

        return Ok(Signature::from_parts(&scalar_bytes(&r), &scalar_bytes(&s)));
    }

    Err(CryptoError::InvalidSignature)
}

/// Check a Schnorr signature. Malformed keys or signatures verify as false.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    verify_inner(public_key, message, signature).unwrap_or(false)
}

fn verify_inner(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<bool, CryptoError> {
    let r = nonzero_scalar(signature.r())?;
    let s = nonzero_scalar(signature.s())?;

    let point = k256::PublicKey::from_sec1_bytes(public_key.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?
        .to_projective();

    let q = point * r + ProjectivePoint::GENERATOR * s;
    if q == ProjectivePoint::IDENTITY {
        return Ok(false);
    }

    Ok(challenge(&q, public_key, message)? == r)
}

fn nonce_candidate(
    private_key: &PrivateKey,
    public_key: &PublicKey,
    message: &[u8],
    counter: u32,
) -> Result<Option<Scalar>, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(private_key.as_bytes())
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
    mac.update(public_key.as_bytes());
    mac.update(message);
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let k: Option<Scalar> = Scalar::from_repr(digest).into();
    Ok(k.filter(|k| !bool::from(k.is_zero())))
}

// H(Q || P || m) mod n
fn challenge(q: &ProjectivePoint, public_key: &PublicKey, message: &[u8]) -> Result<Scalar, CryptoError> {
    let q = q.to_affine().to_encoded_point(true);
    if q.as_bytes().len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidSignature);
    }

    let mut hasher = Sha256::new();
    hasher.update(q.as_bytes());
    hasher.update(public_key.as_bytes());
    hasher.update(message);
    let hash = hasher.finalize();

    Ok(<Scalar as Reduce<U256>>::reduce(U256::from_be_slice(&hash)))
}

fn nonzero_scalar(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    let repr = *FieldBytes::from_slice(bytes);
    let scalar: Option<Scalar> = Scalar::from_repr(repr).into();
    scalar
        .filter(|s| !bool::from(s.is_zero()))
        .ok_or(CryptoError::InvalidSignature)
}

fn scalar_bytes(scalar: &Scalar) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&scalar.to_bytes());
    out
}
