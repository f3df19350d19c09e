//! Password-protected key container (version 3 JSON keystore).
//!
//! The private key is encrypted with AES-128-CTR under the first half of a
//! KDF-derived key; the second half authenticates the ciphertext through an
//! HMAC-SHA256 mac that is checked before anything is decrypted.

use aes::Aes128;
use aster_primitives::{hex, Address, EntropySource, PrivateKey};
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use zeroize::Zeroizing;

use crate::errors::WalletError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

pub const KEYSTORE_VERSION: u32 = 3;
pub const CIPHER: &str = "aes-128-ctr";

const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const DKLEN: u32 = 32;

// Cost ceilings for parameters read from keystore files
const MAX_PBKDF2_ROUNDS: u32 = 10_000_000;
const MAX_SCRYPT_N: u32 = 1 << 20;
const MAX_SCRYPT_MEMORY: u64 = 1 << 30;
const MAX_SCRYPT_P: u32 = 16;
const MAX_ARGON2_MEMORY_KIB: u32 = 4 * 1024 * 1024;
const MAX_ARGON2_PASSES: u32 = 64;
const MAX_ARGON2_LANES: u32 = 16;

/// Supported key-derivation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfKind {
    Pbkdf2,
    Scrypt,
    Argon2id,
}

impl KdfKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KdfKind::Pbkdf2 => "pbkdf2",
            KdfKind::Scrypt => "scrypt",
            KdfKind::Argon2id => "argon2id",
        }
    }
}

impl fmt::Display for KdfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KdfKind {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pbkdf2" => Ok(KdfKind::Pbkdf2),
            "scrypt" => Ok(KdfKind::Scrypt),
            "argon2id" => Ok(KdfKind::Argon2id),
            other => Err(WalletError::Kdf(format!("unsupported kdf: {}", other))),
        }
    }
}

/// A KDF together with its cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kdf {
    /// PBKDF2-HMAC-SHA256 with `c` iterations
    Pbkdf2 { c: u32 },
    /// scrypt with CPU/memory cost `n` (a power of two)
    Scrypt { n: u32, r: u32, p: u32 },
    /// Argon2id with `m` KiB of memory and `t` passes
    Argon2id { m: u32, t: u32, p: u32 },
}

impl Kdf {
    pub fn default_for(kind: KdfKind) -> Self {
        match kind {
            KdfKind::Pbkdf2 => Kdf::Pbkdf2 { c: 262_144 },
            KdfKind::Scrypt => Kdf::Scrypt { n: 8192, r: 8, p: 1 },
            KdfKind::Argon2id => Kdf::Argon2id { m: 65_536, t: 3, p: 1 },
        }
    }

    pub fn kind(&self) -> KdfKind {
        match self {
            Kdf::Pbkdf2 { .. } => KdfKind::Pbkdf2,
            Kdf::Scrypt { .. } => KdfKind::Scrypt,
            Kdf::Argon2id { .. } => KdfKind::Argon2id,
        }
    }

    /// Derive the 32-byte encryption + mac key
    pub fn derive(&self, passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, WalletError> {
        self.check_costs()?;
        let mut out = Zeroizing::new([0u8; 32]);

        match *self {
            Kdf::Pbkdf2 { c } => {
                if c == 0 {
                    return Err(WalletError::Kdf("pbkdf2 iteration count must be positive".into()));
                }
                pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, c, &mut out[..]);
            }
            Kdf::Scrypt { n, r, p } => {
                if n < 2 || !n.is_power_of_two() {
                    return Err(WalletError::Kdf(format!("scrypt n must be a power of two, got {}", n)));
                }
                let log_n = n.trailing_zeros() as u8;
                let params = scrypt::Params::new(log_n, r, p, DKLEN as usize)
                    .map_err(|e| WalletError::Kdf(format!("scrypt params: {}", e)))?;
                scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut out[..])
                    .map_err(|e| WalletError::Kdf(format!("scrypt: {}", e)))?;
            }
            Kdf::Argon2id { m, t, p } => {
                let params = argon2::Params::new(m, t, p, Some(DKLEN as usize))
                    .map_err(|e| WalletError::Kdf(format!("argon2 params: {}", e)))?;
                argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
                    .hash_password_into(passphrase.as_bytes(), salt, &mut out[..])
                    .map_err(|e| WalletError::Kdf(format!("argon2: {}", e)))?;
            }
        }

        Ok(out)
    }

    /// Reject costs too large to compute in bounded time and memory
    fn check_costs(&self) -> Result<(), WalletError> {
        let exceeded = match *self {
            Kdf::Pbkdf2 { c } => (c > MAX_PBKDF2_ROUNDS).then(|| format!("pbkdf2 c={}", c)),
            Kdf::Scrypt { n, r, p } => {
                // scrypt works in 128 * n * r bytes
                let memory = 128 * u64::from(n) * u64::from(r);
                if n > MAX_SCRYPT_N {
                    Some(format!("scrypt n={}", n))
                } else if memory > MAX_SCRYPT_MEMORY {
                    Some(format!("scrypt memory for n={} r={}", n, r))
                } else {
                    (p > MAX_SCRYPT_P).then(|| format!("scrypt p={}", p))
                }
            }
            Kdf::Argon2id { m, t, p } => {
                if m > MAX_ARGON2_MEMORY_KIB {
                    Some(format!("argon2id m={}", m))
                } else if t > MAX_ARGON2_PASSES {
                    Some(format!("argon2id t={}", t))
                } else {
                    (p > MAX_ARGON2_LANES).then(|| format!("argon2id p={}", p))
                }
            }
        };

        match exceeded {
            Some(what) => Err(WalletError::Kdf(format!("{} exceeds the supported maximum", what))),
            None => Ok(()),
        }
    }

    fn to_params(self, salt: &[u8]) -> KdfParams {
        let mut params = KdfParams {
            salt: hex::encode(salt),
            dklen: DKLEN,
            c: None,
            n: None,
            r: None,
            p: None,
            m: None,
            t: None,
        };
        match self {
            Kdf::Pbkdf2 { c } => params.c = Some(c),
            Kdf::Scrypt { n, r, p } => {
                params.n = Some(n);
                params.r = Some(r);
                params.p = Some(p);
            }
            Kdf::Argon2id { m, t, p } => {
                params.m = Some(m);
                params.t = Some(t);
                params.p = Some(p);
            }
        }
        params
    }

    fn from_params(name: &str, params: &KdfParams) -> Result<Self, WalletError> {
        if params.dklen != DKLEN {
            return Err(WalletError::Kdf(format!("unsupported dklen: {}", params.dklen)));
        }

        let field = |value: Option<u32>, label: &str| {
            value.ok_or_else(|| WalletError::Kdf(format!("{} is missing kdfparams.{}", name, label)))
        };

        let kdf = match name.parse::<KdfKind>()? {
            KdfKind::Pbkdf2 => Kdf::Pbkdf2 { c: field(params.c, "c")? },
            KdfKind::Scrypt => Kdf::Scrypt {
                n: field(params.n, "n")?,
                r: field(params.r, "r")?,
                p: field(params.p, "p")?,
            },
            KdfKind::Argon2id => Kdf::Argon2id {
                m: field(params.m, "m")?,
                t: field(params.t, "t")?,
                p: field(params.p, "p")?,
            },
        };
        kdf.check_costs()?;
        Ok(kdf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub salt: String,
    pub dklen: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    pub iv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoSection {
    pub cipher: String,
    pub cipherparams: CipherParams,
    pub ciphertext: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub mac: String,
}

/// Encrypted private key as persisted on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreFile {
    /// Lowercase hex address, no prefix
    pub address: String,
    pub crypto: CryptoSection,
    pub id: String,
    pub version: u32,
}

impl KeystoreFile {
    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the container, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WalletError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        debug!("Saved keystore for {} to {}", self.address, path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Address recorded in the container
    pub fn address(&self) -> Result<Address, WalletError> {
        Ok(self.address.parse::<Address>()?)
    }

    /// Suggested file name, `<address>.json`
    pub fn file_name(&self) -> String {
        format!("{}.json", self.address.to_lowercase())
    }
}

/// Encrypt with the default cost parameters for `kind`
pub fn encrypt(
    private_key: &PrivateKey,
    passphrase: &str,
    kind: KdfKind,
    entropy: &dyn EntropySource,
) -> Result<KeystoreFile, WalletError> {
    encrypt_with(private_key, passphrase, Kdf::default_for(kind), entropy)
}

/// Encrypt with explicit KDF cost parameters
pub fn encrypt_with(
    private_key: &PrivateKey,
    passphrase: &str,
    kdf: Kdf,
    entropy: &dyn EntropySource,
) -> Result<KeystoreFile, WalletError> {
    let address = private_key.public_key()?.address();

    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    let mut id = [0u8; 16];
    entropy.fill_bytes(&mut salt);
    entropy.fill_bytes(&mut iv);
    entropy.fill_bytes(&mut id);

    let derived = kdf.derive(passphrase, &salt)?;

    let mut ciphertext = private_key.as_bytes().to_vec();
    let mut cipher = Aes128Ctr::new_from_slices(&derived[..16], &iv)
        .map_err(|e| WalletError::Kdf(e.to_string()))?;
    cipher.apply_keystream(&mut ciphertext);

    let mac = keystore_mac(&derived, &ciphertext, &iv)?.finalize().into_bytes();

    Ok(KeystoreFile {
        address: address.to_hex(),
        crypto: CryptoSection {
            cipher: CIPHER.to_string(),
            cipherparams: CipherParams { iv: hex::encode(iv) },
            ciphertext: hex::encode(&ciphertext),
            kdf: kdf.kind().to_string(),
            kdfparams: kdf.to_params(&salt),
            mac: hex::encode(mac),
        },
        id: uuid::Builder::from_random_bytes(id).into_uuid().to_string(),
        version: KEYSTORE_VERSION,
    })
}

/// Recover the private key. The mac is verified before decryption, and the
/// decrypted key must match the recorded address.
pub fn decrypt(file: &KeystoreFile, passphrase: &str) -> Result<PrivateKey, WalletError> {
    let crypto = &file.crypto;
    if file.version != KEYSTORE_VERSION {
        return Err(WalletError::Format(format!("unsupported keystore version {}", file.version)));
    }
    if crypto.cipher != CIPHER {
        return Err(WalletError::Format(format!("unsupported cipher {}", crypto.cipher)));
    }

    let kdf = Kdf::from_params(&crypto.kdf, &crypto.kdfparams)?;
    let salt = hex::decode(&crypto.kdfparams.salt)?;
    let iv = hex::decode(&crypto.cipherparams.iv)?;
    let ciphertext = hex::decode(&crypto.ciphertext)?;
    let mac = hex::decode(&crypto.mac)?;
    if iv.len() != IV_LEN {
        return Err(WalletError::Format(format!("iv must be {} bytes", IV_LEN)));
    }

    let derived = kdf.derive(passphrase, &salt)?;

    keystore_mac(&derived, &ciphertext, &iv)?
        .verify_slice(&mac)
        .map_err(|_| WalletError::Authentication("keystore mac mismatch".into()))?;

    let mut plaintext = Zeroizing::new(ciphertext);
    let mut cipher = Aes128Ctr::new_from_slices(&derived[..16], &iv)
        .map_err(|e| WalletError::Kdf(e.to_string()))?;
    cipher.apply_keystream(plaintext.as_mut_slice());

    let private_key = PrivateKey::from_bytes(&plaintext)?;
    let address = private_key.public_key()?.address();
    if address.to_hex() != file.address.to_lowercase().trim_start_matches("0x") {
        return Err(WalletError::Authentication(format!(
            "decrypted key belongs to {}, not {}",
            address, file.address
        )));
    }

    Ok(private_key)
}

// HMAC-SHA256(derived, derived[16..32] || ciphertext || iv || cipher name)
fn keystore_mac(derived: &[u8; 32], ciphertext: &[u8], iv: &[u8]) -> Result<HmacSha256, WalletError> {
    let mut mac = HmacSha256::new_from_slice(derived).map_err(|e| WalletError::Kdf(e.to_string()))?;
    mac.update(&derived[16..32]);
    mac.update(ciphertext);
    mac.update(iv);
    mac.update(CIPHER.as_bytes());
    Ok(mac)
}
