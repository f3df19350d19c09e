//! BIP-39 mnemonic phrases and BIP-32 derivation along the network's BIP-44
//! path `m/44'/313'/0'/0/{index}`.

use crate::crypto::{CryptoError, PrivateKey};
use crate::encoding::EncodingError;
use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use k256::{elliptic_curve::sec1::ToEncodedPoint, SecretKey};
use sha2::Sha512;
use zeroize::Zeroize;

type HmacSha512 = Hmac<Sha512>;

/// Registered coin type for the network
pub const COIN_TYPE: u32 = 313;

const PURPOSE: u32 = 44;
const HARDENED: u32 = 0x8000_0000;
const MIN_WORDS: usize = 12;

/// Parse and normalize an English mnemonic phrase
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, CryptoError> {
    let words = phrase.split_whitespace().count();
    if words < MIN_WORDS {
        return Err(EncodingError::InvalidMnemonic(format!(
            "need at least {} words, got {}",
            MIN_WORDS, words
        ))
        .into());
    }

    Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| EncodingError::InvalidMnemonic(e.to_string()).into())
}

/// Private key at `m/44'/313'/0'/0/{index}` for the given phrase
pub fn derive_from_mnemonic(phrase: &str, index: u32) -> Result<PrivateKey, CryptoError> {
    let mnemonic = parse_mnemonic(phrase)?;
    let mut seed = mnemonic.to_seed_normalized("");
    let key = derive_from_seed(&seed, index);
    seed.zeroize();
    key
}

/// Walk the account path from a 64-byte BIP-39 seed
pub fn derive_from_seed(seed: &[u8], index: u32) -> Result<PrivateKey, CryptoError> {
    let (mut key, mut chain_code) = master_key(seed)?;

    let path = [PURPOSE | HARDENED, COIN_TYPE | HARDENED, HARDENED, 0, index];

    for &child_index in &path {
        let (next_key, next_chain) = derive_child(&key, &chain_code, child_index)?;
        key = next_key;
        chain_code = next_chain;
    }

    let private_key = PrivateKey::from_bytes(&key);
    key.zeroize();
    chain_code.zeroize();
    private_key
}

/// BIP-32 master key and chain code
fn master_key(seed: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
        .map_err(|e| CryptoError::Derivation(e.to_string()))?;
    mac.update(seed);
    let result = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&result[..32]);
    chain_code.copy_from_slice(&result[32..]);
    Ok((key, chain_code))
}

fn derive_child(
    parent_key: &[u8; 32],
    parent_chain: &[u8; 32],
    index: u32,
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let parent = SecretKey::from_slice(parent_key)
        .map_err(|_| CryptoError::Derivation("invalid parent key".into()))?;

    let mut mac = HmacSha512::new_from_slice(parent_chain)
        .map_err(|e| CryptoError::Derivation(e.to_string()))?;
    if index >= HARDENED {
        mac.update(&[0x00]);
        mac.update(parent_key);
    } else {
        mac.update(parent.public_key().to_encoded_point(true).as_bytes());
    }
    mac.update(&index.to_be_bytes());
    let result = mac.finalize().into_bytes();

    // child = IL + parent (mod n); IL >= n or a zero child is an invalid index
    let tweak = SecretKey::from_slice(&result[..32])
        .map_err(|_| CryptoError::Derivation(format!("index {} yields invalid key", index)))?;
    let child = *tweak.to_nonzero_scalar() + *parent.to_nonzero_scalar();
    if bool::from(child.is_zero()) {
        return Err(CryptoError::Derivation(format!("index {} yields zero key", index)));
    }

    let mut child_key = [0u8; 32];
    child_key.copy_from_slice(&child.to_bytes());
    let mut child_chain = [0u8; 32];
    child_chain.copy_from_slice(&result[32..]);

    Ok((child_key, child_chain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::public_key_from_private;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_bip32_vector_one() {
        // m/0'/1/2'/2/1000000000 from BIP-32 test vector 1
        let seed = ::hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let (mut key, mut chain) = master_key(&seed).unwrap();
        assert_eq!(
            ::hex::encode(key),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            ::hex::encode(chain),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );

        let expected = [
            (HARDENED, "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"),
            (1, "3c6cb8d0f6a264c91ea8b5030fadaa8e538b020f0a387421a12de9319dc93368"),
            (2 | HARDENED, "cbce0d719ecf7431d88e6a89fa1483e02e35092af60c042b1df2ff59fa424dca"),
            (2, "0f479245fb19a38a1954c5c7c0ebab2f9bdfd96a17563ef28a6a4b1a2a764ef4"),
            (1_000_000_000, "471b76e389e528d6de6d816857e012c5455051cad6660850e58372a6c3e6e7c8"),
        ];
        for (index, child_key) in expected {
            (key, chain) = derive_child(&key, &chain, index).unwrap();
            assert_eq!(::hex::encode(key), child_key, "index {:#x}", index);
        }
        assert_eq!(
            ::hex::encode(chain),
            "c783e67b921d2beb8f6b389cc646d7263b4145701dadd2161548a8b078e65e9e"
        );
    }

    #[test]
    fn test_mnemonic_derivation_is_stable() {
        let first = derive_from_mnemonic(PHRASE, 0).unwrap();
        let again = derive_from_mnemonic(PHRASE, 0).unwrap();
        assert_eq!(first, again);
        assert!(public_key_from_private(&first).is_ok());
    }

    #[test]
    fn test_different_indices() {
        let a = derive_from_mnemonic(PHRASE, 0).unwrap();
        let b = derive_from_mnemonic(PHRASE, 1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let spaced = PHRASE.replace(' ', "   ");
        assert_eq!(
            derive_from_mnemonic(&spaced, 3).unwrap(),
            derive_from_mnemonic(PHRASE, 3).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_phrases() {
        // Too short
        assert!(matches!(
            derive_from_mnemonic("abandon abandon about", 0),
            Err(CryptoError::Encoding(_))
        ));

        // Bad checksum word
        let bad = PHRASE.replace("about", "abandon");
        assert!(matches!(derive_from_mnemonic(&bad, 0), Err(CryptoError::Encoding(_))));

        // Not an English word
        let unknown = PHRASE.replace("about", "zzzzzz");
        assert!(matches!(derive_from_mnemonic(&unknown, 0), Err(CryptoError::Encoding(_))));
    }
}
