use crate::encoding::{bech32, hex, strip_0x, EncodingError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Width of an account or contract address in bytes
pub const ADDRESS_LEN: usize = 20;

/// Human-readable prefix of bech32 addresses
pub const ADDRESS_HRP: &str = "zil";

/// Width of a compressed secp256k1 public key
pub const PUBLIC_KEY_LEN: usize = 33;

/// Width of a Schnorr signature (r || s)
pub const SIGNATURE_LEN: usize = 64;

/// 20-byte account or contract address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Derive the address of a public key: last 20 bytes of its SHA-256
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let hash = Sha256::digest(public_key.as_bytes());

        let mut addr = [0u8; ADDRESS_LEN];
        addr.copy_from_slice(&hash[12..32]);
        Address(addr)
    }

    pub fn zero() -> Self {
        Address([0u8; ADDRESS_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Lowercase hex without prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Mixed-case checksummed hex with `0x` prefix.
    ///
    /// Hex letter `i` is upper-cased when bit `255 - 6*i` of SHA-256(address)
    /// is set.
    pub fn to_checksum(&self) -> String {
        let lower = self.to_hex();
        let hash = Sha256::digest(self.0);

        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            if c.is_ascii_digit() {
                out.push(c);
                continue;
            }
            let bit = 255 - 6 * i;
            let byte = hash[31 - bit / 8];
            if (byte >> (bit % 8)) & 1 == 1 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Bech32 form, `zil1...`
    pub fn to_bech32(&self) -> Result<String, EncodingError> {
        bech32::encode(ADDRESS_HRP, &self.0)
    }
}

/// Checksummed form of an address
pub fn to_checksum_address(address: &Address) -> String {
    address.to_checksum()
}

/// Bech32 form of an address
pub fn to_bech32_address(address: &Address) -> Result<String, EncodingError> {
    address.to_bech32()
}

/// Parse a `zil1...` address
pub fn from_bech32_address(text: &str) -> Result<Address, EncodingError> {
    let bytes = bech32::decode(ADDRESS_HRP, text)?;
    if bytes.len() != ADDRESS_LEN {
        return Err(EncodingError::InvalidLength {
            expected: ADDRESS_LEN,
            actual: bytes.len(),
        });
    }

    let mut addr = [0u8; ADDRESS_LEN];
    addr.copy_from_slice(&bytes);
    Ok(Address(addr))
}

/// True when `text` is a 0x-prefixed address in exact checksum case
pub fn is_valid_checksum_address(text: &str) -> bool {
    match hex::decode_fixed::<ADDRESS_LEN>(text) {
        Ok(bytes) => text.starts_with("0x") && Address(bytes).to_checksum() == text,
        Err(_) => false,
    }
}

impl FromStr for Address {
    type Err = EncodingError;

    /// Accepts hex in all-lowercase, all-uppercase, or exact checksum case,
    /// with or without a `0x` prefix, and the bech32 `zil1...` form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bech32_prefix = s.get(..4).map_or(false, |p| p.eq_ignore_ascii_case("zil1"));
        if bech32_prefix {
            return from_bech32_address(s);
        }

        let body = strip_0x(s);
        if body.len() != ADDRESS_LEN * 2 {
            return Err(EncodingError::InvalidAddress(format!(
                "expected {} hex chars, got {}",
                ADDRESS_LEN * 2,
                body.len()
            )));
        }

        let bytes = hex::decode_fixed::<ADDRESS_LEN>(body)
            .map_err(|e| EncodingError::InvalidAddress(e.to_string()))?;
        let address = Address(bytes);

        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *body {
            return Err(EncodingError::InvalidAddress(format!(
                "bad checksum: {}",
                s
            )));
        }

        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

/// Compressed secp256k1 public key (33 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn new(data: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, EncodingError> {
        Ok(Self(hex::decode_fixed(text)?))
    }

    /// Address this key signs for
    pub fn address(&self) -> Address {
        Address::from_public_key(self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Schnorr signature: r (32 bytes, big-endian) || s (32 bytes, big-endian)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub fn new(data: [u8; SIGNATURE_LEN]) -> Self {
        Self(data)
    }

    pub fn from_parts(r: &[u8; 32], s: &[u8; 32]) -> Self {
        let mut data = [0u8; SIGNATURE_LEN];
        data[..32].copy_from_slice(r);
        data[32..].copy_from_slice(s);
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    pub fn r(&self) -> &[u8] {
        &self.0[..32]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[32..]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, EncodingError> {
        Ok(Self(hex::decode_fixed(text)?))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Transaction identifier assigned by the node
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId([u8; 32]);

impl TxId {
    pub fn new(data: [u8; 32]) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self, EncodingError> {
        Ok(Self(hex::decode_fixed(text)?))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// Keys, signatures and ids travel as bare lowercase hex.
macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(PublicKey);
hex_serde!(Signature);
hex_serde!(TxId);

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY: &str = "0373b674e7080951467d83b4abbbb3fdda61dcdfa988d5a7d165bcbe9f4688fcad";
    const CHECKSUMMED: &str = "0x29FB201154c9D44371612639472a45E2aAa1735C";

    #[test]
    fn test_address_from_public_key() {
        let public_key = PublicKey::from_hex(PUBKEY).unwrap();
        let address = Address::from_public_key(&public_key);
        assert_eq!(address.to_hex(), "29fb201154c9d44371612639472a45e2aaa1735c");
        assert_eq!(address.to_checksum(), CHECKSUMMED);
    }

    #[test]
    fn test_checksum_vectors() {
        let address: Address = "e6854848a9f9c628d9f5a85edb8e5c505023109f".parse().unwrap();
        assert_eq!(to_checksum_address(&address), "0xe6854848A9F9C628d9F5A85eDb8e5c505023109F");
        assert!(is_valid_checksum_address(CHECKSUMMED));
        assert!(!is_valid_checksum_address(&CHECKSUMMED.to_lowercase()));
        assert!(!is_valid_checksum_address(&CHECKSUMMED[2..]));
    }

    #[test]
    fn test_address_parsing_cases() {
        let expected = Address::from_str(CHECKSUMMED).unwrap();
        assert_eq!(Address::from_str(&CHECKSUMMED.to_lowercase()).unwrap(), expected);
        assert_eq!(Address::from_str(&CHECKSUMMED[2..].to_uppercase()).unwrap(), expected);

        // Flip the case of one letter to break the checksum
        let broken = CHECKSUMMED.replacen("FB", "Fb", 1);
        assert!(matches!(Address::from_str(&broken), Err(EncodingError::InvalidAddress(_))));
        assert!(Address::from_str("0x1234").is_err());
    }

    #[test]
    fn test_bech32_addresses() {
        let address = Address::from_str("0x1d19918a737306218b5cbb3241fcdcbd998c3a72").unwrap();
        let bech = "zil1r5verznnwvrzrz6uhveyrlxuhkvccwnju4aehf";
        assert_eq!(to_bech32_address(&address).unwrap(), bech);
        assert_eq!(from_bech32_address(bech).unwrap(), address);
        assert_eq!(Address::from_str(bech).unwrap(), address);
        assert_eq!(Address::from_str(&bech.to_uppercase()).unwrap(), address);

        let ours = Address::from_str(CHECKSUMMED).unwrap();
        assert_eq!(ours.to_bech32().unwrap(), "zil198ajqy25e82yxutpycu5w2j9u242zu6ukqwfwn");
        assert_eq!(
            Address::zero().to_bech32().unwrap(),
            "zil1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq9yf6pz"
        );
    }

    #[test]
    fn test_bech32_rejects_bad_input() {
        // Last checksum character altered
        assert!(matches!(
            from_bech32_address("zil1r5verznnwvrzrz6uhveyrlxuhkvccwnju4aehg"),
            Err(EncodingError::InvalidBech32(_))
        ));
        // Valid bech32 under another prefix
        let other = bech32::encode("bc", &[0u8; ADDRESS_LEN]).unwrap();
        assert!(matches!(from_bech32_address(&other), Err(EncodingError::InvalidBech32(_))));
        // Right prefix, wrong payload width
        let short = bech32::encode(ADDRESS_HRP, &[1u8; 19]).unwrap();
        assert!(matches!(
            from_bech32_address(&short),
            Err(EncodingError::InvalidLength { expected: 20, actual: 19 })
        ));
        // Mixed case
        assert!(from_bech32_address("zil1R5verznnwvrzrz6uhveyrlxuhkvccwnju4aehf").is_err());
    }

    #[test]
    fn test_serde_forms() {
        let address = Address::from_str(CHECKSUMMED).unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", CHECKSUMMED));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);

        let public_key = PublicKey::from_hex(PUBKEY).unwrap();
        assert_eq!(serde_json::to_string(&public_key).unwrap(), format!("\"{}\"", PUBKEY));
    }
}
