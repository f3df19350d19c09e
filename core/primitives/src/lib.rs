pub mod contract;
pub mod crypto;
pub mod encoding;
pub mod hd;
pub mod types;

pub use contract::derive_contract_address;
pub use crypto::{
    derive_address, generate_key_pair, public_key_from_private, sign, verify, CryptoError,
    EntropySource, OsEntropy, PrivateKey, SeededEntropy,
};
pub use encoding::{base58, bech32, hex, EncodingError};
pub use hd::{derive_from_mnemonic, derive_from_seed, parse_mnemonic, COIN_TYPE};
pub use types::*;
