use crate::crypto::CryptoError;
use crate::types::{Address, ADDRESS_LEN};
use sha2::{Digest, Sha256};

/// Address a deploy transaction will create.
///
/// `nonce` is the nonce carried by the deploy transaction itself; the hash
/// input is the account nonce before submission, `nonce - 1`.
pub fn derive_contract_address(sender: &Address, nonce: u64) -> Result<Address, CryptoError> {
    let prior = nonce.checked_sub(1).ok_or(CryptoError::InvalidNonce(nonce))?;

    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update(prior.to_be_bytes());
    let hash = hasher.finalize();

    let mut addr = [0u8; ADDRESS_LEN];
    addr.copy_from_slice(&hash[12..32]);
    Ok(Address(addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sender() -> Address {
        Address::from_str("0x29FB201154c9D44371612639472a45E2aAa1735C").unwrap()
    }

    #[test]
    fn test_contract_address_uses_prior_nonce() {
        let address = derive_contract_address(&sender(), 5).unwrap();
        assert_eq!(address.to_hex(), "a1b5df19ba354046396e29feac5cd92eb35bef60");

        let first = derive_contract_address(&sender(), 1).unwrap();
        assert_eq!(first.to_hex(), "55c2b8a244e8febe14943223b723166dfab14c55");
    }

    #[test]
    fn test_nonce_zero_is_rejected() {
        assert!(matches!(
            derive_contract_address(&sender(), 0),
            Err(CryptoError::InvalidNonce(0))
        ));
    }
}
