use crate::config::WalletConfig;
use crate::errors::{ApiError, WalletError};
use crate::keystore::{self, Kdf, KdfKind, KeystoreFile};
use crate::rpc_client::NodeClient;
use crate::transaction::Transaction;
use aster_primitives::{
    derive_from_mnemonic, generate_key_pair, sign, Address, EntropySource, OsEntropy, PrivateKey,
    PublicKey, Signature,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A decrypted key held in memory
#[derive(Debug)]
pub struct Account {
    private_key: PrivateKey,
    public_key: PublicKey,
    address: Address,
}

impl Account {
    pub fn from_private_key(private_key: PrivateKey) -> Result<Self, WalletError> {
        let public_key = private_key.public_key()?;
        Ok(Self {
            address: public_key.address(),
            public_key,
            private_key,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn sign(&self, message: &[u8]) -> Result<Signature, WalletError> {
        Ok(sign(&self.private_key, message)?)
    }
}

#[derive(Default)]
struct WalletInner {
    accounts: HashMap<Address, Account>,
    default: Option<Address>,
}

/// In-memory account store and signer. Shareable across threads; signing
/// only takes the read lock.
pub struct Wallet {
    inner: RwLock<WalletInner>,
    entropy: Arc<dyn EntropySource>,
    default_kdf: KdfKind,
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet {
    /// Empty wallet drawing randomness from the OS
    pub fn new() -> Self {
        Self::with_entropy(Arc::new(OsEntropy))
    }

    pub fn with_entropy(entropy: Arc<dyn EntropySource>) -> Self {
        Self {
            inner: RwLock::new(WalletInner::default()),
            entropy,
            default_kdf: KdfKind::Scrypt,
        }
    }

    pub fn from_config(config: &WalletConfig) -> Self {
        let mut wallet = Self::new();
        wallet.default_kdf = config.default_kdf;
        wallet
    }

    /// Generate and hold a fresh account
    pub fn create(&self) -> Result<Address, WalletError> {
        let (private_key, _) = generate_key_pair(self.entropy.as_ref());
        let address = self.insert(private_key)?;
        info!("Created account {}", address);
        Ok(address)
    }

    /// Import a raw hex private key (optional `0x`)
    pub fn add_by_private_key(&self, private_key_hex: &str) -> Result<Address, WalletError> {
        let private_key = PrivateKey::from_hex(private_key_hex)?;
        let address = self.insert(private_key)?;
        info!("Imported account {}", address);
        Ok(address)
    }

    pub fn add_by_keystore(&self, file: &KeystoreFile, passphrase: &str) -> Result<Address, WalletError> {
        let private_key = keystore::decrypt(file, passphrase)?;
        let address = self.insert(private_key)?;
        info!("Imported account {} from keystore", address);
        Ok(address)
    }

    /// Import the account at `m/44'/313'/0'/0/{index}`
    pub fn add_by_mnemonic(&self, phrase: &str, index: u32) -> Result<Address, WalletError> {
        let private_key = derive_from_mnemonic(phrase, index)?;
        let address = self.insert(private_key)?;
        info!("Imported account {} from mnemonic index {}", address, index);
        Ok(address)
    }

    fn insert(&self, private_key: PrivateKey) -> Result<Address, WalletError> {
        let account = Account::from_private_key(private_key)?;
        let address = account.address();

        let mut inner = self.inner.write();
        inner.accounts.insert(address, account);
        if inner.default.is_none() {
            inner.default = Some(address);
        }
        Ok(address)
    }

    /// Encrypt a held account with the wallet's default KDF
    pub fn export(&self, address: &Address, passphrase: &str) -> Result<KeystoreFile, WalletError> {
        self.export_with(address, passphrase, Kdf::default_for(self.default_kdf))
    }

    pub fn export_with(
        &self,
        address: &Address,
        passphrase: &str,
        kdf: Kdf,
    ) -> Result<KeystoreFile, WalletError> {
        let private_key = {
            let inner = self.inner.read();
            inner
                .accounts
                .get(address)
                .map(|account| account.private_key.clone())
                .ok_or_else(|| WalletError::UnknownAccount(address.to_string()))?
        };

        debug!("Exporting {} with {}", address, kdf.kind());
        keystore::encrypt_with(&private_key, passphrase, kdf, self.entropy.as_ref())
    }

    /// Drop an account. Its key bytes are wiped as it goes out of scope.
    pub fn remove(&self, address: &Address) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.accounts.remove(address).is_some();
        if inner.default == Some(*address) {
            inner.default = None;
        }
        if removed {
            info!("Removed account {}", address);
        }
        removed
    }

    pub fn set_default(&self, address: &Address) -> Result<(), WalletError> {
        let mut inner = self.inner.write();
        if !inner.accounts.contains_key(address) {
            return Err(WalletError::UnknownAccount(address.to_string()));
        }
        inner.default = Some(*address);
        Ok(())
    }

    pub fn default_account(&self) -> Option<Address> {
        self.inner.read().default
    }

    /// Held addresses, sorted
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.inner.read().accounts.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.inner.read().accounts.contains_key(address)
    }

    pub fn public_key(&self, address: &Address) -> Option<PublicKey> {
        self.inner.read().accounts.get(address).map(Account::public_key)
    }

    /// Sign with the account behind `tx`'s sender key. On error `tx` is left
    /// untouched.
    pub fn sign(&self, tx: &mut Transaction) -> Result<(), WalletError> {
        tx.check_signable()?;
        let signature = {
            let inner = self.inner.read();
            Self::sign_with(&inner, tx)?
        };

        tx.attach_signature(signature);
        debug!("Signed nonce {} for {}", tx.nonce(), tx.sender_address());
        Ok(())
    }

    /// Sign every transaction or none. Fails without mutating anything if
    /// an account is unknown or an account's nonces go backwards.
    pub fn sign_batch(&self, txs: &mut [Transaction]) -> Result<(), WalletError> {
        let mut last_nonce: HashMap<Address, u64> = HashMap::new();
        for tx in txs.iter() {
            tx.check_signable()?;
            let sender = tx.sender_address();
            if let Some(&previous) = last_nonce.get(&sender) {
                if tx.nonce() < previous {
                    return Err(WalletError::InvalidTransaction(format!(
                        "nonce {} follows {} for {}",
                        tx.nonce(),
                        previous,
                        sender
                    )));
                }
            }
            last_nonce.insert(sender, tx.nonce());
        }

        let signatures = {
            let inner = self.inner.read();
            txs.iter()
                .map(|tx| Self::sign_with(&inner, tx))
                .collect::<Result<Vec<_>, _>>()?
        };

        for (tx, signature) in txs.iter_mut().zip(signatures) {
            tx.attach_signature(signature);
        }
        debug!("Signed batch of {} transactions", txs.len());
        Ok(())
    }

    fn sign_with(inner: &WalletInner, tx: &Transaction) -> Result<Signature, WalletError> {
        let sender = tx.sender_address();
        let account = inner
            .accounts
            .get(&sender)
            .ok_or_else(|| WalletError::UnknownAccount(sender.to_string()))?;
        account.sign(&tx.signing_digest())
    }

    /// Nonce the next transaction from `address` should carry
    pub async fn next_nonce(&self, client: &dyn NodeClient, address: &Address) -> Result<u64, WalletError> {
        let account = client.get_balance_and_nonce(address).await?;
        account.nonce.checked_add(1).ok_or_else(|| {
            WalletError::from(ApiError::invalid_response(format!(
                "account nonce {} cannot advance",
                account.nonce
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionBuilder, TxStatus};
    use aster_primitives::{verify, SeededEntropy};
    use std::str::FromStr;

    const KEY: &str = "184e14d737356fc4598d371be70ae0d94d61bbd5643d7eb384faa0de7166c010";
    const OTHER_KEY: &str = "82453a28b4de3f5d1ba7ea2e0cbb1fa3b9290d8462ae8826e7c6dca5b93a2e41";

    fn seeded_wallet() -> Wallet {
        Wallet::with_entropy(Arc::new(SeededEntropy::new(11)))
    }

    fn transfer(sender: PublicKey, nonce: u64) -> Transaction {
        TransactionBuilder::new()
            .chain(1, 1)
            .nonce(nonce)
            .gas_price(2_000_000_000)
            .gas_limit(50)
            .sender(sender)
            .to(Address::from_str("0xe6854848A9F9C628d9F5A85eDb8e5c505023109F").unwrap())
            .amount(100)
            .build()
            .unwrap()
    }

    #[test]
    fn test_import_and_default() {
        let wallet = seeded_wallet();
        let address = wallet.add_by_private_key(KEY).unwrap();
        assert_eq!(address.to_string(), "0x29FB201154c9D44371612639472a45E2aAa1735C");
        assert_eq!(wallet.default_account(), Some(address));

        let other = wallet.add_by_private_key(&format!("0x{}", OTHER_KEY)).unwrap();
        assert_eq!(wallet.default_account(), Some(address));
        wallet.set_default(&other).unwrap();
        assert_eq!(wallet.default_account(), Some(other));
        assert_eq!(wallet.addresses().len(), 2);
    }

    #[test]
    fn test_import_errors() {
        let wallet = seeded_wallet();
        assert!(matches!(wallet.add_by_private_key("xyz"), Err(WalletError::Format(_))));
        assert!(matches!(
            wallet.add_by_private_key(&"00".repeat(32)),
            Err(WalletError::Key(_))
        ));
        assert!(matches!(
            wallet.add_by_mnemonic("abandon abandon", 0),
            Err(WalletError::Format(_))
        ));
        assert!(matches!(
            wallet.set_default(&Address::zero()),
            Err(WalletError::UnknownAccount(_))
        ));
        assert!(wallet.addresses().is_empty());
    }

    #[test]
    fn test_create_is_reproducible_with_seeded_entropy() {
        let a = seeded_wallet().create().unwrap();
        let b = seeded_wallet().create().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_remove() {
        let wallet = seeded_wallet();
        let address = wallet.add_by_private_key(KEY).unwrap();
        assert!(wallet.remove(&address));
        assert!(!wallet.remove(&address));
        assert!(!wallet.contains(&address));
        assert_eq!(wallet.default_account(), None);
        assert!(wallet.public_key(&address).is_none());
    }

    #[test]
    fn test_sign_unknown_account_leaves_tx_untouched() {
        let wallet = seeded_wallet();
        wallet.add_by_private_key(OTHER_KEY).unwrap();

        let sender = PrivateKey::from_hex(KEY).unwrap().public_key().unwrap();
        let mut tx = transfer(sender, 1);
        let before = tx.clone();

        assert!(matches!(wallet.sign(&mut tx), Err(WalletError::UnknownAccount(_))));
        assert_eq!(tx, before);
        assert!(tx.signature().is_none());
        assert_eq!(tx.status(), TxStatus::Created);
    }

    #[test]
    fn test_sign_produces_verifiable_signature() {
        let wallet = seeded_wallet();
        let address = wallet.add_by_private_key(KEY).unwrap();
        let public_key = wallet.public_key(&address).unwrap();

        let mut tx = transfer(public_key, 1);
        wallet.sign(&mut tx).unwrap();

        assert_eq!(tx.status(), TxStatus::Signed);
        assert!(verify(&public_key, &tx.signing_digest(), tx.signature().unwrap()));
    }

    #[test]
    fn test_sign_batch_is_all_or_nothing() {
        let wallet = seeded_wallet();
        let address = wallet.add_by_private_key(KEY).unwrap();
        let public_key = wallet.public_key(&address).unwrap();
        let stranger = PrivateKey::from_hex(OTHER_KEY).unwrap().public_key().unwrap();

        let mut txs = vec![transfer(public_key, 1), transfer(stranger, 1), transfer(public_key, 2)];
        let before = txs.clone();
        assert!(matches!(wallet.sign_batch(&mut txs), Err(WalletError::UnknownAccount(_))));
        assert_eq!(txs, before);

        let mut backwards = vec![transfer(public_key, 2), transfer(public_key, 1)];
        assert!(matches!(
            wallet.sign_batch(&mut backwards),
            Err(WalletError::InvalidTransaction(_))
        ));
        assert!(backwards.iter().all(|tx| tx.signature().is_none()));
    }

    #[test]
    fn test_sign_batch_interleaved_accounts() {
        let wallet = seeded_wallet();
        let a = wallet.add_by_private_key(KEY).unwrap();
        let b = wallet.add_by_private_key(OTHER_KEY).unwrap();
        let (pa, pb) = (wallet.public_key(&a).unwrap(), wallet.public_key(&b).unwrap());

        // Nonces only need to be ordered per account
        let mut txs = vec![transfer(pa, 4), transfer(pb, 1), transfer(pa, 5), transfer(pb, 2)];
        wallet.sign_batch(&mut txs).unwrap();

        for tx in &txs {
            assert!(verify(tx.sender_pub_key(), &tx.signing_digest(), tx.signature().unwrap()));
        }
    }

    #[test]
    fn test_export_round_trip() {
        let wallet = seeded_wallet();
        let address = wallet.add_by_private_key(KEY).unwrap();

        let file = wallet
            .export_with(&address, "pw", Kdf::Scrypt { n: 16, r: 8, p: 1 })
            .unwrap();
        assert_eq!(file.address().unwrap(), address);

        let restored = seeded_wallet();
        assert_eq!(restored.add_by_keystore(&file, "pw").unwrap(), address);
        assert!(matches!(
            restored.add_by_keystore(&file, "nope"),
            Err(WalletError::Authentication(_))
        ));

        assert!(matches!(
            wallet.export(&Address::zero(), "pw"),
            Err(WalletError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_concurrent_signing() {
        let wallet = seeded_wallet();
        let address = wallet.add_by_private_key(KEY).unwrap();
        let public_key = wallet.public_key(&address).unwrap();

        std::thread::scope(|scope| {
            for nonce in 1..=8u64 {
                let wallet = &wallet;
                scope.spawn(move || {
                    let mut tx = transfer(public_key, nonce);
                    wallet.sign(&mut tx).unwrap();
                    assert!(verify(&public_key, &tx.signing_digest(), tx.signature().unwrap()));
                });
            }
        });
    }
}
