//! Wallet composition: root key material, accounts and encrypted files.
//!
//! A [`Wallet`] owns one [`HdKeyChain`], one [`WalletConfig`] and a handle to
//! shared storage. Accounts are created on demand and share all three.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use duff_core::address::decode_private_key;
use duff_core::config::WalletConfig;
use duff_core::error::WalletError;
use duff_core::path::account_path;
use duff_core::traits::{KeyChain, Transport};
use duff_core::types::{Network, WalletType};
use duff_storage::{Storage, StorageHandle};

use crate::account::{Account, AccountOptions};
use crate::encryption;
use crate::keys::{HdKeyChain, SeedBytes};
use crate::mnemonic::{WordCount, generate_mnemonic};

/// Magic bytes identifying a Duff wallet file.
pub const WALLET_MAGIC: &[u8; 4] = b"DUFW";

/// Current wallet file format version.
pub const WALLET_VERSION: u32 = 1;

/// Length of a wallet id in hex characters.
const WALLET_ID_LEN: usize = 10;

/// Root key material a wallet is built from.
///
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WalletSecret {
    /// BIP-39 phrase with optional passphrase.
    Mnemonic {
        /// Space-separated words.
        phrase: String,
        /// BIP-39 passphrase, empty for none.
        #[serde(default)]
        passphrase: String,
    },
    /// Hex-encoded BIP-39 seed.
    Seed {
        /// 16 to 64 bytes, hex.
        hex: String,
    },
    /// Serialized extended private key.
    ExtendedPrivateKey {
        /// Base58check `tprv…`/`xprv…`.
        key: String,
    },
    /// Account-level extended public key. Watch-only.
    ExtendedPublicKey {
        /// Base58check `tpub…`/`xpub…`.
        key: String,
        /// Account the key was exported at.
        account_index: u32,
    },
    /// A single private key, WIF or hex.
    PrivateKey {
        /// Encoded key.
        key: String,
    },
}

impl WalletSecret {
    /// Mnemonic secret without passphrase.
    pub fn mnemonic(phrase: impl Into<String>) -> Self {
        WalletSecret::Mnemonic {
            phrase: phrase.into(),
            passphrase: String::new(),
        }
    }

    fn keychain(&self, network: Network) -> Result<HdKeyChain, WalletError> {
        match self {
            WalletSecret::Mnemonic { phrase, passphrase } => {
                HdKeyChain::from_mnemonic(phrase, passphrase, network)
            }
            WalletSecret::Seed { hex } => {
                let seed = SeedBytes::from_hex(hex)?;
                HdKeyChain::from_seed(seed.as_slice(), network)
            }
            WalletSecret::ExtendedPrivateKey { key } => HdKeyChain::from_xpriv_str(key, network),
            WalletSecret::ExtendedPublicKey { key, account_index } => {
                HdKeyChain::from_xpub_str(key, network, account_path(network, *account_index))
            }
            WalletSecret::PrivateKey { key } => Ok(HdKeyChain::from_private_key(
                decode_private_key(key, network)?,
                network,
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            WalletSecret::Mnemonic { .. } => "mnemonic",
            WalletSecret::Seed { .. } => "seed",
            WalletSecret::ExtendedPrivateKey { .. } => "extendedPrivateKey",
            WalletSecret::ExtendedPublicKey { .. } => "extendedPublicKey",
            WalletSecret::PrivateKey { .. } => "privateKey",
        }
    }
}

impl fmt::Debug for WalletSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletSecret::{}([REDACTED])", self.kind())
    }
}

/// Wallet file header serialized as JSON.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletFileHeader {
    magic: String,
    version: u32,
    network: Network,
    wallet_type: WalletType,
}

/// An account remembered across saves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAccount {
    /// Account index.
    pub index: u32,
    /// User label.
    pub label: Option<String>,
}

/// Encrypted wallet file payload.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletFilePayload {
    secret: WalletSecret,
    config: WalletConfig,
    accounts: Vec<SavedAccount>,
}

/// A wallet: root key material plus its accounts.
pub struct Wallet {
    id: String,
    secret: WalletSecret,
    keychain: Arc<HdKeyChain>,
    config: Arc<WalletConfig>,
    storage: StorageHandle,
    transport: Option<Arc<dyn Transport>>,
    accounts: RwLock<BTreeMap<u32, Arc<Account>>>,
    saved_accounts: Vec<SavedAccount>,
}

impl Wallet {
    /// Build a wallet from `secret` with in-memory storage and no transport.
    pub fn new(secret: WalletSecret, config: WalletConfig) -> Result<Self, WalletError> {
        let keychain = secret.keychain(config.network)?;
        let id = wallet_id(&keychain);
        let storage = StorageHandle::new(Storage::new().with_coinbase_maturity(config.coinbase_maturity));
        info!(wallet_id = %id, network = %config.network, wallet_type = ?keychain.wallet_type(), "wallet opened");
        Ok(Self {
            id,
            secret,
            keychain: Arc::new(keychain),
            config: Arc::new(config),
            storage,
            transport: None,
            accounts: RwLock::new(BTreeMap::new()),
            saved_accounts: Vec::new(),
        })
    }

    /// Wallet from a fresh random mnemonic.
    pub fn generate(words: WordCount, config: WalletConfig) -> Result<Self, WalletError> {
        let phrase = generate_mnemonic(words)?;
        Self::new(WalletSecret::mnemonic(phrase.as_str()), config)
    }

    /// Wallet from a mnemonic phrase.
    pub fn from_mnemonic(phrase: &str, config: WalletConfig) -> Result<Self, WalletError> {
        Self::new(WalletSecret::mnemonic(phrase), config)
    }

    /// Use `transport` for accounts created from now on.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use shared `storage` for accounts created from now on. The storage
    /// takes on this wallet's coinbase maturity.
    pub fn with_storage(mut self, storage: StorageHandle) -> Self {
        storage
            .write()
            .set_coinbase_maturity(self.config.coinbase_maturity);
        self.storage = storage;
        self
    }

    /// Wallet id: first 10 hex characters of SHA-256 over the root public
    /// key material.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Network of the wallet.
    pub fn network(&self) -> Network {
        self.config.network
    }

    /// Kind of root material.
    pub fn wallet_type(&self) -> WalletType {
        self.keychain.wallet_type()
    }

    /// Wallet configuration.
    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Shared storage.
    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    /// Key chain of the wallet.
    pub fn keychain(&self) -> &HdKeyChain {
        &self.keychain
    }

    /// The mnemonic phrase, if the wallet was built from one.
    pub fn export_mnemonic(&self) -> Option<Zeroizing<String>> {
        match &self.secret {
            WalletSecret::Mnemonic { phrase, .. } => Some(Zeroizing::new(phrase.clone())),
            _ => None,
        }
    }

    /// Create an account, or return the existing one at the requested index.
    ///
    /// Without an explicit index the smallest unused one is assigned.
    /// Watch-only wallets only have the account their key was exported at;
    /// single-key wallets only have account 0.
    pub fn create_account(&self, mut options: AccountOptions) -> Result<Arc<Account>, WalletError> {
        let index = self.resolve_index(options.index)?;
        if let Some(existing) = self.accounts.read().get(&index) {
            return Ok(Arc::clone(existing));
        }
        options.index = Some(index);
        let keychain: Arc<dyn KeyChain> = self.keychain.clone();
        let account = Arc::new(Account::new(
            self.id.clone(),
            keychain,
            self.storage.clone(),
            self.transport.clone(),
            Arc::clone(&self.config),
            options,
        )?);
        self.accounts.write().insert(index, Arc::clone(&account));
        Ok(account)
    }

    fn resolve_index(&self, requested: Option<u32>) -> Result<u32, WalletError> {
        let fixed = match (&self.secret, self.wallet_type()) {
            (WalletSecret::ExtendedPublicKey { account_index, .. }, _) => Some(*account_index),
            (_, WalletType::SingleAddress) => Some(0),
            _ => None,
        };
        match (fixed, requested) {
            (Some(bound), Some(index)) if bound != index => Err(WalletError::Validation(format!(
                "this wallet only has account {bound}"
            ))),
            (Some(bound), _) => Ok(bound),
            (None, Some(index)) => Ok(index),
            (None, None) => {
                let mut taken: BTreeSet<u32> = self.accounts.read().keys().copied().collect();
                if let Ok(stored) = self.storage.read().account_indices(&self.id) {
                    taken.extend(stored);
                }
                (0..=u32::MAX)
                    .find(|i| !taken.contains(i))
                    .ok_or_else(|| WalletError::Validation("no free account index".into()))
            }
        }
    }

    /// Account at `index`.
    pub fn get_account(&self, index: u32) -> Result<Arc<Account>, WalletError> {
        self.accounts
            .read()
            .get(&index)
            .cloned()
            .ok_or(WalletError::UnknownAccount(index))
    }

    /// Every account, by index.
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts.read().values().cloned().collect()
    }

    /// Recreate the accounts remembered in a loaded wallet file.
    pub fn restore_accounts(&self) -> Result<Vec<Arc<Account>>, WalletError> {
        self.saved_accounts
            .iter()
            .map(|saved| {
                let mut options = AccountOptions::default().with_index(saved.index);
                options.label = saved.label.clone();
                self.create_account(options)
            })
            .collect()
    }

    /// Disconnect every account. All accounts are attempted; the first
    /// failure is returned.
    pub async fn disconnect(&self) -> Result<(), WalletError> {
        let mut first_error = None;
        for account in self.accounts() {
            if let Err(e) = account.disconnect().await {
                warn!(index = account.index(), error = %e, "account disconnect failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Save the wallet to an encrypted file.
    ///
    /// # File format
    /// ```text
    /// magic (4 bytes) || header_len (4 bytes LE) || header_json || encrypted_payload
    /// ```
    /// The header is unencrypted JSON with magic, version, network and
    /// wallet type. The payload is AES-256-GCM encrypted CBOR holding the
    /// secret, the configuration and the account list.
    pub fn save_to_file(&self, path: &Path, password: &[u8]) -> Result<(), WalletError> {
        let header = WalletFileHeader {
            magic: String::from_utf8_lossy(WALLET_MAGIC).to_string(),
            version: WALLET_VERSION,
            network: self.network(),
            wallet_type: self.wallet_type(),
        };
        let header_json = serde_json::to_vec(&header)?;

        let payload = WalletFilePayload {
            secret: self.secret.clone(),
            config: (*self.config).clone(),
            accounts: self
                .accounts
                .read()
                .values()
                .map(|a| SavedAccount {
                    index: a.index(),
                    label: a.label().map(str::to_string),
                })
                .collect(),
        };
        let mut payload_cbor = Zeroizing::new(Vec::new());
        ciborium::ser::into_writer(&payload, &mut *payload_cbor)
            .map_err(|e| WalletError::Serialization(format!("wallet payload: {e}")))?;
        let encrypted = encryption::encrypt(&payload_cbor, password)?;

        let header_len = u32::try_from(header_json.len())
            .map_err(|_| WalletError::Serialization("wallet header too large".into()))?;
        let mut file_data =
            Vec::with_capacity(WALLET_MAGIC.len() + 4 + header_json.len() + encrypted.len());
        file_data.extend_from_slice(WALLET_MAGIC);
        file_data.extend_from_slice(&header_len.to_le_bytes());
        file_data.extend_from_slice(&header_json);
        file_data.extend_from_slice(&encrypted);

        std::fs::write(path, &file_data)?;
        info!(wallet_id = %self.id, path = %path.display(), "wallet saved");
        Ok(())
    }

    /// Load a wallet from an encrypted file.
    ///
    /// Accounts are not recreated until [`Wallet::restore_accounts`], so a
    /// transport or storage can be attached first.
    pub fn load_from_file(path: &Path, password: &[u8]) -> Result<Self, WalletError> {
        let file_data = std::fs::read(path)?;

        let body = file_data
            .strip_prefix(WALLET_MAGIC.as_slice())
            .ok_or_else(|| WalletError::CorruptedFile("invalid magic bytes".into()))?;
        let (len_bytes, rest) = body
            .split_first_chunk::<4>()
            .ok_or_else(|| WalletError::CorruptedFile("file too short".into()))?;
        let header_len = u32::from_le_bytes(*len_bytes) as usize;
        if rest.len() < header_len {
            return Err(WalletError::CorruptedFile("header truncated".into()));
        }
        let (header_json, encrypted) = rest.split_at(header_len);

        let header: WalletFileHeader = serde_json::from_slice(header_json)
            .map_err(|e| WalletError::CorruptedFile(format!("invalid header: {e}")))?;
        if header.magic.as_bytes() != WALLET_MAGIC {
            return Err(WalletError::CorruptedFile("invalid magic in header".into()));
        }
        if header.version != WALLET_VERSION {
            return Err(WalletError::CorruptedFile(format!(
                "unsupported version: {}",
                header.version
            )));
        }

        let payload_cbor = encryption::decrypt(encrypted, password)?;
        let payload: WalletFilePayload = ciborium::de::from_reader(payload_cbor.as_slice())
            .map_err(|e| WalletError::CorruptedFile(format!("invalid payload: {e}")))?;
        if payload.config.network != header.network {
            return Err(WalletError::CorruptedFile(format!(
                "header says {}, payload says {}",
                header.network, payload.config.network
            )));
        }

        let WalletFilePayload {
            secret,
            config,
            accounts,
        } = payload;
        let mut wallet = Self::new(secret, config)?;
        wallet.saved_accounts = accounts;
        Ok(wallet)
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("id", &self.id)
            .field("network", &self.config.network)
            .field("wallet_type", &self.wallet_type())
            .field("accounts", &self.accounts.read().len())
            .finish()
    }
}

/// First 10 hex characters of SHA-256 over the root public key material.
pub fn wallet_id(keychain: &dyn KeyChain) -> String {
    let digest = Sha256::digest(keychain.root_public_bytes());
    let mut id = hex::encode(digest);
    id.truncate(WALLET_ID_LEN);
    id
}
