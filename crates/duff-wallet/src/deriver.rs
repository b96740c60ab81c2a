//! Address derivation under one account root.

use std::sync::Arc;

use duff_core::error::WalletError;
use duff_core::path::address_path;
use duff_core::traits::KeyChain;
use duff_core::types::{AddressInfo, ChainType, WalletType};

/// Derives addresses for one account. Path bookkeeping lives here; the
/// cryptography is the key chain's.
#[derive(Clone)]
pub struct AddressDeriver {
    keychain: Arc<dyn KeyChain>,
    account_path: String,
}

impl AddressDeriver {
    /// Deriver for the account rooted at `account_path`.
    pub fn new(keychain: Arc<dyn KeyChain>, account_path: impl Into<String>) -> Self {
        Self {
            keychain,
            account_path: account_path.into(),
        }
    }

    /// Account root.
    pub fn account_path(&self) -> &str {
        &self.account_path
    }

    /// Kind of root material behind the deriver.
    pub fn wallet_type(&self) -> WalletType {
        self.keychain.wallet_type()
    }

    /// Path of `index` on `chain`. Single-address wallets have only the
    /// misc chain.
    pub fn path_for(&self, chain: ChainType, index: u32) -> Result<String, WalletError> {
        match (self.keychain.wallet_type(), chain) {
            (WalletType::SingleAddress, ChainType::Misc) => Ok(index.to_string()),
            (WalletType::SingleAddress, other) => Err(WalletError::Validation(format!(
                "single-address wallets have no {other:?} chain"
            ))),
            (_, ChainType::Misc) => Err(WalletError::Validation(
                "HD wallets do not derive misc addresses".into(),
            )),
            (_, chain) => Ok(address_path(&self.account_path, chain, index)),
        }
    }

    /// Fresh, unused [`AddressInfo`] for `index` on `chain`.
    pub fn derive(&self, chain: ChainType, index: u32) -> Result<AddressInfo, WalletError> {
        let path = self.path_for(chain, index)?;
        let key = self.keychain.get_for_path(&path)?;
        Ok(AddressInfo::new(path, index, key.address, chain))
    }

    /// Derive `count` consecutive addresses starting at `from`.
    pub fn derive_range(&self, chain: ChainType, from: u32, count: u32) -> Result<Vec<AddressInfo>, WalletError> {
        (from..from.saturating_add(count))
            .map(|index| self.derive(chain, index))
            .collect()
    }
}

impl std::fmt::Debug for AddressDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressDeriver")
            .field("account_path", &self.account_path)
            .finish_non_exhaustive()
    }
}
