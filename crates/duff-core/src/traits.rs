//! Trait interfaces consumed by the wallet engine.
//!
//! - [`Transport`]: remote chain data source (Insight, DAPI, ...)
//! - [`KeyChain`]: signing-key lookup and signing

use async_trait::async_trait;
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{PrivateKey, PublicKey, Transaction, TxOut};

use crate::error::WalletError;
use crate::types::{
    AddressSummary, BlockHeaderRecord, ChainStatus, Network, TransactionRecord, TransportUtxo,
    WalletType,
};

/// Remote chain data source.
///
/// Every call is a suspension point. Implementations report failures as
/// [`WalletError::Transport`]; callers decide whether to log or propagate.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying connection. Default is a no-op.
    async fn connect(&self) -> Result<(), WalletError> {
        Ok(())
    }

    /// Close the underlying connection. Default is a no-op.
    async fn disconnect(&self) -> Result<(), WalletError> {
        Ok(())
    }

    /// Balances and txids of an address.
    async fn get_address_summary(&self, address: &str) -> Result<AddressSummary, WalletError>;

    /// Unspent outputs of an address.
    async fn get_utxo(&self, address: &str) -> Result<Vec<TransportUtxo>, WalletError>;

    /// Chain status.
    async fn get_status(&self) -> Result<ChainStatus, WalletError>;

    /// Best block height.
    async fn get_best_block_height(&self) -> Result<u32, WalletError>;

    /// Header of the block at `height`.
    async fn get_block_by_height(&self, height: u32) -> Result<BlockHeaderRecord, WalletError>;

    /// Header of the block with `hash`.
    async fn get_block_header_by_hash(&self, hash: &str) -> Result<BlockHeaderRecord, WalletError>;

    /// Full transaction record.
    async fn get_transaction(&self, txid: &str) -> Result<TransactionRecord, WalletError>;

    /// Broadcast a serialized transaction, returning its txid.
    async fn send_raw_transaction(
        &self,
        raw_hex: &str,
        instant_send: bool,
    ) -> Result<String, WalletError>;
}

/// Root of the derivable key tree handed out by a [`KeyChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedKey {
    /// Can derive hardened children and sign.
    Private(Xpriv),
    /// Can derive non-hardened children only.
    Public(Xpub),
}

/// Key material resolved for one path or address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    /// Derivation path, or `0` for single-key wallets.
    pub path: String,
    /// Compressed public key.
    pub public_key: PublicKey,
    /// Signing key; absent for watch-only wallets.
    pub private_key: Option<PrivateKey>,
    /// Encoded P2PKH address.
    pub address: String,
}

/// A transaction whose inputs are not yet signed, with the outputs they spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    /// Transaction with empty unlock scripts.
    pub tx: Transaction,
    /// Spent output of each input, in input order.
    pub prevouts: Vec<TxOut>,
}

/// Signing-key lookup and signing.
///
/// Key material is read-only after construction and safe to share across
/// threads; implementations cache derivations behind interior locks.
pub trait KeyChain: Send + Sync {
    /// Network the keys belong to.
    fn network(&self) -> Network;

    /// Kind of root material.
    fn wallet_type(&self) -> WalletType;

    /// Stable public identifier of the root material.
    fn root_public_bytes(&self) -> Vec<u8>;

    /// Key node at `m/44'/{coin}'`, the root of every account.
    fn get_hardened_feature_path(&self) -> Result<ExtendedKey, WalletError>;

    /// Derive (and cache) the key at `path`.
    fn get_for_path(&self, path: &str) -> Result<DerivedKey, WalletError>;

    /// Reverse lookup of a previously derived address.
    fn get_for_address(&self, address: &str) -> Option<DerivedKey>;

    /// Sign every input of `unsigned` with the matching key from `keys`.
    fn sign(
        &self,
        unsigned: UnsignedTransaction,
        keys: &[PrivateKey],
        sighash: EcdsaSighashType,
    ) -> Result<Transaction, WalletError>;
}
