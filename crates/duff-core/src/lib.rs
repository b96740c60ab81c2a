//! # duff-core — shared types and traits for the Duff wallet engine.
//!
//! # Modules
//!
//! - [`types`] — address chains, UTXOs, transaction records, cache shape
//! - [`error`] — `WalletError` taxonomy
//! - [`traits`] — `Transport` and `KeyChain` contracts
//! - [`events`] — typed account, worker and storage events
//! - [`address`] — Dash base58 addresses and WIF keys
//! - [`path`] — BIP-44 path helpers
//! - [`fee`] — fee categories and rate table
//! - [`config`] — per-wallet `WalletConfig`
//! - [`amount`] — coin/duff conversion
//! - [`constants`] — protocol constants

pub mod address;
pub mod amount;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod fee;
pub mod path;
pub mod traits;
pub mod types;

pub use address::DashAddress;
pub use config::WalletConfig;
pub use error::WalletError;
pub use events::{AccountEvent, StorageEvent, WorkerEvent, WorkerEventKind};
pub use fee::{FeeCategory, FeeRates};
pub use traits::{DerivedKey, ExtendedKey, KeyChain, Transport, UnsignedTransaction};
pub use types::{
    AccountRecord, AddressChainMap, AddressInfo, AddressSummary, BalanceMode, BlockHeaderRecord,
    ChainStatus, ChainType, Network, PersistedCache, TransactionKind, TransactionRecord,
    TransportUtxo, UnspentOutput, UtxoEntry, WalletType,
};

/// Re-export of the primitives library so dependents agree on one version.
pub use bitcoin;
