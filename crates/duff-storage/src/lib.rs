//! # duff-storage — wallet state tree, balances and UTXO index.
//!
//! Single source of truth for wallet, account, address and transaction
//! state. Purely data: no network access.
//!
//! # Modules
//!
//! - [`storage`] — `Storage` tree, imports, balances, `get_utxos`, cache
//! - [`chain`] — per-network height and block header cache
//! - [`persistence`] — `StorageHandle`, `PersistenceAdapter`, file/memory adapters

pub mod chain;
pub mod persistence;
pub mod storage;

pub use chain::ChainStore;
pub use persistence::{FileAdapter, MemoryAdapter, PersistenceAdapter, StorageHandle};
pub use storage::{Storage, StorageSnapshot, WalletStore};
