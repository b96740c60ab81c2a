//! # duff-wallet — HD wallet engine with pluggable coin selection.
//!
//! Provides BIP-39/BIP-44 key management, address derivation with gap-limit
//! discovery, coin selection strategies, fee estimation, transaction
//! building and signing, background sync workers, and encrypted wallet
//! files.
//!
//! # Modules
//!
//! - [`mnemonic`] — BIP-39 generation and seed derivation
//! - [`keys`] — `HdKeyChain` over master, account or single-key material
//! - [`deriver`] — BIP-44 address derivation for one account
//! - [`estimator`] — size and fee estimation
//! - [`coin_selection`] — accumulator strategies
//! - [`builder`] — change, dust and fee-deduction planning
//! - [`history`] — transaction history classification
//! - [`workers`] — sync workers and their supervisor
//! - [`account`] — the per-account facade
//! - [`encryption`] — Argon2id + AES-256-GCM wallet file encryption
//! - [`wallet`] — high-level wallet composition

pub mod account;
pub mod builder;
pub mod coin_selection;
pub mod deriver;
pub mod encryption;
pub mod estimator;
pub mod history;
pub mod keys;
pub mod mnemonic;
pub mod wallet;
pub mod workers;

// Re-exports for convenient access
pub use account::{
    Account, AccountOptions, AccountState, CreateTransactionOptions, SignedTransaction, SyncMode,
};
pub use builder::{PlannedTransaction, TransactionBuilder};
pub use coin_selection::{CoinSelectionStrategy, SelectionResult};
pub use deriver::AddressDeriver;
pub use encryption::{decrypt, encrypt};
pub use estimator::{Output, ScriptType, TransactionEstimator};
pub use history::{HistoryEntry, HistoryKind};
pub use keys::{HdKeyChain, Seed, SeedBytes};
pub use mnemonic::{WordCount, generate_mnemonic};
pub use wallet::{SavedAccount, Wallet, WalletSecret};
pub use workers::{Supervisor, Worker, WorkerContext, WorkerDescriptor, WorkerState};
