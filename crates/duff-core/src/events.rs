//! Typed lifecycle events.
//!
//! Producers publish on `tokio::sync::broadcast` channels; subscribers match
//! on variants. A lagging subscriber loses old events, never blocks producers.

use serde::Serialize;

/// Capacity of every event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle step of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkerEventKind {
    /// The worker was started.
    Started,
    /// One `execute` run completed successfully.
    Executed,
    /// One `execute` run failed; the schedule continues.
    Failed(String),
    /// The worker was stopped and will not run again.
    Stopped,
}

/// Event emitted by the worker supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerEvent {
    /// Worker name.
    pub name: String,
    /// What happened.
    pub kind: WorkerEventKind,
}

/// Mutation applied to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StorageEvent {
    /// A wallet entry was created.
    WalletCreated { wallet_id: String },
    /// An account was imported.
    AccountImported { wallet_id: String, path: String },
    /// New addresses were imported.
    AddressesImported { wallet_id: String, count: usize },
    /// Fetched data was merged into an address.
    AddressUpdated { wallet_id: String, address: String },
    /// A transaction was imported or its confirmation changed.
    TransactionImported { txid: String },
    /// A block header was cached.
    BlockHeaderImported { height: u32 },
    /// Best chain height changed.
    ChainHeightUpdated { height: u32 },
    /// Spent outputs were removed after a broadcast.
    UtxosConsumed { wallet_id: String, count: usize },
    /// Fetch timestamps were reset.
    FetchReset { wallet_id: String },
    /// State was written through the persistence adapter.
    StateSaved,
}

/// Event emitted by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AccountEvent {
    /// The account was constructed.
    Created { index: u32 },
    /// Derivation and worker registration finished.
    Initialized { index: u32 },
    /// The first sync cycle finished.
    Ready { index: u32 },
    /// Workers stopped, transport closed and state saved.
    Disconnected { index: u32 },
    /// A transaction was accepted by the transport.
    TransactionBroadcast { txid: String },
    /// Worker lifecycle.
    Worker(WorkerEvent),
    /// Re-emitted storage mutation.
    Storage(StorageEvent),
}
