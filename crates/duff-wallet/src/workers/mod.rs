//! Background synchronization workers.
//!
//! A [`Worker`] declares a [`WorkerDescriptor`] (name, dependencies,
//! execute-on-start flag, interval) and an `execute` step. The
//! [`Supervisor`] resolves the dependency graph once, starts workers in
//! topological order and runs each on its own interval. Every worker of an
//! account shares one [`WorkerContext`].

mod address_discovery;
mod address_sync;
mod block_headers;
mod chain_watcher;
mod supervisor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use duff_core::config::WalletConfig;
use duff_core::error::WalletError;
use duff_core::traits::Transport;
use duff_core::types::{AddressInfo, ChainStatus, ChainType, Network};
use duff_storage::StorageHandle;

use crate::deriver::AddressDeriver;

pub use address_discovery::{ADDRESS_DISCOVERY, AddressDiscovery};
pub use address_sync::{ADDRESS_SYNC, AddressSync};
pub use block_headers::{BLOCK_HEADERS, BlockHeaders};
pub use chain_watcher::{CHAIN_WATCHER, ChainWatcher};
pub use supervisor::{Supervisor, WorkerState};

/// Static declaration of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    /// Unique name within an account.
    pub name: String,
    /// Workers that must already be running.
    pub dependencies: Vec<String>,
    /// Run once immediately at start.
    pub execute_on_start: bool,
    /// Delay between runs.
    pub interval: Duration,
}

impl WorkerDescriptor {
    /// Descriptor with no dependencies.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            execute_on_start: false,
            interval,
        }
    }

    /// Declare dependencies.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Run immediately at start.
    pub fn execute_on_start(mut self) -> Self {
        self.execute_on_start = true;
        self
    }
}

/// A background task run on an interval.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name, dependencies and schedule.
    fn descriptor(&self) -> WorkerDescriptor;

    /// One run. Errors are logged by the supervisor and never stop the
    /// schedule.
    async fn execute(&self, ctx: &WorkerContext) -> Result<(), WalletError>;
}

/// Per-address async locks.
#[derive(Debug, Default)]
struct AddressLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AddressLocks {
    fn get(&self, address: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

/// Account state shared by the account facade and its workers.
pub struct WorkerContext {
    /// Owning wallet.
    pub wallet_id: String,
    /// Account index.
    pub account_index: u32,
    /// Network of the account.
    pub network: Network,
    /// Shared storage.
    pub storage: StorageHandle,
    /// Chain data source, if any.
    pub transport: Option<Arc<dyn Transport>>,
    /// Address derivation for the account.
    pub deriver: AddressDeriver,
    /// Wallet configuration.
    pub config: Arc<WalletConfig>,
    locks: AddressLocks,
}

impl WorkerContext {
    /// Context for one account.
    pub fn new(
        wallet_id: impl Into<String>,
        account_index: u32,
        storage: StorageHandle,
        transport: Option<Arc<dyn Transport>>,
        deriver: AddressDeriver,
        config: Arc<WalletConfig>,
    ) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            account_index,
            network: config.network,
            storage,
            transport,
            deriver,
            config,
            locks: AddressLocks::default(),
        }
    }

    /// Account root path.
    pub fn account_path(&self) -> &str {
        self.deriver.account_path()
    }

    /// The transport, or [`WalletError::TransportRequired`] for `operation`.
    pub fn transport(&self, operation: &str) -> Result<&Arc<dyn Transport>, WalletError> {
        self.transport
            .as_ref()
            .ok_or_else(|| WalletError::TransportRequired(operation.to_string()))
    }

    /// Chain status, falling back to the best block height.
    pub async fn fetch_status(&self) -> Result<ChainStatus, WalletError> {
        let transport = self.transport("fetch_status")?;
        match transport.get_status().await {
            Ok(status) => Ok(status),
            Err(e) => {
                debug!(error = %e, "status unavailable, falling back to best block height");
                let blocks = transport
                    .get_best_block_height()
                    .await
                    .map_err(|e| in_context("best block height", e))?;
                Ok(ChainStatus { blocks })
            }
        }
    }

    /// Fetch an address's summary (and UTXOs when `fetch_utxo`) and merge it
    /// into storage, importing any transactions not yet known.
    ///
    /// Fetches of one address never overlap.
    pub async fn fetch_address_info(&self, address: &str, fetch_utxo: bool) -> Result<AddressInfo, WalletError> {
        let transport = self.transport("fetch_address_info")?;
        let lock = self.locks.get(address);
        let _guard = lock.lock().await;

        let summary = transport
            .get_address_summary(address)
            .await
            .map_err(|e| in_context(address, e))?;
        let utxos = if fetch_utxo {
            Some(
                transport
                    .get_utxo(address)
                    .await
                    .map_err(|e| in_context(address, e))?,
            )
        } else {
            None
        };

        let unknown: Vec<String> = {
            let storage = self.storage.read();
            summary
                .transactions
                .iter()
                .filter(|txid| !storage.has_transaction(txid))
                .cloned()
                .collect()
        };
        let mut records = Vec::with_capacity(unknown.len());
        for txid in &unknown {
            let record = transport
                .get_transaction(txid)
                .await
                .map_err(|e| in_context(txid, e))?;
            records.push(record);
        }

        let mut storage = self.storage.write();
        if !records.is_empty() {
            storage.import_transactions(records)?;
        }
        storage.apply_address_fetch(&self.wallet_id, address, summary, utxos, now_millis())?;
        storage
            .find_address(&self.wallet_id, address)
            .cloned()
            .ok_or_else(|| WalletError::Validation(format!("address {address} is not tracked")))
    }

    /// Derive ahead on `chain` until `gap_limit` unused addresses follow the
    /// last used one. Returns the number of new addresses.
    pub fn ensure_gap(&self, chain: ChainType) -> Result<usize, WalletError> {
        let existing = self
            .storage
            .read()
            .account_chain(&self.wallet_id, self.account_path(), chain)?;
        let next_index = existing.last().map_or(0, |a| a.index + 1);
        let trailing_unused = match existing.iter().rposition(|a| a.used) {
            Some(pos) => existing.len() - pos - 1,
            None => existing.len(),
        };
        let missing = self.config.gap_limit.saturating_sub(trailing_unused as u32);
        if missing == 0 {
            return Ok(0);
        }
        let derived = self.deriver.derive_range(chain, next_index, missing)?;
        self.storage.write().import_addresses(&self.wallet_id, derived)
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("wallet_id", &self.wallet_id)
            .field("account_index", &self.account_index)
            .field("has_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

/// Attach `context` to a transport failure.
pub(crate) fn in_context(context: &str, error: WalletError) -> WalletError {
    match error {
        WalletError::Transport { message, .. } => WalletError::Transport {
            context: context.to_string(),
            message,
        },
        other => WalletError::transport(context, other),
    }
}

/// Current unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Built-in sync workers. Workers that talk to the chain are only included
/// when a transport is available.
pub fn default_workers(config: &WalletConfig, has_transport: bool) -> Vec<Arc<dyn Worker>> {
    let mut workers: Vec<Arc<dyn Worker>> = vec![Arc::new(AddressDiscovery::new(config.sync_interval()))];
    if has_transport {
        workers.push(Arc::new(ChainWatcher::new(config.sync_interval())));
        workers.push(Arc::new(AddressSync::new(config.sync_interval())));
        workers.push(Arc::new(BlockHeaders::new(config.headers_interval())));
    }
    workers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::HdKeyChain;
    use duff_core::path::account_path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use duff_core::types::{
        AddressSummary, BlockHeaderRecord, TransactionRecord, TransportUtxo, WalletType,
    };
    use duff_storage::Storage;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    /// Answers summary requests slowly and records how many overlap.
    #[derive(Default)]
    struct SlowSummaries {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transport for SlowSummaries {
        async fn get_address_summary(&self, _address: &str) -> Result<AddressSummary, WalletError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(AddressSummary::default())
        }

        async fn get_utxo(&self, _address: &str) -> Result<Vec<TransportUtxo>, WalletError> {
            Ok(Vec::new())
        }

        async fn get_status(&self) -> Result<ChainStatus, WalletError> {
            Ok(ChainStatus { blocks: 1 })
        }

        async fn get_best_block_height(&self) -> Result<u32, WalletError> {
            Ok(1)
        }

        async fn get_block_by_height(&self, height: u32) -> Result<BlockHeaderRecord, WalletError> {
            Err(WalletError::transport("slow", format!("no block at {height}")))
        }

        async fn get_block_header_by_hash(&self, hash: &str) -> Result<BlockHeaderRecord, WalletError> {
            Err(WalletError::transport("slow", format!("no block {hash}")))
        }

        async fn get_transaction(&self, txid: &str) -> Result<TransactionRecord, WalletError> {
            Err(WalletError::transport("slow", format!("no transaction {txid}")))
        }

        async fn send_raw_transaction(&self, _raw_hex: &str, _instant_send: bool) -> Result<String, WalletError> {
            Err(WalletError::transport("slow", "read only"))
        }
    }

    fn ctx(gap_limit: u32) -> WorkerContext {
        ctx_with(gap_limit, None)
    }

    fn ctx_with(gap_limit: u32, transport: Option<Arc<dyn Transport>>) -> WorkerContext {
        let kc = HdKeyChain::from_mnemonic(ABANDON, "", Network::Testnet).unwrap();
        let deriver = AddressDeriver::new(Arc::new(kc), account_path(Network::Testnet, 0));
        let storage = StorageHandle::new(Storage::new());
        storage
            .write()
            .create_wallet("w", Network::Testnet, WalletType::HdPrivate);
        let config = WalletConfig {
            gap_limit,
            ..WalletConfig::default()
        };
        WorkerContext::new("w", 0, storage, transport, deriver, Arc::new(config))
    }

    #[test]
    fn ensure_gap_fills_empty_chain() {
        let ctx = ctx(5);
        assert_eq!(ctx.ensure_gap(ChainType::External).unwrap(), 5);
        assert_eq!(ctx.ensure_gap(ChainType::External).unwrap(), 0);
        let chain = ctx
            .storage
            .read()
            .account_chain("w", ctx.account_path(), ChainType::External)
            .unwrap();
        assert_eq!(chain.len(), 5);
        assert_eq!(chain[4].index, 4);
    }

    #[test]
    fn ensure_gap_extends_after_use() {
        let ctx = ctx(3);
        ctx.ensure_gap(ChainType::Internal).unwrap();
        let second = ctx
            .storage
            .read()
            .account_chain("w", ctx.account_path(), ChainType::Internal)
            .unwrap()[1]
            .address
            .clone();
        let summary = AddressSummary {
            balance_sat: 10,
            unconfirmed_balance_sat: 0,
            transactions: vec!["ab".repeat(32)],
        };
        ctx.storage
            .write()
            .apply_address_fetch("w", &second, summary, None, 1)
            .unwrap();
        // Index 1 used: indices 2..=4 must be unused.
        assert_eq!(ctx.ensure_gap(ChainType::Internal).unwrap(), 2);
    }

    #[tokio::test]
    async fn fetches_need_a_transport() {
        let ctx = ctx(1);
        assert!(matches!(
            ctx.fetch_status().await,
            Err(WalletError::TransportRequired(_))
        ));
        assert!(matches!(
            ctx.fetch_address_info("yAddr", true).await,
            Err(WalletError::TransportRequired(_))
        ));
    }

    #[tokio::test]
    async fn fetches_of_one_address_do_not_overlap() {
        let transport = Arc::new(SlowSummaries::default());
        let ctx = ctx_with(2, Some(transport.clone()));
        ctx.ensure_gap(ChainType::External).unwrap();
        let chain = ctx
            .storage
            .read()
            .account_chain("w", ctx.account_path(), ChainType::External)
            .unwrap();
        let (first, second) = (chain[0].address.clone(), chain[1].address.clone());

        let (a, b) = tokio::join!(
            ctx.fetch_address_info(&first, true),
            ctx.fetch_address_info(&first, true)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);

        let (a, b) = tokio::join!(
            ctx.fetch_address_info(&first, false),
            ctx.fetch_address_info(&second, false)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_workers_without_transport() {
        let names: Vec<String> = default_workers(&WalletConfig::default(), false)
            .iter()
            .map(|w| w.descriptor().name)
            .collect();
        assert_eq!(names, vec![ADDRESS_DISCOVERY.to_string()]);
        assert_eq!(default_workers(&WalletConfig::default(), true).len(), 4);
    }

    #[test]
    fn transport_errors_take_new_context() {
        let err = in_context("yAddr", WalletError::transport("inner", "timeout"));
        assert_eq!(err.to_string(), "transport error (yAddr): timeout");
    }
}
