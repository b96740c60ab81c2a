//! Account facade.
//!
//! An [`Account`] binds one derivation root to shared storage, an optional
//! transport, a coin selection strategy and a supervisor of background
//! workers. Reads go straight to storage; transaction creation is fully
//! synchronous and never mutates storage. Only a successful
//! [`Account::broadcast_transaction`] consumes UTXOs.
//!
//! Lifecycle:
//! ```text
//! Uninitialized -> Initializing -> Initialized -> Ready -> Disconnecting -> Disconnected
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::Transaction;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::PrivateKey;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use duff_core::address::{DashAddress, decode_private_key};
use duff_core::amount::dash_to_duffs;
use duff_core::config::WalletConfig;
use duff_core::error::WalletError;
use duff_core::events::{AccountEvent, EVENT_CHANNEL_CAPACITY};
use duff_core::fee::FeeCategory;
use duff_core::path::account_path;
use duff_core::traits::{KeyChain, Transport};
use duff_core::types::{
    AccountRecord, AddressInfo, ChainStatus, ChainType, Network, PersistedCache, TransactionKind,
    TransactionRecord, TxInputRecord, TxOutputRecord, UnspentOutput, WalletType,
};
use duff_storage::StorageHandle;

use crate::builder::TransactionBuilder;
use crate::coin_selection::CoinSelectionStrategy;
use crate::deriver::AddressDeriver;
use crate::estimator::Output;
use crate::history::{HistoryEntry, build_history};
use crate::workers::{Supervisor, Worker, WorkerContext, WorkerState, default_workers, in_context};

/// Lifecycle state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccountState {
    /// Constructed, nothing derived yet.
    Uninitialized,
    /// Deriving addresses and registering workers.
    Initializing,
    /// Addresses derived, workers registered, not connected.
    Initialized,
    /// Connected; the first sync cycle has completed.
    Ready,
    /// Stopping workers and saving state.
    Disconnecting,
    /// Workers stopped, transport closed, state saved.
    Disconnected,
}

/// Which built-in workers an account runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Every built-in sync worker.
    #[default]
    Full,
    /// No built-in workers; only caller plugins run.
    Light,
}

/// Options for creating an account.
#[derive(Default)]
pub struct AccountOptions {
    /// BIP-44 account index. A wallet assigns the smallest unused index
    /// when this is `None`; a standalone account defaults to 0.
    pub index: Option<u32>,
    /// Optional user label.
    pub label: Option<String>,
    /// Strategy bound to the account.
    pub strategy: CoinSelectionStrategy,
    /// Sync mode.
    pub mode: SyncMode,
    /// Previously exported cache to import before derivation.
    pub cache: Option<PersistedCache>,
    /// Extra workers registered next to the built-ins.
    pub plugins: Vec<Arc<dyn Worker>>,
}

impl AccountOptions {
    /// Options for account `index`.
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Bind a coin selection strategy.
    pub fn with_strategy(mut self, strategy: CoinSelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Choose a sync mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Import `cache` at construction.
    pub fn with_cache(mut self, cache: PersistedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register an extra worker.
    pub fn with_plugin(mut self, plugin: Arc<dyn Worker>) -> Self {
        self.plugins.push(plugin);
        self
    }
}

impl std::fmt::Debug for AccountOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountOptions")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("strategy", &self.strategy)
            .field("mode", &self.mode)
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

/// Payment request for [`Account::create_transaction`].
///
/// Either a single `recipient` with `satoshis` (or `amount` in whole coins)
/// or an explicit `recipients` list.
#[derive(Debug, Clone, Default)]
pub struct CreateTransactionOptions {
    /// Single recipient address.
    pub recipient: Option<String>,
    /// Amount for `recipient` in duffs.
    pub satoshis: Option<u64>,
    /// Amount for `recipient` in whole coins, used when `satoshis` is unset.
    pub amount: Option<f64>,
    /// Explicit output list.
    pub recipients: Vec<Output>,
    /// UTXOs to spend instead of the account's own.
    pub utxos: Option<Vec<UnspentOutput>>,
    /// Change destination instead of the next unused internal address.
    pub change_address: Option<String>,
    /// Signing keys (WIF or hex) instead of the key chain's.
    pub private_keys: Option<Vec<String>>,
    /// Take the fee out of the first output.
    pub deduct_fee: bool,
    /// Pay the instant-send fee.
    pub is_instant_send: bool,
    /// Strategy for this payment only.
    pub strategy: Option<CoinSelectionStrategy>,
}

impl CreateTransactionOptions {
    /// Pay `satoshis` to `recipient`.
    pub fn to(recipient: impl Into<String>, satoshis: u64) -> Self {
        Self {
            recipient: Some(recipient.into()),
            satoshis: Some(satoshis),
            ..Self::default()
        }
    }

    /// Pay every output of `recipients`.
    pub fn to_many(recipients: impl IntoIterator<Item = Output>) -> Self {
        Self {
            recipients: recipients.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Take the fee out of the first output.
    pub fn deduct_fee(mut self) -> Self {
        self.deduct_fee = true;
        self
    }

    /// Pay the instant-send fee.
    pub fn instant_send(mut self) -> Self {
        self.is_instant_send = true;
        self
    }

    fn resolve_outputs(&self) -> Result<Vec<Output>, WalletError> {
        match (&self.recipient, self.recipients.is_empty()) {
            (Some(_), false) => Err(WalletError::Validation(
                "pass either a single recipient or a recipient list, not both".into(),
            )),
            (Some(recipient), true) => {
                let satoshis = match (self.satoshis, self.amount) {
                    (Some(s), _) => s,
                    (None, Some(amount)) => dash_to_duffs(amount)?,
                    (None, None) => {
                        return Err(WalletError::Validation(format!(
                            "no amount for recipient {recipient}"
                        )));
                    }
                };
                Ok(vec![Output::new(recipient.clone(), satoshis)])
            }
            (None, false) => Ok(self.recipients.clone()),
            (None, true) => Err(WalletError::Validation("no recipient".into())),
        }
    }
}

/// A signed transaction with the selection it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// The signed transaction.
    pub transaction: Transaction,
    /// Transaction id, hex.
    pub txid: String,
    /// Consensus serialization, hex.
    pub raw_hex: String,
    /// Fee paid.
    pub fee: u64,
    /// Category the fee was computed under.
    pub fee_category: FeeCategory,
    /// Spent UTXOs, in input order.
    pub inputs: Vec<UnspentOutput>,
    /// Payment outputs after any fee deduction.
    pub outputs: Vec<Output>,
    /// Change output, if any.
    pub change: Option<Output>,
}

/// One account of a wallet.
pub struct Account {
    ctx: Arc<WorkerContext>,
    keychain: Arc<dyn KeyChain>,
    label: Option<String>,
    strategy: CoinSelectionStrategy,
    builder: TransactionBuilder,
    supervisor: tokio::sync::Mutex<Supervisor>,
    state: watch::Sender<AccountState>,
    events: broadcast::Sender<AccountEvent>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Account {
    /// Create the account, import `options.cache`, derive its initial
    /// addresses and register its workers.
    ///
    /// Fails with [`WalletError::UnknownPlugin`] when a worker depends on one
    /// that is not registered.
    pub fn new(
        wallet_id: impl Into<String>,
        keychain: Arc<dyn KeyChain>,
        storage: StorageHandle,
        transport: Option<Arc<dyn Transport>>,
        config: Arc<WalletConfig>,
        options: AccountOptions,
    ) -> Result<Self, WalletError> {
        let wallet_id = wallet_id.into();
        let index = options.index.unwrap_or_default();
        let network = config.network;
        let wallet_type = keychain.wallet_type();
        if keychain.network() != network {
            return Err(WalletError::Validation(format!(
                "key chain is for {}, wallet is for {network}",
                keychain.network()
            )));
        }
        let path = match wallet_type {
            WalletType::SingleAddress => "0".to_string(),
            WalletType::HdPrivate | WalletType::HdPublic => account_path(network, index),
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(AccountState::Uninitialized);
        let _ = events.send(AccountEvent::Created { index });
        state.send_replace(AccountState::Initializing);

        {
            let mut store = storage.write();
            store.create_wallet(&wallet_id, network, wallet_type);
            store.import_accounts(
                &wallet_id,
                [AccountRecord {
                    index,
                    path: path.clone(),
                    label: options.label.clone(),
                    network,
                }],
            )?;
            if let Some(cache) = options.cache {
                store.import_cache(&wallet_id, cache)?;
            }
        }

        let deriver = AddressDeriver::new(Arc::clone(&keychain), path);
        let has_transport = transport.is_some();
        let ctx = Arc::new(WorkerContext::new(
            wallet_id,
            index,
            storage,
            transport,
            deriver,
            Arc::clone(&config),
        ));
        match wallet_type {
            WalletType::SingleAddress => {
                let info = ctx.deriver.derive(ChainType::Misc, 0)?;
                ctx.storage.write().import_single_address(&ctx.wallet_id, info)?;
            }
            WalletType::HdPrivate | WalletType::HdPublic => {
                ctx.ensure_gap(ChainType::External)?;
                ctx.ensure_gap(ChainType::Internal)?;
            }
        }

        let mut workers = match options.mode {
            SyncMode::Full => default_workers(&config, has_transport),
            SyncMode::Light => Vec::new(),
        };
        workers.extend(options.plugins);
        let supervisor = Supervisor::new(Arc::clone(&ctx), workers, events.clone())?;

        state.send_replace(AccountState::Initialized);
        let _ = events.send(AccountEvent::Initialized { index });
        info!(
            wallet_id = %ctx.wallet_id,
            index,
            path = %ctx.account_path(),
            workers = supervisor.order().len(),
            "account initialized"
        );

        Ok(Self {
            ctx,
            keychain,
            label: options.label,
            strategy: options.strategy.resolved(&config),
            builder: TransactionBuilder::new(network, config.fee_rates),
            supervisor: tokio::sync::Mutex::new(supervisor),
            state,
            events,
            forwarder: Mutex::new(None),
        })
    }

    // -- Identity -----------------------------------------------------------

    /// BIP-44 account index.
    pub fn index(&self) -> u32 {
        self.ctx.account_index
    }

    /// Owning wallet id.
    pub fn wallet_id(&self) -> &str {
        &self.ctx.wallet_id
    }

    /// Derivation root, or `0` for single-address wallets.
    pub fn path(&self) -> &str {
        self.ctx.account_path()
    }

    /// Network of the account.
    pub fn network(&self) -> Network {
        self.ctx.network
    }

    /// Kind of root material.
    pub fn wallet_type(&self) -> WalletType {
        self.keychain.wallet_type()
    }

    /// User label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Bound coin selection strategy.
    pub fn strategy(&self) -> &CoinSelectionStrategy {
        &self.strategy
    }

    /// Shared storage.
    pub fn storage(&self) -> &StorageHandle {
        &self.ctx.storage
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> AccountState {
        *self.state.borrow()
    }

    /// Subscribe to account, worker and (while connected) storage events.
    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.events.subscribe()
    }

    /// Resolves once the account has been initialized.
    pub async fn is_initialized(&self) -> bool {
        let mut rx = self.state.subscribe();
        rx.wait_for(|s| *s >= AccountState::Initialized).await.is_ok()
    }

    /// Resolves once the account is ready, or with `false` once it starts
    /// disconnecting without having become ready.
    pub async fn is_ready(&self) -> bool {
        let mut rx = self.state.subscribe();
        match rx
            .wait_for(|s| *s == AccountState::Ready || *s >= AccountState::Disconnecting)
            .await
        {
            Ok(state) => *state == AccountState::Ready,
            Err(_) => false,
        }
    }

    /// Connect the transport, forward storage events and start every worker.
    ///
    /// Returns once the first sync cycle has run.
    pub async fn connect(&self) -> Result<(), WalletError> {
        if self.state() == AccountState::Ready {
            return Ok(());
        }
        if let Some(transport) = &self.ctx.transport {
            transport.connect().await.map_err(|e| in_context("connect", e))?;
        }
        self.spawn_forwarder();
        self.supervisor.lock().await.start_all().await?;

        self.state.send_replace(AccountState::Ready);
        let _ = self.events.send(AccountEvent::Ready { index: self.index() });
        info!(wallet_id = %self.ctx.wallet_id, index = self.index(), "account ready");
        Ok(())
    }

    /// Stop every worker, close the transport, then save state.
    ///
    /// No worker execution is in flight when state is saved.
    pub async fn disconnect(&self) -> Result<(), WalletError> {
        if self.state() == AccountState::Disconnected {
            return Ok(());
        }
        self.state.send_replace(AccountState::Disconnecting);
        self.supervisor.lock().await.stop_all().await;
        if let Some(transport) = &self.ctx.transport {
            if let Err(e) = transport.disconnect().await {
                warn!(error = %e, "transport disconnect failed");
            }
        }
        let saved = self.ctx.storage.save_state().await?;
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }

        self.state.send_replace(AccountState::Disconnected);
        let _ = self.events.send(AccountEvent::Disconnected { index: self.index() });
        info!(wallet_id = %self.ctx.wallet_id, index = self.index(), saved, "account disconnected");
        Ok(())
    }

    fn spawn_forwarder(&self) {
        let mut slot = self.forwarder.lock();
        if slot.is_some() {
            return;
        }
        let mut rx = self.ctx.storage.subscribe();
        let events = self.events.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = events.send(AccountEvent::Storage(event));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "storage event forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Run a worker once now.
    pub async fn execute_worker(&self, name: &str) -> Result<(), WalletError> {
        self.supervisor.lock().await.execute(name).await
    }

    /// State of a registered worker.
    pub async fn worker_state(&self, name: &str) -> Option<WorkerState> {
        self.supervisor.lock().await.state(name)
    }

    /// Registered worker names, dependencies first.
    pub async fn worker_order(&self) -> Vec<String> {
        self.supervisor.lock().await.order().to_vec()
    }

    // -- Addresses ----------------------------------------------------------

    /// Address `index` on `chain`, derived and imported on first use.
    pub fn get_address(&self, index: u32, chain: ChainType) -> Result<AddressInfo, WalletError> {
        let chain = self.effective_chain(chain);
        let path = self.ctx.deriver.path_for(chain, index)?;
        if let Some(info) = self
            .ctx
            .storage
            .read()
            .wallet(&self.ctx.wallet_id)?
            .addresses
            .chain(chain)
            .get(&path)
        {
            return Ok(info.clone());
        }
        let info = self.ctx.deriver.derive(chain, index)?;
        self.ctx
            .storage
            .write()
            .import_addresses(&self.ctx.wallet_id, [info.clone()])?;
        Ok(info)
    }

    /// Every stored address of `chain`, ordered by index.
    pub fn get_addresses(&self, chain: ChainType) -> Result<Vec<AddressInfo>, WalletError> {
        self.ctx
            .storage
            .read()
            .account_chain(&self.ctx.wallet_id, self.path(), self.effective_chain(chain))
    }

    /// The `skip`-th unused address of `chain`, deriving past the end of
    /// the chain when there are not enough. Indices are never reused.
    pub fn get_unused_address(&self, chain: ChainType, skip: usize) -> Result<AddressInfo, WalletError> {
        if self.wallet_type() == WalletType::SingleAddress {
            return self.get_address(0, ChainType::Misc);
        }
        let existing = self.get_addresses(chain)?;
        let unused: Vec<&AddressInfo> = existing.iter().filter(|a| !a.used).collect();
        if let Some(info) = unused.get(skip) {
            return Ok((*info).clone());
        }
        let next = existing.last().map_or(0, |a| a.index + 1);
        let missing = u32::try_from(skip + 1 - unused.len())
            .map_err(|_| WalletError::Validation(format!("skip {skip} is too large")))?;
        let mut derived = self.ctx.deriver.derive_range(chain, next, missing)?;
        self.ctx
            .storage
            .write()
            .import_addresses(&self.ctx.wallet_id, derived.clone())?;
        derived
            .pop()
            .ok_or_else(|| WalletError::KeyDerivation(format!("no address derived on {chain:?}")))
    }

    /// Next unused change address, without importing anything.
    fn peek_change_address(&self) -> Result<String, WalletError> {
        if self.wallet_type() == WalletType::SingleAddress {
            return Ok(self.get_address(0, ChainType::Misc)?.address);
        }
        let internal = self.get_addresses(ChainType::Internal)?;
        if let Some(info) = internal.iter().find(|a| !a.used) {
            return Ok(info.address.clone());
        }
        let next = internal.last().map_or(0, |a| a.index + 1);
        Ok(self.ctx.deriver.derive(ChainType::Internal, next)?.address)
    }

    fn effective_chain(&self, chain: ChainType) -> ChainType {
        match self.wallet_type() {
            WalletType::SingleAddress => ChainType::Misc,
            _ => chain,
        }
    }

    /// Signing keys for `addresses`. Addresses the key chain cannot
    /// resolve are skipped.
    pub fn get_private_keys<S: AsRef<str>>(&self, addresses: &[S]) -> Vec<PrivateKey> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for address in addresses {
            let address = address.as_ref();
            if !seen.insert(address) {
                continue;
            }
            let derived = self.keychain.get_for_address(address).or_else(|| {
                let path = self
                    .ctx
                    .storage
                    .read()
                    .find_address(&self.ctx.wallet_id, address)
                    .map(|a| a.path.clone())?;
                self.keychain.get_for_path(&path).ok()
            });
            match derived.and_then(|d| d.private_key) {
                Some(key) => keys.push(key),
                None => debug!(address, "no signing key"),
            }
        }
        keys
    }

    // -- Balances & UTXOs ---------------------------------------------------

    /// Spendable outputs of the account, largest first.
    pub fn get_utxos(&self) -> Result<Vec<UnspentOutput>, WalletError> {
        self.ctx.storage.read().get_utxos(&self.ctx.wallet_id, self.path())
    }

    /// Confirmed balance in duffs.
    pub fn get_confirmed_balance(&self) -> Result<u64, WalletError> {
        self.ctx
            .storage
            .read()
            .get_confirmed_balance(&self.ctx.wallet_id, self.index())
    }

    /// Unconfirmed balance in duffs.
    pub fn get_unconfirmed_balance(&self) -> Result<u64, WalletError> {
        self.ctx
            .storage
            .read()
            .get_unconfirmed_balance(&self.ctx.wallet_id, self.index())
    }

    /// Confirmed plus unconfirmed balance in duffs.
    pub fn get_total_balance(&self) -> Result<u64, WalletError> {
        self.ctx
            .storage
            .read()
            .get_total_balance(&self.ctx.wallet_id, self.index())
    }

    // -- Transactions -------------------------------------------------------

    /// Known transactions touching the account.
    pub fn get_transactions(&self) -> Result<Vec<TransactionRecord>, WalletError> {
        Ok(self
            .ctx
            .storage
            .read()
            .account_transactions(&self.ctx.wallet_id, self.path())?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Transactions classified against the account's addresses, newest first.
    pub fn get_transaction_history(&self) -> Result<Vec<HistoryEntry>, WalletError> {
        let storage = self.ctx.storage.read();
        let own: HashSet<String> = storage
            .wallet(&self.ctx.wallet_id)?
            .account_addresses(self.path())
            .map(|a| a.address.clone())
            .collect();
        let transactions = storage.account_transactions(&self.ctx.wallet_id, self.path())?;
        Ok(build_history(transactions, &own))
    }

    /// Select coins, build and sign a payment.
    ///
    /// Every failure is wrapped in [`WalletError::TransactionConstruction`].
    /// Storage is never modified.
    pub fn create_transaction(&self, opts: CreateTransactionOptions) -> Result<SignedTransaction, WalletError> {
        self.build_transaction(&opts).map_err(WalletError::construction)
    }

    fn build_transaction(&self, opts: &CreateTransactionOptions) -> Result<SignedTransaction, WalletError> {
        let network = self.network();
        let outputs = opts.resolve_outputs()?;
        for output in &outputs {
            DashAddress::parse_for(&output.address, network)?;
            if output.satoshis == 0 {
                return Err(WalletError::Validation(format!(
                    "output to {} has no value",
                    output.address
                )));
            }
        }

        let utxos = match &opts.utxos {
            Some(utxos) => utxos.clone(),
            None => self.get_utxos()?,
        };
        let fee_category = if opts.is_instant_send {
            FeeCategory::Instant
        } else {
            self.ctx.config.default_fee_category
        };
        let strategy = match &opts.strategy {
            Some(strategy) => strategy.resolved(&self.ctx.config),
            None => self.strategy.clone(),
        };
        let selection = strategy.select(
            &utxos,
            &outputs,
            opts.deduct_fee,
            fee_category,
            &self.ctx.config.fee_rates,
        )?;

        let change_address = match &opts.change_address {
            Some(address) => {
                DashAddress::parse_for(address, network)?;
                address.clone()
            }
            None => self.peek_change_address()?,
        };
        let plan = self.builder.plan(&selection, &change_address)?;

        let keys = match &opts.private_keys {
            Some(raw) => raw
                .iter()
                .map(|k| decode_private_key(k, network))
                .collect::<Result<Vec<_>, _>>()?,
            None => {
                let addresses: Vec<&str> = plan.inputs.iter().map(|u| u.address.as_str()).collect();
                self.get_private_keys(&addresses)
            }
        };
        let transaction = self
            .keychain
            .sign(plan.unsigned, &keys, EcdsaSighashType::All)?;

        let signed = SignedTransaction {
            txid: transaction.compute_txid().to_string(),
            raw_hex: serialize_hex(&transaction),
            transaction,
            fee: plan.fee,
            fee_category,
            inputs: plan.inputs,
            outputs: plan.outputs,
            change: plan.change,
        };
        debug!(
            txid = %signed.txid,
            strategy = strategy.name(),
            inputs = signed.inputs.len(),
            fee = signed.fee,
            "transaction created"
        );
        Ok(signed)
    }

    /// Send `tx` through the transport. Only after the transport accepts it
    /// are its inputs removed from storage and the transaction recorded.
    pub async fn broadcast_transaction(&self, tx: &SignedTransaction, instant_send: bool) -> Result<String, WalletError> {
        let transport = self.ctx.transport("broadcast_transaction")?;
        let txid = transport
            .send_raw_transaction(&tx.raw_hex, instant_send)
            .await
            .map_err(|e| in_context(&tx.txid, e))?;
        if txid != tx.txid {
            warn!(expected = %tx.txid, reported = %txid, "transport reported a different txid");
        }

        let spent: Vec<(String, u32)> = tx
            .inputs
            .iter()
            .map(|u| (u.tx_id.clone(), u.output_index))
            .collect();
        let record = self.pending_record(tx);
        {
            let mut storage = self.ctx.storage.write();
            storage.consume_utxos(&self.ctx.wallet_id, &spent)?;
            storage.import_transactions([record])?;
            storage.link_transaction(&self.ctx.wallet_id, &tx.txid)?;
        }
        let _ = self.events.send(AccountEvent::TransactionBroadcast {
            txid: tx.txid.clone(),
        });
        info!(txid = %tx.txid, inputs = spent.len(), fee = tx.fee, "transaction broadcast");
        Ok(txid)
    }

    fn pending_record(&self, tx: &SignedTransaction) -> TransactionRecord {
        TransactionRecord {
            txid: tx.txid.clone(),
            raw: Some(tx.raw_hex.clone()),
            block_hash: None,
            block_height: None,
            time: Some(chrono::Utc::now().timestamp()),
            fee: Some(tx.fee),
            inputs: tx
                .inputs
                .iter()
                .map(|u| TxInputRecord {
                    txid: Some(u.tx_id.clone()),
                    output_index: u.output_index,
                    address: Some(u.address.clone()),
                    satoshis: Some(u.satoshis),
                })
                .collect(),
            outputs: tx
                .transaction
                .output
                .iter()
                .map(|o| TxOutputRecord {
                    address: DashAddress::from_script(&o.script_pubkey, self.network())
                        .map(|a| a.to_string()),
                    satoshis: o.value.to_sat(),
                    script: o.script_pubkey.to_hex_string(),
                })
                .collect(),
            kind: TransactionKind::Standard,
        }
    }

    // -- Sync ---------------------------------------------------------------

    /// Chain status from the transport.
    pub async fn fetch_status(&self) -> Result<ChainStatus, WalletError> {
        self.ctx.fetch_status().await
    }

    /// Fetch one address now and merge the result into storage.
    pub async fn fetch_address_info(&self, address: &str, fetch_utxo: bool) -> Result<AddressInfo, WalletError> {
        self.ctx.fetch_address_info(address, fetch_utxo).await
    }

    /// Mark every address stale so the next sync re-fetches it.
    pub fn force_refresh_account(&self) -> Result<(), WalletError> {
        self.ctx.storage.write().reset_fetched_last(&self.ctx.wallet_id)
    }

    /// Export the wallet's addresses and transactions.
    pub fn export_cache(&self) -> Result<PersistedCache, WalletError> {
        self.ctx.storage.read().export_cache(&self.ctx.wallet_id)
    }
}

impl Drop for Account {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("wallet_id", &self.ctx.wallet_id)
            .field("index", &self.ctx.account_index)
            .field("path", &self.ctx.account_path())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
