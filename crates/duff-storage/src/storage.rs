//! In-memory wallet state tree.
//!
//! Layout: wallet id → { accounts by path, address chains by path } plus a
//! global transaction index and one [`ChainStore`] per network. All mutation
//! goes through the `import_*`/`apply_*` methods, which are idempotent
//! merges and publish a [`StorageEvent`] for every effective change.
//!
//! `Storage` never touches the network. Sharing across tasks is done through
//! [`StorageHandle`](crate::StorageHandle), which serializes writers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use duff_core::constants::COINBASE_MATURITY;
use duff_core::error::WalletError;
use duff_core::events::{EVENT_CHANNEL_CAPACITY, StorageEvent};
use duff_core::path;
use duff_core::types::{
    AccountRecord, AddressChainMap, AddressInfo, AddressSummary, BalanceMode, BlockHeaderRecord,
    ChainType, Network, PersistedCache, TransactionKind, TransactionRecord, TransportUtxo,
    UnspentOutput, UtxoEntry, WalletType, utxo_key,
};

use crate::chain::ChainStore;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything stored for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStore {
    /// Wallet id.
    pub wallet_id: String,
    /// Network of the wallet.
    pub network: Network,
    /// Kind of root material.
    pub wallet_type: WalletType,
    /// Accounts keyed by derivation root.
    pub accounts: BTreeMap<String, AccountRecord>,
    /// Address chains.
    pub addresses: AddressChainMap,
}

impl WalletStore {
    fn new(wallet_id: &str, network: Network, wallet_type: WalletType) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            network,
            wallet_type,
            accounts: BTreeMap::new(),
            addresses: AddressChainMap::default(),
        }
    }

    /// Addresses visible to the account rooted at `account_path`.
    ///
    /// Single-address wallets have no account tree, so every address is
    /// visible.
    pub fn account_addresses<'a>(
        &'a self,
        account_path: &'a str,
    ) -> impl Iterator<Item = &'a AddressInfo> + 'a {
        let all = self.wallet_type == WalletType::SingleAddress;
        self.addresses
            .iter()
            .filter(move |a| all || path::is_under_account(&a.path, account_path))
    }

    /// Addresses whose path carries `account_index`.
    ///
    /// Single-address wallets include every address.
    pub fn addresses_for_index(&self, account_index: u32) -> impl Iterator<Item = &AddressInfo> {
        let all = self.wallet_type == WalletType::SingleAddress;
        self.addresses
            .iter()
            .filter(move |a| all || path::account_index(&a.path) == Some(account_index))
    }

    fn find_address_mut(&mut self, address: &str) -> Option<&mut AddressInfo> {
        self.addresses.iter_mut().find(|a| a.address == address)
    }
}

/// Serializable image of a [`Storage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSnapshot {
    /// Format version.
    pub version: u32,
    /// Wallets by id.
    pub wallets: BTreeMap<String, WalletStore>,
    /// Transactions by txid.
    pub transactions: BTreeMap<String, TransactionRecord>,
    /// One chain store per network.
    pub chains: Vec<ChainStore>,
}

/// Wallet state tree.
pub struct Storage {
    wallets: BTreeMap<String, WalletStore>,
    transactions: BTreeMap<String, TransactionRecord>,
    chains: HashMap<Network, ChainStore>,
    coinbase_maturity: u32,
    events: broadcast::Sender<StorageEvent>,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    /// Empty storage.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            wallets: BTreeMap::new(),
            transactions: BTreeMap::new(),
            chains: HashMap::new(),
            coinbase_maturity: COINBASE_MATURITY,
            events,
        }
    }

    /// Override the coinbase maturity used by [`Storage::get_utxos`].
    pub fn with_coinbase_maturity(mut self, confirmations: u32) -> Self {
        self.set_coinbase_maturity(confirmations);
        self
    }

    /// Confirmations a coinbase output needs before it is spendable.
    pub fn coinbase_maturity(&self) -> u32 {
        self.coinbase_maturity
    }

    /// Change the coinbase maturity in place.
    pub fn set_coinbase_maturity(&mut self, confirmations: u32) {
        self.coinbase_maturity = confirmations;
    }

    /// Rebuild storage from a snapshot. Coinbase maturity is not part of the
    /// snapshot and starts at the default.
    pub fn from_snapshot(snapshot: StorageSnapshot) -> Result<Self, WalletError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(WalletError::Persistence(format!(
                "unsupported snapshot version: {}",
                snapshot.version
            )));
        }
        let mut storage = Self::new();
        storage.wallets = snapshot.wallets;
        storage.transactions = snapshot.transactions;
        storage.chains = snapshot
            .chains
            .into_iter()
            .map(|c| (c.network(), c))
            .collect();
        Ok(storage)
    }

    /// Serializable image of the current state.
    pub fn snapshot(&self) -> StorageSnapshot {
        let mut chains: Vec<ChainStore> = self.chains.values().cloned().collect();
        chains.sort_by_key(|c| c.network().to_string());
        StorageSnapshot {
            version: SNAPSHOT_VERSION,
            wallets: self.wallets.clone(),
            transactions: self.transactions.clone(),
            chains,
        }
    }

    /// Subscribe to mutation events.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: StorageEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // -- Wallets & accounts -------------------------------------------------

    /// Register a wallet. Returns `false` if it already existed.
    pub fn create_wallet(&mut self, wallet_id: &str, network: Network, wallet_type: WalletType) -> bool {
        self.chains
            .entry(network)
            .or_insert_with(|| ChainStore::new(network));
        if self.wallets.contains_key(wallet_id) {
            return false;
        }
        self.wallets.insert(
            wallet_id.to_string(),
            WalletStore::new(wallet_id, network, wallet_type),
        );
        debug!(wallet_id, %network, "wallet created in storage");
        self.emit(StorageEvent::WalletCreated {
            wallet_id: wallet_id.to_string(),
        });
        true
    }

    /// Stored wallet.
    pub fn wallet(&self, wallet_id: &str) -> Result<&WalletStore, WalletError> {
        self.wallets
            .get(wallet_id)
            .ok_or_else(|| WalletError::UnknownWallet(wallet_id.to_string()))
    }

    fn wallet_mut(&mut self, wallet_id: &str) -> Result<&mut WalletStore, WalletError> {
        self.wallets
            .get_mut(wallet_id)
            .ok_or_else(|| WalletError::UnknownWallet(wallet_id.to_string()))
    }

    /// Merge account records. Existing accounts keep their state; a new
    /// label replaces the old one.
    pub fn import_accounts(
        &mut self,
        wallet_id: &str,
        accounts: impl IntoIterator<Item = AccountRecord>,
    ) -> Result<usize, WalletError> {
        let wallet = self.wallet_mut(wallet_id)?;
        let mut imported = Vec::new();
        for record in accounts {
            match wallet.accounts.get_mut(&record.path) {
                Some(existing) => {
                    if record.label.is_some() {
                        existing.label = record.label;
                    }
                }
                None => {
                    imported.push(record.path.clone());
                    wallet.accounts.insert(record.path.clone(), record);
                }
            }
        }
        for path in &imported {
            self.emit(StorageEvent::AccountImported {
                wallet_id: wallet_id.to_string(),
                path: path.clone(),
            });
        }
        Ok(imported.len())
    }

    /// Account indices already registered for a wallet.
    pub fn account_indices(&self, wallet_id: &str) -> Result<BTreeSet<u32>, WalletError> {
        Ok(self.wallet(wallet_id)?.accounts.values().map(|a| a.index).collect())
    }

    // -- Addresses ----------------------------------------------------------

    /// Import the single address of a single-key wallet.
    pub fn import_single_address(&mut self, wallet_id: &str, info: AddressInfo) -> Result<usize, WalletError> {
        if info.chain != ChainType::Misc {
            return Err(WalletError::Validation(format!(
                "single address {} must be on the misc chain",
                info.address
            )));
        }
        self.import_addresses(wallet_id, [info])
    }

    /// Merge addresses into their chains. Returns the number of new entries.
    pub fn import_addresses(
        &mut self,
        wallet_id: &str,
        addresses: impl IntoIterator<Item = AddressInfo>,
    ) -> Result<usize, WalletError> {
        let wallet = self.wallet_mut(wallet_id)?;
        let mut added = 0;
        for info in addresses {
            let chain = wallet.addresses.chain_mut(info.chain);
            match chain.get_mut(&info.path) {
                Some(existing) => merge_address(existing, info),
                None => {
                    chain.insert(info.path.clone(), info);
                    added += 1;
                }
            }
        }
        if added > 0 {
            self.emit(StorageEvent::AddressesImported {
                wallet_id: wallet_id.to_string(),
                count: added,
            });
        }
        Ok(added)
    }

    /// Addresses of one chain under an account, ordered by index.
    pub fn account_chain(&self, wallet_id: &str, account_path: &str, chain: ChainType) -> Result<Vec<AddressInfo>, WalletError> {
        let wallet = self.wallet(wallet_id)?;
        let mut out: Vec<AddressInfo> = wallet
            .addresses
            .chain(chain)
            .values()
            .filter(|a| chain == ChainType::Misc || path::is_under_account(&a.path, account_path))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.index);
        Ok(out)
    }

    /// Look up an address string across every chain of a wallet.
    pub fn find_address(&self, wallet_id: &str, address: &str) -> Option<&AddressInfo> {
        self.wallets
            .get(wallet_id)?
            .addresses
            .iter()
            .find(|a| a.address == address)
    }

    /// Merge a fetched summary (and optionally its UTXOs) into an address.
    ///
    /// `used` only ever turns on; txids are unioned in first-seen order.
    pub fn apply_address_fetch(
        &mut self,
        wallet_id: &str,
        address: &str,
        summary: AddressSummary,
        utxos: Option<Vec<TransportUtxo>>,
        fetched_at: i64,
    ) -> Result<(), WalletError> {
        let wallet = self.wallet_mut(wallet_id)?;
        let info = wallet
            .find_address_mut(address)
            .ok_or_else(|| WalletError::Validation(format!("address {address} is not tracked")))?;

        info.balance_sat = summary.balance_sat;
        info.unconfirmed_balance_sat = summary.unconfirmed_balance_sat;
        for txid in summary.transactions {
            if !info.transactions.contains(&txid) {
                info.transactions.push(txid);
            }
        }
        info.used = info.used || !info.transactions.is_empty();
        if let Some(utxos) = utxos {
            info.utxos = utxos
                .into_iter()
                .map(|u| {
                    (
                        utxo_key(&u.txid, u.output_index),
                        UtxoEntry {
                            satoshis: u.satoshis,
                            script: u.script,
                            tx_id: u.txid,
                            output_index: u.output_index,
                        },
                    )
                })
                .collect();
        }
        info.fetched_last = fetched_at;

        self.emit(StorageEvent::AddressUpdated {
            wallet_id: wallet_id.to_string(),
            address: address.to_string(),
        });
        Ok(())
    }

    /// Mark every address of a wallet stale. `used` is untouched.
    pub fn reset_fetched_last(&mut self, wallet_id: &str) -> Result<(), WalletError> {
        let wallet = self.wallet_mut(wallet_id)?;
        for info in wallet.addresses.iter_mut() {
            info.fetched_last = 0;
        }
        self.emit(StorageEvent::FetchReset {
            wallet_id: wallet_id.to_string(),
        });
        Ok(())
    }

    /// Remove spent outputs after a successful broadcast.
    ///
    /// Balances drop by the spent value and the owning addresses are marked
    /// stale so the next sync reconciles them.
    pub fn consume_utxos(&mut self, wallet_id: &str, spent: &[(String, u32)]) -> Result<usize, WalletError> {
        let wallet = self.wallet_mut(wallet_id)?;
        let mut removed = 0;
        for info in wallet.addresses.iter_mut() {
            for (txid, index) in spent {
                if let Some(entry) = info.utxos.remove(&utxo_key(txid, *index)) {
                    info.balance_sat = info.balance_sat.saturating_sub(entry.satoshis);
                    info.fetched_last = 0;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.emit(StorageEvent::UtxosConsumed {
                wallet_id: wallet_id.to_string(),
                count: removed,
            });
        }
        Ok(removed)
    }

    /// Record `txid` on every tracked address of the wallet it touches,
    /// marking them used. Returns the number of addresses linked.
    pub fn link_transaction(&mut self, wallet_id: &str, txid: &str) -> Result<usize, WalletError> {
        let touched: BTreeSet<String> = match self.transactions.get(txid) {
            Some(tx) => tx
                .inputs
                .iter()
                .filter_map(|i| i.address.clone())
                .chain(tx.outputs.iter().filter_map(|o| o.address.clone()))
                .collect(),
            None => return Ok(0),
        };
        let wallet = self.wallet_mut(wallet_id)?;
        let mut linked = 0;
        for address in &touched {
            if let Some(info) = wallet.find_address_mut(address) {
                if !info.transactions.iter().any(|t| t == txid) {
                    info.transactions.push(txid.to_string());
                    linked += 1;
                }
                info.used = true;
            }
        }
        Ok(linked)
    }

    // -- Transactions & chain -----------------------------------------------

    /// Merge transactions. The whole batch is validated first; a record
    /// already present only has its confirmation metadata updated.
    pub fn import_transactions(
        &mut self,
        transactions: impl IntoIterator<Item = TransactionRecord>,
    ) -> Result<usize, WalletError> {
        let batch: Vec<TransactionRecord> = transactions.into_iter().collect();
        for tx in &batch {
            tx.validate()?;
        }
        let mut changed = 0;
        for tx in batch {
            let txid = tx.txid.clone();
            let updated = match self.transactions.get_mut(&txid) {
                Some(existing) => {
                    let confirmation_changed = existing.block_height != tx.block_height
                        || existing.block_hash != tx.block_hash;
                    if confirmation_changed {
                        existing.block_height = tx.block_height;
                        existing.block_hash = tx.block_hash;
                        existing.time = tx.time.or(existing.time);
                    }
                    confirmation_changed
                }
                None => {
                    self.transactions.insert(txid.clone(), tx);
                    true
                }
            };
            if updated {
                changed += 1;
                self.emit(StorageEvent::TransactionImported { txid });
            }
        }
        Ok(changed)
    }

    /// Known transaction.
    pub fn transaction(&self, txid: &str) -> Option<&TransactionRecord> {
        self.transactions.get(txid)
    }

    /// Whether a transaction is known.
    pub fn has_transaction(&self, txid: &str) -> bool {
        self.transactions.contains_key(txid)
    }

    /// Chain store of a network.
    pub fn chain(&self, network: Network) -> Option<&ChainStore> {
        self.chains.get(&network)
    }

    fn chain_mut(&mut self, network: Network) -> &mut ChainStore {
        self.chains
            .entry(network)
            .or_insert_with(|| ChainStore::new(network))
    }

    /// Best known height of a network, 0 if unknown.
    pub fn chain_height(&self, network: Network) -> u32 {
        self.chain(network).map_or(0, ChainStore::height)
    }

    /// Record a new best height.
    pub fn update_chain_height(&mut self, network: Network, height: u32) {
        if self.chain_mut(network).set_height(height) {
            self.emit(StorageEvent::ChainHeightUpdated { height });
        }
    }

    /// Cache block headers, keeping at most `max_keep`. Headers at `pinned`
    /// heights are the last to be pruned. Returns how many new headers
    /// survived pruning.
    pub fn import_block_headers(
        &mut self,
        network: Network,
        headers: impl IntoIterator<Item = BlockHeaderRecord>,
        max_keep: usize,
        pinned: &BTreeSet<u32>,
    ) -> usize {
        let mut imported = Vec::new();
        let chain = self.chain_mut(network);
        for header in headers {
            let height = header.height;
            if chain.import_block_header(header) {
                imported.push(height);
            }
        }
        chain.prune_headers(max_keep, pinned);
        imported.retain(|h| chain.block_header(*h).is_some());
        for height in &imported {
            self.emit(StorageEvent::BlockHeaderImported { height: *height });
        }
        imported.len()
    }

    // -- Queries ------------------------------------------------------------

    /// Spendable outputs of an account, largest first.
    ///
    /// Coinbase outputs are excluded unless they come from a special
    /// coinbase transaction whose payload height has matured.
    pub fn get_utxos(&self, wallet_id: &str, account_path: &str) -> Result<Vec<UnspentOutput>, WalletError> {
        let wallet = self.wallet(wallet_id)?;
        let height = self.chain_height(wallet.network);
        let mut utxos: Vec<UnspentOutput> = wallet
            .account_addresses(account_path)
            .flat_map(AddressInfo::unspent_outputs)
            .filter(|u| self.is_spendable(&u.tx_id, height))
            .collect();
        utxos.sort_by(|a, b| b.satoshis.cmp(&a.satoshis));
        Ok(utxos)
    }

    fn is_spendable(&self, txid: &str, current_height: u32) -> bool {
        match self.transactions.get(txid).map(|t| t.kind) {
            Some(TransactionKind::Coinbase { payload_height }) => payload_height
                .is_some_and(|h| current_height >= h.saturating_add(self.coinbase_maturity)),
            _ => true,
        }
    }

    /// Sum of balances over an explicit address set.
    pub fn calculate_duff_balance<'a>(
        &self,
        network: Network,
        addresses: impl IntoIterator<Item = &'a AddressInfo>,
        mode: BalanceMode,
    ) -> u64 {
        match self.chain(network) {
            Some(chain) => chain.calculate_duff_balance(addresses, mode),
            None => ChainStore::new(network).calculate_duff_balance(addresses, mode),
        }
    }

    /// Confirmed balance of one account.
    pub fn get_confirmed_balance(&self, wallet_id: &str, account_index: u32) -> Result<u64, WalletError> {
        self.account_balance(wallet_id, account_index, BalanceMode::Confirmed)
    }

    /// Unconfirmed balance of one account.
    pub fn get_unconfirmed_balance(&self, wallet_id: &str, account_index: u32) -> Result<u64, WalletError> {
        self.account_balance(wallet_id, account_index, BalanceMode::Unconfirmed)
    }

    /// Confirmed plus unconfirmed balance of one account.
    pub fn get_total_balance(&self, wallet_id: &str, account_index: u32) -> Result<u64, WalletError> {
        Ok(self
            .get_confirmed_balance(wallet_id, account_index)?
            .saturating_add(self.get_unconfirmed_balance(wallet_id, account_index)?))
    }

    fn account_balance(&self, wallet_id: &str, account_index: u32, mode: BalanceMode) -> Result<u64, WalletError> {
        let wallet = self.wallet(wallet_id)?;
        Ok(self.calculate_duff_balance(wallet.network, wallet.addresses_for_index(account_index), mode))
    }

    /// Transactions touching an account, deduplicated, in first-seen order.
    pub fn account_transactions(&self, wallet_id: &str, account_path: &str) -> Result<Vec<&TransactionRecord>, WalletError> {
        let wallet = self.wallet(wallet_id)?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for info in wallet.account_addresses(account_path) {
            for txid in &info.transactions {
                if !seen.insert(txid.as_str()) {
                    continue;
                }
                if let Some(tx) = self.transactions.get(txid) {
                    out.push(tx);
                }
            }
        }
        Ok(out)
    }

    // -- Cache --------------------------------------------------------------

    /// Export the addresses of a wallet and the transactions they reference.
    pub fn export_cache(&self, wallet_id: &str) -> Result<PersistedCache, WalletError> {
        let wallet = self.wallet(wallet_id)?;
        let transactions = wallet
            .addresses
            .iter()
            .flat_map(|a| a.transactions.iter())
            .filter_map(|txid| self.transactions.get(txid))
            .map(|tx| (tx.txid.clone(), tx.clone()))
            .collect();
        Ok(PersistedCache {
            addresses: wallet.addresses.clone(),
            transactions,
        })
    }

    /// Import a previously exported cache.
    pub fn import_cache(&mut self, wallet_id: &str, cache: PersistedCache) -> Result<(), WalletError> {
        self.import_transactions(cache.transactions.into_values())?;
        let PersistedCache { addresses, .. } = cache;
        let all = addresses
            .external
            .into_values()
            .chain(addresses.internal.into_values())
            .chain(addresses.misc.into_values());
        self.import_addresses(wallet_id, all)?;
        Ok(())
    }
}

/// Merge an incoming address entry into an existing one.
///
/// Fresher fetched state wins; history and `used` only accumulate.
fn merge_address(existing: &mut AddressInfo, incoming: AddressInfo) {
    for txid in incoming.transactions {
        if !existing.transactions.contains(&txid) {
            existing.transactions.push(txid);
        }
    }
    if incoming.fetched_last > existing.fetched_last {
        existing.balance_sat = incoming.balance_sat;
        existing.unconfirmed_balance_sat = incoming.unconfirmed_balance_sat;
        existing.utxos = incoming.utxos;
        existing.fetched_last = incoming.fetched_last;
    }
    existing.used = existing.used || incoming.used || !existing.transactions.is_empty();
}
