//! Shared fixtures for integration tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use duff_core::address::DashAddress;
use duff_core::bitcoin::Transaction;
use duff_core::bitcoin::consensus::encode::deserialize_hex;
use duff_core::config::WalletConfig;
use duff_core::error::WalletError;
use duff_core::traits::{KeyChain, Transport};
use duff_core::types::{
    AddressSummary, BlockHeaderRecord, ChainStatus, Network, TransactionKind, TransactionRecord,
    TransportUtxo, TxInputRecord, TxOutputRecord,
};
use duff_wallet::HdKeyChain;

/// BIP-39 test vector mnemonic.
pub const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Testnet config with a small gap and workers that never tick on their own
/// during a test.
pub fn testnet_config() -> WalletConfig {
    WalletConfig {
        gap_limit: 3,
        sync_interval_secs: 3_600,
        headers_interval_secs: 3_600,
        address_refresh_secs: 0,
        ..WalletConfig::for_network(Network::Testnet)
    }
}

/// Address at `path` of the ABANDON wallet on testnet.
pub fn abandon_address(path: &str) -> String {
    HdKeyChain::from_mnemonic(ABANDON, "", Network::Testnet)
        .and_then(|kc| kc.get_for_path(path))
        .map(|k| k.address)
        .unwrap_or_else(|e| panic!("derive {path}: {e}"))
}

/// An address that belongs to nobody under test.
pub fn foreign_address() -> String {
    HdKeyChain::from_mnemonic(ABANDON, "other", Network::Testnet)
        .and_then(|kc| kc.get_for_path("m/44'/1'/0'/0/0"))
        .map(|k| k.address)
        .unwrap_or_else(|e| panic!("derive foreign address: {e}"))
}

/// Hex locking script of a testnet address.
pub fn p2pkh_script(address: &str) -> String {
    DashAddress::parse_for(address, Network::Testnet)
        .unwrap_or_else(|e| panic!("parse {address}: {e}"))
        .script_pubkey()
        .to_hex_string()
}

#[derive(Default)]
struct ChainState {
    height: u32,
    next_txid: u32,
    summaries: HashMap<String, AddressSummary>,
    utxos: HashMap<String, Vec<TransportUtxo>>,
    transactions: HashMap<String, TransactionRecord>,
    headers: BTreeMap<u32, BlockHeaderRecord>,
    broadcasts: Vec<(String, bool)>,
    reject_broadcasts: bool,
    header_requests: usize,
    connects: usize,
    disconnects: usize,
}

/// A scriptable chain held in memory.
#[derive(Default)]
pub struct InMemoryTransport {
    state: Mutex<ChainState>,
}

impl InMemoryTransport {
    /// Chain with its tip at `height`.
    pub fn at_height(height: u32) -> Self {
        let transport = Self::default();
        transport.set_height(height);
        transport
    }

    /// Move the tip.
    pub fn set_height(&self, height: u32) {
        let mut state = self.state.lock();
        state.height = height;
        state.headers.insert(height, header(height));
    }

    /// Pay `satoshis` to `address` in a block at `height` (mempool when
    /// `None`). Returns the funding txid.
    pub fn fund(&self, address: &str, satoshis: u64, height: Option<u32>) -> String {
        self.fund_with_kind(address, satoshis, height, TransactionKind::Standard)
    }

    /// Like [`InMemoryTransport::fund`] with an explicit transaction kind.
    pub fn fund_with_kind(
        &self,
        address: &str,
        satoshis: u64,
        height: Option<u32>,
        kind: TransactionKind,
    ) -> String {
        let mut state = self.state.lock();
        state.next_txid += 1;
        let txid = format!("{:064x}", 0xf00d_0000u64 + u64::from(state.next_txid));
        let script = p2pkh_script(address);

        let summary = state.summaries.entry(address.to_string()).or_default();
        match height {
            Some(_) => summary.balance_sat += satoshis,
            None => summary.unconfirmed_balance_sat += satoshis,
        }
        summary.transactions.push(txid.clone());
        state.utxos.entry(address.to_string()).or_default().push(TransportUtxo {
            txid: txid.clone(),
            output_index: 0,
            satoshis,
            script: script.clone(),
            address: address.to_string(),
        });
        state.transactions.insert(
            txid.clone(),
            TransactionRecord {
                txid: txid.clone(),
                raw: None,
                block_hash: height.map(|h| header(h).hash),
                block_height: height,
                time: height.map(|h| header(h).time),
                fee: None,
                inputs: vec![TxInputRecord {
                    txid: Some("ee".repeat(32)),
                    output_index: 1,
                    address: None,
                    satoshis: None,
                }],
                outputs: vec![TxOutputRecord {
                    address: Some(address.to_string()),
                    satoshis,
                    script,
                }],
                kind,
            },
        );
        if let Some(h) = height {
            state.headers.insert(h, header(h));
        }
        txid
    }

    /// Fail every broadcast from now on.
    pub fn reject_broadcasts(&self, reject: bool) {
        self.state.lock().reject_broadcasts = reject;
    }

    /// Raw hex and instant-send flag of every accepted broadcast.
    pub fn broadcasts(&self) -> Vec<(String, bool)> {
        self.state.lock().broadcasts.clone()
    }

    /// Number of `get_block_by_height` calls.
    pub fn header_requests(&self) -> usize {
        self.state.lock().header_requests
    }

    /// Number of `connect` and `disconnect` calls.
    pub fn connection_calls(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.connects, state.disconnects)
    }
}

fn header(height: u32) -> BlockHeaderRecord {
    BlockHeaderRecord {
        hash: format!("{:064x}", 0xb10c_0000u64 + u64::from(height)),
        height,
        prev_hash: format!("{:064x}", 0xb10c_0000u64 + u64::from(height.saturating_sub(1))),
        merkle_root: "00".repeat(32),
        time: 1_700_000_000 + i64::from(height) * 150,
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<(), WalletError> {
        self.state.lock().connects += 1;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.state.lock().disconnects += 1;
        Ok(())
    }

    async fn get_address_summary(&self, address: &str) -> Result<AddressSummary, WalletError> {
        Ok(self.state.lock().summaries.get(address).cloned().unwrap_or_default())
    }

    async fn get_utxo(&self, address: &str) -> Result<Vec<TransportUtxo>, WalletError> {
        Ok(self.state.lock().utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_status(&self) -> Result<ChainStatus, WalletError> {
        Ok(ChainStatus {
            blocks: self.state.lock().height,
        })
    }

    async fn get_best_block_height(&self) -> Result<u32, WalletError> {
        Ok(self.state.lock().height)
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockHeaderRecord, WalletError> {
        let mut state = self.state.lock();
        state.header_requests += 1;
        state
            .headers
            .get(&height)
            .cloned()
            .ok_or_else(|| WalletError::transport("memory", format!("no block at {height}")))
    }

    async fn get_block_header_by_hash(&self, hash: &str) -> Result<BlockHeaderRecord, WalletError> {
        self.state
            .lock()
            .headers
            .values()
            .find(|h| h.hash == hash)
            .cloned()
            .ok_or_else(|| WalletError::transport("memory", format!("no block {hash}")))
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionRecord, WalletError> {
        self.state
            .lock()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| WalletError::transport("memory", format!("no transaction {txid}")))
    }

    async fn send_raw_transaction(&self, raw_hex: &str, instant_send: bool) -> Result<String, WalletError> {
        let mut state = self.state.lock();
        if state.reject_broadcasts {
            return Err(WalletError::transport("memory", "broadcast rejected"));
        }
        let tx: Transaction =
            deserialize_hex(raw_hex).map_err(|e| WalletError::transport("memory", e))?;
        state.broadcasts.push((raw_hex.to_string(), instant_send));
        Ok(tx.compute_txid().to_string())
    }
}
