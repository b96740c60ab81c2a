//! Wallet data model: networks, address chains, UTXOs, transactions.
//!
//! Everything here is plain serializable data. Field names serialize in
//! camelCase so a persisted cache stays readable by other wallet tooling.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BIP44_COIN_TYPE_MAINNET, BIP44_COIN_TYPE_TESTNET, MAINNET_PUBKEY_ADDRESS_PREFIX,
    MAINNET_SCRIPT_ADDRESS_PREFIX, MAINNET_WIF_PREFIX, TESTNET_PUBKEY_ADDRESS_PREFIX,
    TESTNET_SCRIPT_ADDRESS_PREFIX, TESTNET_WIF_PREFIX,
};
use crate::error::WalletError;

/// Network a wallet operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    Mainnet,
    /// Public test network.
    #[default]
    Testnet,
    /// Local regression-test network.
    Regtest,
}

impl Network {
    /// BIP-44 coin type.
    pub fn coin_type(self) -> u32 {
        match self {
            Network::Mainnet => BIP44_COIN_TYPE_MAINNET,
            Network::Testnet | Network::Regtest => BIP44_COIN_TYPE_TESTNET,
        }
    }

    /// Version byte of P2PKH addresses.
    pub fn pubkey_address_prefix(self) -> u8 {
        match self {
            Network::Mainnet => MAINNET_PUBKEY_ADDRESS_PREFIX,
            Network::Testnet | Network::Regtest => TESTNET_PUBKEY_ADDRESS_PREFIX,
        }
    }

    /// Version byte of P2SH addresses.
    pub fn script_address_prefix(self) -> u8 {
        match self {
            Network::Mainnet => MAINNET_SCRIPT_ADDRESS_PREFIX,
            Network::Testnet | Network::Regtest => TESTNET_SCRIPT_ADDRESS_PREFIX,
        }
    }

    /// Version byte of WIF-encoded private keys.
    pub fn wif_prefix(self) -> u8 {
        match self {
            Network::Mainnet => MAINNET_WIF_PREFIX,
            Network::Testnet | Network::Regtest => TESTNET_WIF_PREFIX,
        }
    }

    /// Extended key version family used for BIP-32 serialization.
    pub fn network_kind(self) -> bitcoin::NetworkKind {
        match self {
            Network::Mainnet => bitcoin::NetworkKind::Main,
            Network::Testnet | Network::Regtest => bitcoin::NetworkKind::Test,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regtest => write!(f, "regtest"),
        }
    }
}

impl FromStr for Network {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "livenet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" | "local" | "devnet" => Ok(Network::Regtest),
            other => Err(WalletError::Validation(format!("unknown network: {other}"))),
        }
    }
}

/// Which address chain an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    /// Receiving addresses (`.../0/i`).
    External,
    /// Change addresses (`.../1/i`).
    Internal,
    /// Addresses outside the BIP-44 tree (single-key wallets).
    Misc,
}

impl ChainType {
    /// BIP-44 change component, absent for misc addresses.
    pub fn bip44_change(self) -> Option<u32> {
        match self {
            ChainType::External => Some(0),
            ChainType::Internal => Some(1),
            ChainType::Misc => None,
        }
    }
}

/// Kind of root key material a wallet was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalletType {
    /// Extended private key: can derive and sign.
    HdPrivate,
    /// Account-level extended public key: watch-only.
    HdPublic,
    /// One private key, one address.
    SingleAddress,
}

/// How balances are summed over an address set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMode {
    /// Confirmed plus unconfirmed.
    Total,
    /// Confirmed only.
    Confirmed,
    /// Unconfirmed only.
    Unconfirmed,
}

/// Account metadata stored under its wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// BIP-44 account index.
    pub index: u32,
    /// Derivation root, e.g. `m/44'/1'/0'`.
    pub path: String,
    /// Optional user label.
    pub label: Option<String>,
    /// Network of the account.
    pub network: Network,
}

/// A UTXO as stored inside an [`AddressInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoEntry {
    /// Value in duffs.
    pub satoshis: u64,
    /// Hex-encoded locking script.
    pub script: String,
    /// Funding transaction id.
    pub tx_id: String,
    /// Output index within the funding transaction.
    pub output_index: u32,
}

/// Map key of a UTXO: `"{txid}-{outputIndex}"`.
pub fn utxo_key(txid: &str, output_index: u32) -> String {
    format!("{txid}-{output_index}")
}

/// Tracked state of one derived address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    /// Full derivation path (`m/44'/1'/0'/0/5`), or `0` for single-key wallets.
    pub path: String,
    /// Index within its chain.
    pub index: u32,
    /// Encoded address.
    pub address: String,
    /// Chain the address belongs to.
    #[serde(rename = "type")]
    pub chain: ChainType,
    /// Confirmed balance in duffs.
    pub balance_sat: u64,
    /// Unconfirmed balance in duffs.
    pub unconfirmed_balance_sat: u64,
    /// Whether any transaction ever touched this address.
    pub used: bool,
    /// Txids that touched this address, in first-seen order.
    pub transactions: Vec<String>,
    /// UTXOs keyed by [`utxo_key`].
    pub utxos: BTreeMap<String, UtxoEntry>,
    /// Unix milliseconds of the last successful fetch, 0 when stale.
    pub fetched_last: i64,
}

impl AddressInfo {
    /// A freshly derived address with no history.
    pub fn new(path: impl Into<String>, index: u32, address: impl Into<String>, chain: ChainType) -> Self {
        Self {
            path: path.into(),
            index,
            address: address.into(),
            chain,
            balance_sat: 0,
            unconfirmed_balance_sat: 0,
            used: false,
            transactions: Vec::new(),
            utxos: BTreeMap::new(),
            fetched_last: 0,
        }
    }

    /// Resolve the UTXO map into value objects.
    pub fn unspent_outputs(&self) -> impl Iterator<Item = UnspentOutput> + '_ {
        self.utxos.values().map(|u| UnspentOutput {
            tx_id: u.tx_id.clone(),
            output_index: u.output_index,
            script: u.script.clone(),
            satoshis: u.satoshis,
            address: self.address.clone(),
        })
    }
}

/// A spendable output as consumed by coin selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnspentOutput {
    /// Funding transaction id.
    pub tx_id: String,
    /// Output index within the funding transaction.
    pub output_index: u32,
    /// Hex-encoded locking script.
    pub script: String,
    /// Value in duffs.
    pub satoshis: u64,
    /// Address the output pays to.
    pub address: String,
}

impl UnspentOutput {
    /// Reject shapes that cannot reference a real output.
    pub fn validate(&self) -> Result<(), WalletError> {
        if !is_txid(&self.tx_id) {
            return Err(WalletError::Validation(format!(
                "invalid UTXO txid: {:?}",
                self.tx_id
            )));
        }
        if self.script.is_empty() || hex::decode(&self.script).is_err() {
            return Err(WalletError::Validation(format!(
                "invalid UTXO script for {}",
                utxo_key(&self.tx_id, self.output_index)
            )));
        }
        Ok(())
    }

    /// Map key of this output.
    pub fn key(&self) -> String {
        utxo_key(&self.tx_id, self.output_index)
    }
}

/// True if `s` is a 64-character hex transaction id.
pub fn is_txid(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Transaction classification relevant to spendability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransactionKind {
    /// Ordinary transfer.
    #[default]
    Standard,
    /// Block reward. Special coinbase transactions carry their block height
    /// in the payload; classic ones carry none.
    Coinbase {
        /// Height embedded in the special transaction payload.
        payload_height: Option<u32>,
    },
}

/// An input as reported by the chain data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInputRecord {
    /// Spent transaction id, absent for coinbase inputs.
    pub txid: Option<String>,
    /// Spent output index.
    pub output_index: u32,
    /// Address of the spent output, when known.
    pub address: Option<String>,
    /// Value of the spent output, when known.
    pub satoshis: Option<u64>,
}

/// An output as reported by the chain data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutputRecord {
    /// Destination address, absent for non-standard scripts.
    pub address: Option<String>,
    /// Value in duffs.
    pub satoshis: u64,
    /// Hex-encoded locking script.
    pub script: String,
}

/// A transaction known to the wallet, keyed by txid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Transaction id.
    pub txid: String,
    /// Raw serialized transaction, hex.
    pub raw: Option<String>,
    /// Hash of the including block.
    pub block_hash: Option<String>,
    /// Confirmation height; `None` while in the mempool.
    pub block_height: Option<u32>,
    /// Block or first-seen time, unix seconds.
    pub time: Option<i64>,
    /// Fee paid, when reported.
    pub fee: Option<u64>,
    /// Inputs.
    #[serde(default)]
    pub inputs: Vec<TxInputRecord>,
    /// Outputs.
    #[serde(default)]
    pub outputs: Vec<TxOutputRecord>,
    /// Spendability classification.
    #[serde(default)]
    pub kind: TransactionKind,
}

impl TransactionRecord {
    /// Reject records that cannot be keyed or decoded.
    pub fn validate(&self) -> Result<(), WalletError> {
        let raw_ok = self
            .raw
            .as_deref()
            .is_none_or(|raw| !raw.is_empty() && hex::decode(raw).is_ok());
        if !is_txid(&self.txid) || !raw_ok {
            return Err(WalletError::Validation(format!(
                "can't import transaction {:?}: invalid structure",
                self.txid
            )));
        }
        Ok(())
    }

    /// Whether this is a block reward.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.kind, TransactionKind::Coinbase { .. })
    }
}

/// Header metadata cached by the block header worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaderRecord {
    /// Block hash.
    pub hash: String,
    /// Block height.
    pub height: u32,
    /// Previous block hash.
    pub prev_hash: String,
    /// Merkle root.
    pub merkle_root: String,
    /// Block time, unix seconds.
    pub time: i64,
}

/// Address chains of one wallet, keyed by derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressChainMap {
    /// Receiving addresses.
    pub external: BTreeMap<String, AddressInfo>,
    /// Change addresses.
    pub internal: BTreeMap<String, AddressInfo>,
    /// Single-key addresses.
    pub misc: BTreeMap<String, AddressInfo>,
}

impl AddressChainMap {
    /// Addresses of one chain.
    pub fn chain(&self, chain: ChainType) -> &BTreeMap<String, AddressInfo> {
        match chain {
            ChainType::External => &self.external,
            ChainType::Internal => &self.internal,
            ChainType::Misc => &self.misc,
        }
    }

    /// Mutable addresses of one chain.
    pub fn chain_mut(&mut self, chain: ChainType) -> &mut BTreeMap<String, AddressInfo> {
        match chain {
            ChainType::External => &mut self.external,
            ChainType::Internal => &mut self.internal,
            ChainType::Misc => &mut self.misc,
        }
    }

    /// Every address across all chains.
    pub fn iter(&self) -> impl Iterator<Item = &AddressInfo> {
        self.external
            .values()
            .chain(self.internal.values())
            .chain(self.misc.values())
    }

    /// Every address across all chains, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AddressInfo> {
        self.external
            .values_mut()
            .chain(self.internal.values_mut())
            .chain(self.misc.values_mut())
    }

    /// Total number of addresses.
    pub fn len(&self) -> usize {
        self.external.len() + self.internal.len() + self.misc.len()
    }

    /// True if no chain holds an address.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shape-stable cache exported for external persistence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedCache {
    /// Address chains of one wallet.
    pub addresses: AddressChainMap,
    /// Known transactions by txid.
    pub transactions: BTreeMap<String, TransactionRecord>,
}

/// Balance and history of one address as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSummary {
    /// Confirmed balance in duffs.
    pub balance_sat: u64,
    /// Unconfirmed balance in duffs.
    pub unconfirmed_balance_sat: u64,
    /// Txids touching the address.
    pub transactions: Vec<String>,
}

/// A UTXO as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportUtxo {
    /// Funding transaction id.
    pub txid: String,
    /// Output index.
    pub output_index: u32,
    /// Value in duffs.
    pub satoshis: u64,
    /// Hex-encoded locking script.
    pub script: String,
    /// Address the output pays to.
    pub address: String,
}

/// Chain status as reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Best block height.
    pub blocks: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "a477af6b2667c29670467e4e0728b685ee07b240235771862318e29ddbe58458";

    #[test]
    fn network_from_str_accepts_aliases() {
        assert_eq!("livenet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("TESTNET".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("local".parse::<Network>().unwrap(), Network::Regtest);
        assert!("bitcoin".parse::<Network>().is_err());
    }

    #[test]
    fn coin_type_per_network() {
        assert_eq!(Network::Mainnet.coin_type(), 5);
        assert_eq!(Network::Testnet.coin_type(), 1);
        assert_eq!(Network::Regtest.coin_type(), 1);
    }

    #[test]
    fn utxo_key_format() {
        assert_eq!(utxo_key(TXID, 3), format!("{TXID}-3"));
    }

    #[test]
    fn unspent_output_validation() {
        let mut utxo = UnspentOutput {
            tx_id: TXID.into(),
            output_index: 0,
            script: "76a914".into(),
            satoshis: 1,
            address: "yX".into(),
        };
        assert!(utxo.validate().is_ok());

        utxo.script = "zz".into();
        assert!(matches!(utxo.validate(), Err(WalletError::Validation(_))));

        utxo.script = "76a914".into();
        utxo.tx_id = "abc".into();
        assert!(matches!(utxo.validate(), Err(WalletError::Validation(_))));
    }

    #[test]
    fn transaction_record_validation() {
        let mut tx = TransactionRecord {
            txid: TXID.into(),
            raw: Some("0200".into()),
            block_hash: None,
            block_height: None,
            time: None,
            fee: None,
            inputs: vec![],
            outputs: vec![],
            kind: TransactionKind::Standard,
        };
        assert!(tx.validate().is_ok());
        tx.raw = Some("not hex".into());
        assert!(tx.validate().is_err());
        tx.raw = None;
        tx.txid = "short".into();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn address_info_serializes_camel_case() {
        let info = AddressInfo::new("m/44'/1'/0'/0/0", 0, "yAddr", ChainType::External);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["balanceSat"], 0);
        assert_eq!(json["type"], "external");
        assert_eq!(json["fetchedLast"], 0);
    }

    #[test]
    fn chain_map_iterates_all_chains() {
        let mut map = AddressChainMap::default();
        map.external.insert("e".into(), AddressInfo::new("e", 0, "a", ChainType::External));
        map.internal.insert("i".into(), AddressInfo::new("i", 0, "b", ChainType::Internal));
        map.misc.insert("0".into(), AddressInfo::new("0", 0, "c", ChainType::Misc));
        assert_eq!(map.len(), 3);
        let addrs: Vec<_> = map.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addrs, ["a", "b", "c"]);
    }

    #[test]
    fn coinbase_kind_serde_roundtrip() {
        let kind = TransactionKind::Coinbase {
            payload_height: Some(1200),
        };
        let json = serde_json::to_string(&kind).unwrap();
        let back: TransactionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }
}
