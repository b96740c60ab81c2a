//! Per-wallet configuration.
//!
//! Every wallet instance owns its own [`WalletConfig`] (shared with its
//! accounts and workers through an `Arc`), so two wallets in one process
//! never observe each other's fee tables or limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BIP44_ADDRESS_GAP, COINBASE_MATURITY, DEFAULT_ADDRESS_REFRESH_SECS, DEFAULT_HEADERS_INTERVAL_SECS,
    DEFAULT_MAX_HEADERS_TO_KEEP, DEFAULT_MAX_INPUTS, DEFAULT_SYNC_INTERVAL_SECS,
};
use crate::fee::{FeeCategory, FeeRates};
use crate::types::Network;

/// Configuration for one wallet instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Network the wallet operates on.
    pub network: Network,
    /// Fee-rate table.
    pub fee_rates: FeeRates,
    /// Category used when a payment does not request instant send.
    pub default_fee_category: FeeCategory,
    /// Input cap of the transaction-optimized strategy.
    pub max_inputs: usize,
    /// Unused addresses kept derived ahead per chain.
    pub gap_limit: u32,
    /// Age after which an address is re-fetched, in seconds.
    pub address_refresh_secs: u64,
    /// Interval of the chain watcher, discovery and address sync workers.
    pub sync_interval_secs: u64,
    /// Interval of the block header worker.
    pub headers_interval_secs: u64,
    /// Confirmations before coinbase outputs become spendable.
    pub coinbase_maturity: u32,
    /// Block headers retained in the chain store.
    pub max_headers_to_keep: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            fee_rates: FeeRates::default(),
            default_fee_category: FeeCategory::Normal,
            max_inputs: DEFAULT_MAX_INPUTS,
            gap_limit: BIP44_ADDRESS_GAP,
            address_refresh_secs: DEFAULT_ADDRESS_REFRESH_SECS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            headers_interval_secs: DEFAULT_HEADERS_INTERVAL_SECS,
            coinbase_maturity: COINBASE_MATURITY,
            max_headers_to_keep: DEFAULT_MAX_HEADERS_TO_KEEP,
        }
    }
}

impl WalletConfig {
    /// Default configuration for `network`.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Sync worker interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Block header worker interval.
    pub fn headers_interval(&self) -> Duration {
        Duration::from_secs(self.headers_interval_secs)
    }

    /// Refresh age in milliseconds, comparable with `fetched_last`.
    pub fn address_refresh_millis(&self) -> i64 {
        i64::try_from(self.address_refresh_secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gap_limit_is_twenty() {
        assert_eq!(WalletConfig::default().gap_limit, 20);
    }

    #[test]
    fn default_maturity_is_one_hundred() {
        assert_eq!(WalletConfig::default().coinbase_maturity, 100);
    }

    #[test]
    fn for_network_overrides_only_network() {
        let cfg = WalletConfig::for_network(Network::Mainnet);
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.max_inputs, DEFAULT_MAX_INPUTS);
    }

    #[test]
    fn instances_are_independent() {
        let mut a = WalletConfig::default();
        let b = WalletConfig::default();
        a.fee_rates.normal = 5_000;
        assert_eq!(b.fee_rates.normal, 1_000);
    }

    #[test]
    fn refresh_millis() {
        let cfg = WalletConfig {
            address_refresh_secs: 3,
            ..WalletConfig::default()
        };
        assert_eq!(cfg.address_refresh_millis(), 3_000);
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: WalletConfig =
            serde_json::from_str(r#"{"network":"mainnet","max_inputs":10}"#).unwrap();
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.max_inputs, 10);
        assert_eq!(cfg.gap_limit, 20);
    }
}
