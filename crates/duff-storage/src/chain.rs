//! Per-network chain state: best height and cached block headers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use duff_core::types::{AddressInfo, BalanceMode, BlockHeaderRecord, Network};

/// Chain data the wallet tracks for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStore {
    network: Network,
    height: u32,
    block_headers: BTreeMap<u32, BlockHeaderRecord>,
}

impl ChainStore {
    /// Empty chain store at height 0.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            height: 0,
            block_headers: BTreeMap::new(),
        }
    }

    /// Network of this store.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Best known chain height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Record a new best height. Returns `true` if it changed.
    pub fn set_height(&mut self, height: u32) -> bool {
        if self.height == height {
            return false;
        }
        self.height = height;
        true
    }

    /// Cache a header. Returns `true` if the header was new or changed.
    pub fn import_block_header(&mut self, header: BlockHeaderRecord) -> bool {
        match self.block_headers.get(&header.height) {
            Some(existing) if *existing == header => false,
            _ => {
                self.block_headers.insert(header.height, header);
                true
            }
        }
    }

    /// Header at `height`.
    pub fn block_header(&self, height: u32) -> Option<&BlockHeaderRecord> {
        self.block_headers.get(&height)
    }

    /// Header with `hash`.
    pub fn block_header_by_hash(&self, hash: &str) -> Option<&BlockHeaderRecord> {
        self.block_headers.values().find(|h| h.hash == hash)
    }

    /// Highest cached header height.
    pub fn last_header_height(&self) -> Option<u32> {
        self.block_headers.keys().next_back().copied()
    }

    /// Number of cached headers.
    pub fn header_count(&self) -> usize {
        self.block_headers.len()
    }

    /// Drop headers until at most `max_keep` remain. The oldest headers
    /// outside `pinned` go first, then the oldest pinned ones.
    pub fn prune_headers(&mut self, max_keep: usize, pinned: &BTreeSet<u32>) -> usize {
        let excess = self.block_headers.len().saturating_sub(max_keep);
        let (pinned_heights, mut victims): (Vec<u32>, Vec<u32>) = self
            .block_headers
            .keys()
            .copied()
            .partition(|h| pinned.contains(h));
        victims.truncate(excess);
        let shortfall = excess - victims.len();
        victims.extend(pinned_heights.into_iter().take(shortfall));
        for height in &victims {
            self.block_headers.remove(height);
        }
        excess
    }

    /// Sum balances of `addresses` according to `mode`.
    pub fn calculate_duff_balance<'a>(
        &self,
        addresses: impl IntoIterator<Item = &'a AddressInfo>,
        mode: BalanceMode,
    ) -> u64 {
        addresses.into_iter().fold(0u64, |acc, info| {
            let value = match mode {
                BalanceMode::Total => info.balance_sat.saturating_add(info.unconfirmed_balance_sat),
                BalanceMode::Confirmed => info.balance_sat,
                BalanceMode::Unconfirmed => info.unconfirmed_balance_sat,
            };
            acc.saturating_add(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duff_core::types::ChainType;

    fn header(height: u32) -> BlockHeaderRecord {
        BlockHeaderRecord {
            hash: format!("{height:064x}"),
            height,
            prev_hash: format!("{:064x}", height.saturating_sub(1)),
            merkle_root: "00".repeat(32),
            time: 1_600_000_000 + height as i64,
        }
    }

    #[test]
    fn set_height_reports_change() {
        let mut chain = ChainStore::new(Network::Testnet);
        assert!(chain.set_height(10));
        assert!(!chain.set_height(10));
        assert_eq!(chain.height(), 10);
    }

    #[test]
    fn header_import_is_idempotent() {
        let mut chain = ChainStore::new(Network::Testnet);
        assert!(chain.import_block_header(header(5)));
        assert!(!chain.import_block_header(header(5)));
        assert_eq!(chain.header_count(), 1);
        assert_eq!(chain.block_header_by_hash(&header(5).hash).unwrap().height, 5);
    }

    #[test]
    fn prune_keeps_most_recent() {
        let mut chain = ChainStore::new(Network::Testnet);
        for h in 1..=10 {
            chain.import_block_header(header(h));
        }
        assert_eq!(chain.prune_headers(3, &BTreeSet::new()), 7);
        assert_eq!(chain.header_count(), 3);
        assert!(chain.block_header(7).is_none());
        assert_eq!(chain.last_header_height(), Some(10));
    }

    #[test]
    fn prune_evicts_unpinned_headers_first() {
        let mut chain = ChainStore::new(Network::Testnet);
        for h in [3, 20, 21, 22] {
            chain.import_block_header(header(h));
        }
        let pinned = BTreeSet::from([3, 22]);
        assert_eq!(chain.prune_headers(2, &pinned), 2);
        assert!(chain.block_header(3).is_some());
        assert!(chain.block_header(22).is_some());

        assert_eq!(chain.prune_headers(1, &pinned), 1);
        assert!(chain.block_header(3).is_none());
        assert_eq!(chain.last_header_height(), Some(22));
    }

    #[test]
    fn balance_modes() {
        let chain = ChainStore::new(Network::Testnet);
        let mut a = AddressInfo::new("a", 0, "a", ChainType::External);
        a.balance_sat = 100;
        a.unconfirmed_balance_sat = 5;
        let mut b = AddressInfo::new("b", 1, "b", ChainType::External);
        b.balance_sat = 50;
        b.unconfirmed_balance_sat = 7;
        let set = [a, b];

        let confirmed = chain.calculate_duff_balance(&set, BalanceMode::Confirmed);
        let unconfirmed = chain.calculate_duff_balance(&set, BalanceMode::Unconfirmed);
        let total = chain.calculate_duff_balance(&set, BalanceMode::Total);
        assert_eq!(confirmed, 150);
        assert_eq!(unconfirmed, 12);
        assert_eq!(total, confirmed + unconfirmed);
    }
}
