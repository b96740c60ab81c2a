//! BIP-44 path bookkeeping.

use crate::constants::BIP44_PURPOSE;
use crate::types::{ChainType, Network};

/// Root path of every account on `network`: `m/44'/{coin}'`.
pub fn feature_path(network: Network) -> String {
    format!("m/{BIP44_PURPOSE}'/{}'", network.coin_type())
}

/// Account root: `m/44'/{coin}'/{index}'`.
pub fn account_path(network: Network, index: u32) -> String {
    format!("{}/{index}'", feature_path(network))
}

/// Address path under an account root. Misc addresses have no BIP-44 path
/// and are keyed by their index alone.
pub fn address_path(account_path: &str, chain: ChainType, index: u32) -> String {
    match chain.bip44_change() {
        Some(change) => format!("{account_path}/{change}/{index}"),
        None => index.to_string(),
    }
}

/// Account index encoded in a BIP-44 path, if the path has one.
pub fn account_index(path: &str) -> Option<u32> {
    path.strip_prefix("m/")?
        .split('/')
        .nth(2)?
        .strip_suffix('\'')?
        .parse()
        .ok()
}

/// Whether `path` lies under `account_path`.
pub fn is_under_account(path: &str, account_path: &str) -> bool {
    path.strip_prefix(account_path)
        .is_some_and(|rest| rest.starts_with('/'))
}
