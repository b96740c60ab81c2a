//! Refreshes stale addresses from the transport.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use duff_core::error::WalletError;
use duff_core::types::{ChainType, WalletType};

use super::address_discovery::ADDRESS_DISCOVERY;
use super::chain_watcher::CHAIN_WATCHER;
use super::{Worker, WorkerContext, WorkerDescriptor, now_millis};

/// Worker name.
pub const ADDRESS_SYNC: &str = "address-sync";

/// Fetches summaries and UTXOs of every address not refreshed within the
/// configured age.
#[derive(Debug, Clone, Copy)]
pub struct AddressSync {
    interval: Duration,
}

impl AddressSync {
    /// Sync running every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for AddressSync {
    fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor::new(ADDRESS_SYNC, self.interval)
            .depends_on([CHAIN_WATCHER, ADDRESS_DISCOVERY])
            .execute_on_start()
    }

    async fn execute(&self, ctx: &WorkerContext) -> Result<(), WalletError> {
        let now = now_millis();
        let max_age = ctx.config.address_refresh_millis();
        let stale: Vec<String> = {
            let storage = ctx.storage.read();
            storage
                .wallet(&ctx.wallet_id)?
                .account_addresses(ctx.account_path())
                .filter(|a| now - a.fetched_last >= max_age)
                .map(|a| a.address.clone())
                .collect()
        };
        if stale.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        let mut refreshed = 0usize;
        for address in &stale {
            match ctx.fetch_address_info(address, true).await {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    warn!(%address, error = %e, "address fetch failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!(refreshed, stale = stale.len(), account = ctx.account_index, "addresses synced");

        // Newly used addresses shift the gap window.
        if ctx.deriver.wallet_type() != WalletType::SingleAddress {
            ctx.ensure_gap(ChainType::External)?;
            ctx.ensure_gap(ChainType::Internal)?;
        }
        first_error.map_or(Ok(()), Err)
    }
}
