//! Caches headers of blocks the account's transactions confirmed in.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use duff_core::error::WalletError;

use super::address_sync::ADDRESS_SYNC;
use super::chain_watcher::CHAIN_WATCHER;
use super::{Worker, WorkerContext, WorkerDescriptor, in_context};

/// Worker name.
pub const BLOCK_HEADERS: &str = "block-headers";

/// Fetches missing headers for the chain tip and for the account's confirmed
/// transactions. Only the newest `max_headers_to_keep` of those heights are
/// wanted, so a run never fetches a header that pruning would drop again.
#[derive(Debug, Clone, Copy)]
pub struct BlockHeaders {
    interval: Duration,
}

impl BlockHeaders {
    /// Header cache refreshed every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for BlockHeaders {
    fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor::new(BLOCK_HEADERS, self.interval)
            .depends_on([CHAIN_WATCHER, ADDRESS_SYNC])
            .execute_on_start()
    }

    async fn execute(&self, ctx: &WorkerContext) -> Result<(), WalletError> {
        let transport = ctx.transport(BLOCK_HEADERS)?;
        let keep = ctx.config.max_headers_to_keep;
        let (wanted, missing) = {
            let storage = ctx.storage.read();
            let chain = storage.chain(ctx.network);
            let tip = storage.chain_height(ctx.network);
            let heights: BTreeSet<u32> = storage
                .account_transactions(&ctx.wallet_id, ctx.account_path())?
                .into_iter()
                .filter_map(|tx| tx.block_height)
                .chain((tip > 0).then_some(tip))
                .collect();
            let wanted: BTreeSet<u32> = heights.into_iter().rev().take(keep).collect();
            let missing: Vec<u32> = wanted
                .iter()
                .copied()
                .filter(|h| !chain.is_some_and(|c| c.block_header(*h).is_some()))
                .collect();
            (wanted, missing)
        };
        if missing.is_empty() {
            return Ok(());
        }

        let mut headers = Vec::with_capacity(missing.len());
        for height in &missing {
            let header = transport
                .get_block_by_height(*height)
                .await
                .map_err(|e| in_context(&format!("block {height}"), e))?;
            headers.push(header);
        }
        let imported = ctx
            .storage
            .write()
            .import_block_headers(ctx.network, headers, keep, &wanted);
        debug!(imported, "block headers cached");
        Ok(())
    }
}
