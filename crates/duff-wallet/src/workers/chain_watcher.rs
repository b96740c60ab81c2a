//! Keeps the chain height current.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use duff_core::error::WalletError;

use super::{Worker, WorkerContext, WorkerDescriptor};

/// Worker name.
pub const CHAIN_WATCHER: &str = "chain-watcher";

/// Polls chain status and records the best height.
#[derive(Debug, Clone, Copy)]
pub struct ChainWatcher {
    interval: Duration,
}

impl ChainWatcher {
    /// Watcher polling every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for ChainWatcher {
    fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor::new(CHAIN_WATCHER, self.interval).execute_on_start()
    }

    async fn execute(&self, ctx: &WorkerContext) -> Result<(), WalletError> {
        let status = ctx.fetch_status().await?;
        ctx.storage.write().update_chain_height(ctx.network, status.blocks);
        debug!(height = status.blocks, "chain height polled");
        Ok(())
    }
}
