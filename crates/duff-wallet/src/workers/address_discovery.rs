//! Keeps a gap of unused addresses derived ahead.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use duff_core::error::WalletError;
use duff_core::types::{ChainType, WalletType};

use super::{Worker, WorkerContext, WorkerDescriptor};

/// Worker name.
pub const ADDRESS_DISCOVERY: &str = "address-discovery";

/// Derives external and internal addresses until `gap_limit` unused ones
/// follow the last used address of each chain.
#[derive(Debug, Clone, Copy)]
pub struct AddressDiscovery {
    interval: Duration,
}

impl AddressDiscovery {
    /// Discovery running every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for AddressDiscovery {
    fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor::new(ADDRESS_DISCOVERY, self.interval).execute_on_start()
    }

    async fn execute(&self, ctx: &WorkerContext) -> Result<(), WalletError> {
        if ctx.deriver.wallet_type() == WalletType::SingleAddress {
            return Ok(());
        }
        let external = ctx.ensure_gap(ChainType::External)?;
        let internal = ctx.ensure_gap(ChainType::Internal)?;
        if external + internal > 0 {
            debug!(external, internal, account = ctx.account_index, "addresses derived ahead");
        }
        Ok(())
    }
}
