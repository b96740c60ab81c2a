//! Fee categories and the per-instance fee-rate table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{FEE_RATE_ECONOMIC, FEE_RATE_NORMAL, FEE_RATE_PRIORITY, INSTANT_FEE_PER_INPUT};
use crate::error::WalletError;

/// Named fee tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeeCategory {
    /// Default size-based rate.
    #[default]
    Normal,
    /// Cheaper size-based rate.
    Economic,
    /// Expensive size-based rate.
    Priority,
    /// No fee.
    Zero,
    /// Flat fee per input for instant-send locking.
    Instant,
}

impl fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeeCategory::Normal => "normal",
            FeeCategory::Economic => "economic",
            FeeCategory::Priority => "priority",
            FeeCategory::Zero => "zero",
            FeeCategory::Instant => "instant",
        };
        f.write_str(s)
    }
}

impl FromStr for FeeCategory {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(FeeCategory::Normal),
            "economic" => Ok(FeeCategory::Economic),
            "priority" => Ok(FeeCategory::Priority),
            "zero" => Ok(FeeCategory::Zero),
            "instant" => Ok(FeeCategory::Instant),
            other => Err(WalletError::Validation(format!("unknown fee category: {other}"))),
        }
    }
}

/// Fee-rate table. Size-based rates are duffs per kB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeRates {
    /// Rate of [`FeeCategory::Normal`].
    pub normal: u64,
    /// Rate of [`FeeCategory::Economic`].
    pub economic: u64,
    /// Rate of [`FeeCategory::Priority`].
    pub priority: u64,
    /// Duffs per input under [`FeeCategory::Instant`].
    pub instant_per_input: u64,
}

impl Default for FeeRates {
    fn default() -> Self {
        Self {
            normal: FEE_RATE_NORMAL,
            economic: FEE_RATE_ECONOMIC,
            priority: FEE_RATE_PRIORITY,
            instant_per_input: INSTANT_FEE_PER_INPUT,
        }
    }
}

impl FeeRates {
    /// Size-based rate for a category; `None` for [`FeeCategory::Instant`].
    pub fn per_kb(&self, category: FeeCategory) -> Option<u64> {
        match category {
            FeeCategory::Normal => Some(self.normal),
            FeeCategory::Economic => Some(self.economic),
            FeeCategory::Priority => Some(self.priority),
            FeeCategory::Zero => Some(0),
            FeeCategory::Instant => None,
        }
    }
}
