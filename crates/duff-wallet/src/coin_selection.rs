//! Coin selection strategies.
//!
//! Every strategy shares one contract: given candidate UTXOs and requested
//! outputs, return the chosen inputs, the final outputs and the fee. The
//! built-ins are greedy accumulators that differ only in how candidates are
//! ordered (and, for the capped variant, how many may be used). Strategies
//! never see account state, so a caller-supplied function is as good as a
//! built-in.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use duff_core::config::WalletConfig;
use duff_core::constants::DEFAULT_MAX_INPUTS;
use duff_core::error::WalletError;
use duff_core::fee::{FeeCategory, FeeRates};
use duff_core::types::UnspentOutput;

use crate::estimator::{Output, TransactionEstimator};

/// Outcome of a coin selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    /// Chosen inputs, in spending order.
    pub utxos: Vec<UnspentOutput>,
    /// Final outputs (after any fee deduction).
    pub outputs: Vec<Output>,
    /// Category the fee was computed under.
    pub fee_category: FeeCategory,
    /// Fee for the selected inputs and outputs, without change.
    pub estimated_fee: u64,
    /// Sum of the chosen inputs.
    pub utxos_value: u64,
}

/// Signature of a custom strategy.
pub type StrategyFn = dyn Fn(&[UnspentOutput], &[Output], bool, FeeCategory, &FeeRates) -> Result<SelectionResult, WalletError>
    + Send
    + Sync;

/// Named coin selection strategy.
#[derive(Clone)]
pub enum CoinSelectionStrategy {
    /// Largest value first, fewest inputs.
    Descending,
    /// Largest value first with ties broken by txid then output index.
    /// The name is historical and kept for compatibility.
    Ascending,
    /// Largest value first, using at most `max_inputs` inputs.
    TransactionOptimized {
        /// Input cap. `None` takes the wallet's configured cap once bound to
        /// an account, [`DEFAULT_MAX_INPUTS`] otherwise.
        max_inputs: Option<usize>,
    },
    /// Caller-supplied strategy.
    Custom {
        /// Name used in logs.
        name: String,
        /// The strategy.
        select: Arc<StrategyFn>,
    },
}

impl Default for CoinSelectionStrategy {
    fn default() -> Self {
        CoinSelectionStrategy::Descending
    }
}

impl fmt::Debug for CoinSelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSelectionStrategy::TransactionOptimized { max_inputs } => f
                .debug_struct("TransactionOptimized")
                .field("max_inputs", max_inputs)
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for CoinSelectionStrategy {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "descending" | "simpleDescendingAccumulator" => Ok(CoinSelectionStrategy::Descending),
            "ascending" | "simpleAscendingAccumulator" => Ok(CoinSelectionStrategy::Ascending),
            "transaction-optimized" | "simpleTransactionOptimizedAccumulator" => {
                Ok(CoinSelectionStrategy::TransactionOptimized { max_inputs: None })
            }
            other => Err(WalletError::Validation(format!(
                "unknown coin selection strategy: {other}"
            ))),
        }
    }
}

impl CoinSelectionStrategy {
    /// Wrap a caller-supplied function.
    pub fn custom<F>(name: impl Into<String>, select: F) -> Self
    where
        F: Fn(&[UnspentOutput], &[Output], bool, FeeCategory, &FeeRates) -> Result<SelectionResult, WalletError>
            + Send
            + Sync
            + 'static,
    {
        CoinSelectionStrategy::Custom {
            name: name.into(),
            select: Arc::new(select),
        }
    }

    /// Parse `name` and bind any unset input cap to `config.max_inputs`.
    pub fn from_config(name: &str, config: &WalletConfig) -> Result<Self, WalletError> {
        Ok(name.parse::<Self>()?.resolved(config))
    }

    /// Copy of this strategy with an unset input cap taken from `config`.
    /// An explicit cap is kept.
    pub fn resolved(&self, config: &WalletConfig) -> Self {
        match self {
            CoinSelectionStrategy::TransactionOptimized { max_inputs: None } => {
                CoinSelectionStrategy::TransactionOptimized {
                    max_inputs: Some(config.max_inputs),
                }
            }
            other => other.clone(),
        }
    }

    /// Strategy name.
    pub fn name(&self) -> &str {
        match self {
            CoinSelectionStrategy::Descending => "descending",
            CoinSelectionStrategy::Ascending => "ascending",
            CoinSelectionStrategy::TransactionOptimized { .. } => "transaction-optimized",
            CoinSelectionStrategy::Custom { name, .. } => name,
        }
    }

    /// Run the strategy.
    pub fn select(
        &self,
        utxos: &[UnspentOutput],
        outputs: &[Output],
        deduct_fee: bool,
        fee_category: FeeCategory,
        rates: &FeeRates,
    ) -> Result<SelectionResult, WalletError> {
        let result = match self {
            CoinSelectionStrategy::Descending => {
                simple_descending_accumulator(utxos, outputs, deduct_fee, fee_category, rates)
            }
            CoinSelectionStrategy::Ascending => {
                simple_ascending_accumulator(utxos, outputs, deduct_fee, fee_category, rates)
            }
            CoinSelectionStrategy::TransactionOptimized { max_inputs } => {
                simple_transaction_optimized_accumulator(
                    max_inputs.unwrap_or(DEFAULT_MAX_INPUTS),
                    utxos,
                    outputs,
                    deduct_fee,
                    fee_category,
                    rates,
                )
            }
            CoinSelectionStrategy::Custom { select, .. } => {
                select(utxos, outputs, deduct_fee, fee_category, rates)
            }
        }?;
        debug!(
            strategy = self.name(),
            inputs = result.utxos.len(),
            value = result.utxos_value,
            fee = result.estimated_fee,
            "coins selected"
        );
        Ok(result)
    }
}

/// Largest value first.
pub fn simple_descending_accumulator(
    utxos: &[UnspentOutput],
    outputs: &[Output],
    deduct_fee: bool,
    fee_category: FeeCategory,
    rates: &FeeRates,
) -> Result<SelectionResult, WalletError> {
    let target = total_output_value(outputs)?;
    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| b.satoshis.cmp(&a.satoshis));
    let selected = accumulate(&sorted, target).ok_or_else(|| insufficient(utxos, target))?;
    finalize(selected, outputs, deduct_fee, fee_category, rates)
}

/// Largest value first, ties broken by txid then output index.
pub fn simple_ascending_accumulator(
    utxos: &[UnspentOutput],
    outputs: &[Output],
    deduct_fee: bool,
    fee_category: FeeCategory,
    rates: &FeeRates,
) -> Result<SelectionResult, WalletError> {
    let target = total_output_value(outputs)?;
    let mut sorted = utxos.to_vec();
    sorted.sort_by(largest_first_deterministic);
    let selected = accumulate(&sorted, target).ok_or_else(|| insufficient(utxos, target))?;
    finalize(selected, outputs, deduct_fee, fee_category, rates)
}

/// Largest value first, capped at `max_inputs` inputs.
///
/// When the plain accumulation needs more than `max_inputs` inputs the
/// sorted list is re-sliced from increasingly later offsets until a window
/// fits under the cap. This does not search for the cheapest fitting set.
pub fn simple_transaction_optimized_accumulator(
    max_inputs: usize,
    utxos: &[UnspentOutput],
    outputs: &[Output],
    deduct_fee: bool,
    fee_category: FeeCategory,
    rates: &FeeRates,
) -> Result<SelectionResult, WalletError> {
    if max_inputs == 0 {
        return Err(WalletError::Validation("max_inputs must be at least 1".into()));
    }
    let target = total_output_value(outputs)?;
    let mut sorted = utxos.to_vec();
    sorted.sort_by(largest_first_deterministic);

    let mut needed = None;
    for offset in 0..sorted.len().max(1) {
        let Some(selected) = accumulate(&sorted[offset.min(sorted.len())..], target) else {
            break;
        };
        if selected.len() <= max_inputs {
            return finalize(selected, outputs, deduct_fee, fee_category, rates);
        }
        needed.get_or_insert(selected.len());
    }

    match needed {
        Some(count) => {
            debug!(max_inputs, needed = count, "no window fits under input cap");
            let have = sorted
                .iter()
                .take(max_inputs)
                .map(|u| u.satoshis)
                .fold(0, u64::saturating_add);
            Err(WalletError::InsufficientFunds { have, need: target })
        }
        None => Err(insufficient(utxos, target)),
    }
}

fn largest_first_deterministic(a: &UnspentOutput, b: &UnspentOutput) -> Ordering {
    b.satoshis
        .cmp(&a.satoshis)
        .then_with(|| a.tx_id.cmp(&b.tx_id))
        .then_with(|| a.output_index.cmp(&b.output_index))
}

fn total_output_value(outputs: &[Output]) -> Result<u64, WalletError> {
    if outputs.is_empty() {
        return Err(WalletError::Validation("at least one output is required".into()));
    }
    outputs.iter().try_fold(0u64, |acc, o| {
        acc.checked_add(o.satoshis)
            .ok_or_else(|| WalletError::InvalidAmount("output total overflows".into()))
    })
}

/// Take sorted candidates until their value reaches `target`.
fn accumulate(sorted: &[UnspentOutput], target: u64) -> Option<Vec<UnspentOutput>> {
    let mut total: u64 = 0;
    let mut selected = Vec::new();
    for utxo in sorted {
        if total >= target {
            break;
        }
        total = total.saturating_add(utxo.satoshis);
        selected.push(utxo.clone());
    }
    (total >= target).then_some(selected)
}

fn insufficient(utxos: &[UnspentOutput], target: u64) -> WalletError {
    WalletError::InsufficientFunds {
        have: utxos.iter().map(|u| u.satoshis).fold(0, u64::saturating_add),
        need: target,
    }
}

/// Price the selection and apply the fee policy.
fn finalize(
    selected: Vec<UnspentOutput>,
    outputs: &[Output],
    deduct_fee: bool,
    fee_category: FeeCategory,
    rates: &FeeRates,
) -> Result<SelectionResult, WalletError> {
    let mut estimator = TransactionEstimator::new(fee_category, *rates);
    estimator.add_outputs(outputs.iter().cloned())?;
    estimator.add_inputs(&selected)?;

    let estimated_fee = estimator.get_fee_estimate();
    let in_value = estimator.get_in_value();
    let need = estimator.get_out_value().saturating_add(estimated_fee);
    if in_value < need {
        if !deduct_fee {
            return Err(WalletError::InsufficientFunds {
                have: in_value,
                need,
            });
        }
        estimator.reduce_fee_from_output(need - in_value)?;
    }

    let utxos_value = estimator.get_in_value();
    let (utxos, outputs) = estimator.into_parts();
    Ok(SelectionResult {
        utxos,
        outputs,
        fee_category,
        estimated_fee,
        utxos_value,
    })
}
