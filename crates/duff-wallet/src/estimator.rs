//! Projected transaction size and fee.
//!
//! [`TransactionEstimator`] is the mutable accumulator coin-selection
//! strategies feed. It sizes a transaction before any signature exists by
//! charging every input an average P2PKH unlock script.

use serde::{Deserialize, Serialize};

use duff_core::constants::{
    OUTPOINT_BYTES, OUTPUT_VALUE_BYTES, P2PKH_SCRIPT_BYTES, P2PKH_UNLOCK_SCRIPT_BYTES,
    SEQUENCE_BYTES, TX_LOCKTIME_BYTES, TX_RESERVED_BYTES, TX_VERSION_BYTES,
};
use duff_core::error::WalletError;
use duff_core::fee::{FeeCategory, FeeRates};
use duff_core::types::UnspentOutput;

/// Locking script type of an output. P2PKH is the only supported type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScriptType {
    /// Pay to public key hash.
    #[default]
    P2pkh,
}

impl ScriptType {
    fn script_len(self) -> usize {
        match self {
            ScriptType::P2pkh => P2PKH_SCRIPT_BYTES,
        }
    }
}

/// A requested payment output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Destination address.
    pub address: String,
    /// Value in duffs.
    pub satoshis: u64,
    /// Locking script type.
    #[serde(default)]
    pub script_type: ScriptType,
}

impl Output {
    /// P2PKH output.
    pub fn new(address: impl Into<String>, satoshis: u64) -> Self {
        Self {
            address: address.into(),
            satoshis,
            script_type: ScriptType::P2pkh,
        }
    }
}

/// Size of a Bitcoin-style variable-length integer.
pub fn varint_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Running input/output set with size and fee projection.
#[derive(Debug, Clone)]
pub struct TransactionEstimator {
    fee_category: FeeCategory,
    rates: FeeRates,
    inputs: Vec<UnspentOutput>,
    outputs: Vec<Output>,
}

impl TransactionEstimator {
    /// Empty estimator.
    pub fn new(fee_category: FeeCategory, rates: FeeRates) -> Self {
        Self {
            fee_category,
            rates,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Estimator seeded with inputs. Fails if any input is not a UTXO.
    pub fn with_inputs(
        fee_category: FeeCategory,
        rates: FeeRates,
        inputs: &[UnspentOutput],
    ) -> Result<Self, WalletError> {
        let mut estimator = Self::new(fee_category, rates);
        estimator.add_inputs(inputs)?;
        Ok(estimator)
    }

    /// Append inputs. The batch is validated before any is added.
    pub fn add_inputs(&mut self, inputs: &[UnspentOutput]) -> Result<&mut Self, WalletError> {
        for input in inputs {
            input.validate()?;
        }
        self.inputs.extend_from_slice(inputs);
        Ok(self)
    }

    /// Append outputs.
    pub fn add_outputs(&mut self, outputs: impl IntoIterator<Item = Output>) -> Result<&mut Self, WalletError> {
        let outputs: Vec<Output> = outputs.into_iter().collect();
        if let Some(bad) = outputs.iter().find(|o| o.address.trim().is_empty()) {
            return Err(WalletError::Validation(format!(
                "output of {} duffs has no address",
                bad.satoshis
            )));
        }
        self.outputs.extend(outputs);
        Ok(self)
    }

    /// Projected serialized size in bytes.
    pub fn get_size(&self) -> usize {
        let input_bytes: usize = self.inputs.len()
            * (OUTPOINT_BYTES
                + varint_len(P2PKH_UNLOCK_SCRIPT_BYTES)
                + P2PKH_UNLOCK_SCRIPT_BYTES
                + SEQUENCE_BYTES);
        let output_bytes: usize = self
            .outputs
            .iter()
            .map(|o| {
                let script = o.script_type.script_len();
                OUTPUT_VALUE_BYTES + varint_len(script) + script
            })
            .sum();
        TX_VERSION_BYTES
            + varint_len(self.inputs.len())
            + input_bytes
            + varint_len(self.outputs.len())
            + output_bytes
            + TX_RESERVED_BYTES
            + TX_LOCKTIME_BYTES
    }

    /// Fee for the current set under the estimator's category.
    pub fn get_fee_estimate(&self) -> u64 {
        match self.rates.per_kb(self.fee_category) {
            Some(per_kb) => (self.get_size() as u64 * per_kb).div_ceil(1_000),
            None => self.inputs.len() as u64 * self.rates.instant_per_input,
        }
    }

    /// Take `amount` from the designated (first) output.
    pub fn reduce_fee_from_output(&mut self, amount: u64) -> Result<(), WalletError> {
        let Some(output) = self.outputs.first_mut() else {
            return Err(WalletError::Validation(
                "no output to deduct the fee from".into(),
            ));
        };
        if output.satoshis < amount {
            return Err(WalletError::InsufficientFunds {
                have: output.satoshis,
                need: amount,
            });
        }
        output.satoshis -= amount;
        Ok(())
    }

    /// Sum of input values.
    pub fn get_in_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.satoshis).fold(0, u64::saturating_add)
    }

    /// Sum of output values.
    pub fn get_out_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.satoshis).fold(0, u64::saturating_add)
    }

    /// Fee category.
    pub fn fee_category(&self) -> FeeCategory {
        self.fee_category
    }

    /// Current inputs.
    pub fn inputs(&self) -> &[UnspentOutput] {
        &self.inputs
    }

    /// Current outputs.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Consume into `(inputs, outputs)`.
    pub fn into_parts(self) -> (Vec<UnspentOutput>, Vec<Output>) {
        (self.inputs, self.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utxo(n: u8, sats: u64) -> UnspentOutput {
        UnspentOutput {
            tx_id: format!("{n:02x}").repeat(32),
            output_index: 0,
            script: "76a914".into(),
            satoshis: sats,
            address: "yRecv".into(),
        }
    }

    fn estimator(category: FeeCategory) -> TransactionEstimator {
        TransactionEstimator::new(category, FeeRates::default())
    }

    #[test]
    fn empty_transaction_size() {
        // version 4 + 0 inputs 1 + 0 outputs 1 + reserved 13 + locktime 4
        assert_eq!(estimator(FeeCategory::Normal).get_size(), 23);
    }

    #[test]
    fn one_in_one_out_normal_fee_is_205() {
        let mut est = estimator(FeeCategory::Normal);
        est.add_inputs(&[utxo(1, 100_000_000)]).unwrap();
        est.add_outputs([Output::new("yDest", 100_000_000)]).unwrap();
        assert_eq!(est.get_size(), 205);
        assert_eq!(est.get_fee_estimate(), 205);
    }

    #[test]
    fn each_extra_input_adds_148_bytes() {
        let mut est = estimator(FeeCategory::Normal);
        est.add_outputs([Output::new("yDest", 1)]).unwrap();
        est.add_inputs(&[utxo(1, 1)]).unwrap();
        let one = est.get_size();
        est.add_inputs(&[utxo(2, 1)]).unwrap();
        assert_eq!(est.get_size() - one, 148);
    }

    #[test]
    fn fee_rounds_up_per_category() {
        let mut est = estimator(FeeCategory::Economic);
        est.add_inputs(&[utxo(1, 1)]).unwrap();
        est.add_outputs([Output::new("yDest", 1)]).unwrap();
        // 205 bytes * 500 / 1000 = 102.5
        assert_eq!(est.get_fee_estimate(), 103);
    }

    #[test]
    fn zero_category_is_free() {
        let mut est = estimator(FeeCategory::Zero);
        est.add_inputs(&[utxo(1, 1)]).unwrap();
        assert_eq!(est.get_fee_estimate(), 0);
    }

    #[test]
    fn instant_fee_is_per_input() {
        let mut est = estimator(FeeCategory::Instant);
        est.add_inputs(&[utxo(1, 1), utxo(2, 1), utxo(3, 1)]).unwrap();
        est.add_outputs([Output::new("yDest", 1)]).unwrap();
        assert_eq!(est.get_fee_estimate(), 30_000);
    }

    #[test]
    fn add_inputs_empty_is_noop() {
        let mut est = estimator(FeeCategory::Normal);
        est.add_inputs(&[]).unwrap();
        assert!(est.inputs().is_empty());
    }

    #[test]
    fn invalid_input_rejected_atomically() {
        let mut bad = utxo(2, 1);
        bad.tx_id = "not-a-txid".into();
        let mut est = estimator(FeeCategory::Normal);
        let err = est.add_inputs(&[utxo(1, 1), bad.clone()]).unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
        assert!(est.inputs().is_empty());

        let err = TransactionEstimator::with_inputs(FeeCategory::Normal, FeeRates::default(), &[bad])
            .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }

    #[test]
    fn output_without_address_rejected() {
        let mut est = estimator(FeeCategory::Normal);
        let err = est.add_outputs([Output::new("  ", 5)]).unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }

    #[test]
    fn reduce_fee_targets_first_output() {
        let mut est = estimator(FeeCategory::Normal);
        est.add_outputs([Output::new("yA", 1_000), Output::new("yB", 1_000)])
            .unwrap();
        est.reduce_fee_from_output(205).unwrap();
        assert_eq!(est.outputs()[0].satoshis, 795);
        assert_eq!(est.outputs()[1].satoshis, 1_000);
        assert_eq!(est.get_out_value(), 1_795);
    }

    #[test]
    fn reduce_fee_beyond_output_value_fails() {
        let mut est = estimator(FeeCategory::Normal);
        est.add_outputs([Output::new("yA", 100)]).unwrap();
        let err = est.reduce_fee_from_output(205).unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 100, need: 205 });
    }

    #[test]
    fn values_sum() {
        let mut est = estimator(FeeCategory::Normal);
        est.add_inputs(&[utxo(1, 10), utxo(2, 0), utxo(3, 5)]).unwrap();
        est.add_outputs([Output::new("yA", 7)]).unwrap();
        assert_eq!(est.get_in_value(), 15);
        assert_eq!(est.get_out_value(), 7);
    }

    #[test]
    fn varint_boundaries() {
        assert_eq!(varint_len(0xfc), 1);
        assert_eq!(varint_len(0xfd), 3);
        assert_eq!(varint_len(0x1_0000), 5);
    }
}
