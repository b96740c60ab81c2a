//! Raw transaction construction from a coin selection.
//!
//! 1. Turn the selected UTXOs into inputs and the final outputs into P2PKH
//!    outputs
//! 2. Add a change output, re-estimating the fee for the extra 34 bytes
//! 3. Hand the unsigned transaction and its spent outputs to a key chain

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use tracing::debug;

use duff_core::address::DashAddress;
use duff_core::constants::DUST_AMOUNT;
use duff_core::error::WalletError;
use duff_core::fee::FeeRates;
use duff_core::traits::UnsignedTransaction;
use duff_core::types::{Network, UnspentOutput};

use crate::coin_selection::SelectionResult;
use crate::estimator::{Output, TransactionEstimator};

/// An unsigned transaction with its fee accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransaction {
    /// Inputs and outputs, ready for signing.
    pub unsigned: UnsignedTransaction,
    /// UTXOs spent, in input order.
    pub inputs: Vec<UnspentOutput>,
    /// Payment outputs, in output order. Change, if any, follows them.
    pub outputs: Vec<Output>,
    /// Change output, if one was worth creating.
    pub change: Option<Output>,
    /// Final fee: inputs minus all outputs.
    pub fee: u64,
}

/// Builds transactions for one network and fee table.
#[derive(Debug, Clone, Copy)]
pub struct TransactionBuilder {
    network: Network,
    rates: FeeRates,
}

impl TransactionBuilder {
    /// Builder for `network`.
    pub fn new(network: Network, rates: FeeRates) -> Self {
        Self { network, rates }
    }

    /// Lay out the transaction for `selection`, sending any surplus above
    /// the fee to `change_address`.
    ///
    /// Change below the dust threshold is left to the fee.
    pub fn plan(&self, selection: &SelectionResult, change_address: &str) -> Result<PlannedTransaction, WalletError> {
        let out_value = selection
            .outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.satoshis))
            .ok_or_else(|| WalletError::InvalidAmount("output total overflows".into()))?;
        let base_need = out_value.saturating_add(selection.estimated_fee);
        if selection.utxos_value < base_need {
            return Err(WalletError::InsufficientFunds {
                have: selection.utxos_value,
                need: base_need,
            });
        }

        let mut with_change = TransactionEstimator::new(selection.fee_category, self.rates);
        with_change.add_inputs(&selection.utxos)?;
        with_change.add_outputs(selection.outputs.iter().cloned())?;
        with_change.add_outputs([Output::new(change_address, 0)])?;
        let fee_with_change = with_change.get_fee_estimate();

        let change_value = selection
            .utxos_value
            .checked_sub(out_value.saturating_add(fee_with_change))
            .filter(|v| *v >= DUST_AMOUNT);
        let change = change_value.map(|v| Output::new(change_address, v));
        let fee = selection.utxos_value - out_value - change_value.unwrap_or(0);
        debug!(
            inputs = selection.utxos.len(),
            outputs = selection.outputs.len(),
            change = change_value.unwrap_or(0),
            fee,
            "transaction planned"
        );

        let mut tx_outputs = Vec::with_capacity(selection.outputs.len() + 1);
        for output in selection.outputs.iter().chain(change.iter()) {
            tx_outputs.push(self.tx_out(output)?);
        }

        let mut tx_inputs = Vec::with_capacity(selection.utxos.len());
        let mut prevouts = Vec::with_capacity(selection.utxos.len());
        for utxo in &selection.utxos {
            let (input, prevout) = tx_in(utxo)?;
            tx_inputs.push(input);
            prevouts.push(prevout);
        }

        Ok(PlannedTransaction {
            unsigned: UnsignedTransaction {
                tx: Transaction {
                    version: Version::TWO,
                    lock_time: LockTime::ZERO,
                    input: tx_inputs,
                    output: tx_outputs,
                },
                prevouts,
            },
            inputs: selection.utxos.clone(),
            outputs: selection.outputs.clone(),
            change,
            fee,
        })
    }

    fn tx_out(&self, output: &Output) -> Result<TxOut, WalletError> {
        let address = DashAddress::parse_for(&output.address, self.network)?;
        Ok(TxOut {
            value: Amount::from_sat(output.satoshis),
            script_pubkey: address.script_pubkey(),
        })
    }
}

fn tx_in(utxo: &UnspentOutput) -> Result<(TxIn, TxOut), WalletError> {
    let txid = Txid::from_str(&utxo.tx_id)
        .map_err(|e| WalletError::Validation(format!("txid {}: {e}", utxo.tx_id)))?;
    let script = ScriptBuf::from_hex(&utxo.script)
        .map_err(|e| WalletError::Validation(format!("script of {}: {e}", utxo.key())))?;
    let input = TxIn {
        previous_output: OutPoint::new(txid, utxo.output_index),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    };
    let prevout = TxOut {
        value: Amount::from_sat(utxo.satoshis),
        script_pubkey: script,
    };
    Ok((input, prevout))
}
