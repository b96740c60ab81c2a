//! Transaction history from the account's point of view.

use std::collections::HashSet;

use serde::Serialize;

use duff_core::types::TransactionRecord;

/// Direction of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Funds arrived from outside the account.
    Received,
    /// Funds left the account.
    Sent,
    /// Funds moved between the account's own addresses.
    AddressTransfer,
}

/// One transaction classified against the account's addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Transaction id.
    pub tx_id: String,
    /// Including block, if confirmed.
    pub block_hash: Option<String>,
    /// Block or first-seen time.
    pub time: Option<i64>,
    /// Direction.
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    /// Net change of the account balance in duffs.
    pub satoshis_balance_impact: i64,
    /// Fee paid by the account, 0 for incoming transactions.
    pub fee_impact: u64,
    /// Distinct input addresses.
    pub from: Vec<String>,
    /// Distinct output addresses.
    pub to: Vec<String>,
}

/// Classify `transactions` against `own` addresses, newest first.
///
/// Unconfirmed transactions sort ahead of confirmed ones.
pub fn build_history<'a>(
    transactions: impl IntoIterator<Item = &'a TransactionRecord>,
    own: &HashSet<String>,
) -> Vec<HistoryEntry> {
    let mut entries: Vec<(Option<u32>, HistoryEntry)> = transactions
        .into_iter()
        .map(|tx| (tx.block_height, classify(tx, own)))
        .collect();
    entries.sort_by(|(ha, a), (hb, b)| {
        let unconfirmed = hb.is_none().cmp(&ha.is_none());
        unconfirmed
            .then_with(|| hb.cmp(ha))
            .then_with(|| b.time.cmp(&a.time))
            .then_with(|| a.tx_id.cmp(&b.tx_id))
    });
    entries.into_iter().map(|(_, e)| e).collect()
}

fn classify(tx: &TransactionRecord, own: &HashSet<String>) -> HistoryEntry {
    let is_own = |a: &Option<String>| a.as_ref().is_some_and(|a| own.contains(a));

    let own_in: u64 = tx
        .inputs
        .iter()
        .filter(|i| is_own(&i.address))
        .filter_map(|i| i.satoshis)
        .sum();
    let has_own_input = tx.inputs.iter().any(|i| is_own(&i.address));
    let own_out: u64 = tx
        .outputs
        .iter()
        .filter(|o| is_own(&o.address))
        .map(|o| o.satoshis)
        .sum();
    let all_outputs_own = tx.outputs.iter().all(|o| is_own(&o.address));

    let kind = match (has_own_input, all_outputs_own) {
        (false, _) => HistoryKind::Received,
        (true, true) => HistoryKind::AddressTransfer,
        (true, false) => HistoryKind::Sent,
    };
    let fee_impact = if has_own_input {
        tx.fee.unwrap_or_else(|| {
            let total_in: Option<u64> = tx.inputs.iter().map(|i| i.satoshis).sum();
            let total_out: u64 = tx.outputs.iter().map(|o| o.satoshis).sum();
            total_in.map_or(0, |t| t.saturating_sub(total_out))
        })
    } else {
        0
    };

    HistoryEntry {
        tx_id: tx.txid.clone(),
        block_hash: tx.block_hash.clone(),
        time: tx.time,
        kind,
        satoshis_balance_impact: own_out as i64 - own_in as i64,
        fee_impact,
        from: distinct(tx.inputs.iter().filter_map(|i| i.address.clone())),
        to: distinct(tx.outputs.iter().filter_map(|o| o.address.clone())),
    }
}

fn distinct(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use duff_core::types::{TransactionKind, TxInputRecord, TxOutputRecord};

    fn own() -> HashSet<String> {
        ["yMine1", "yMine2"].iter().map(|s| s.to_string()).collect()
    }

    fn tx(id: u8, height: Option<u32>, ins: &[(&str, u64)], outs: &[(&str, u64)]) -> TransactionRecord {
        TransactionRecord {
            txid: format!("{id:02x}").repeat(32),
            raw: None,
            block_hash: height.map(|h| format!("{h:064x}")),
            block_height: height,
            time: height.map(|h| 1_700_000_000 + i64::from(h)),
            fee: None,
            inputs: ins
                .iter()
                .map(|(a, s)| TxInputRecord {
                    txid: Some("ff".repeat(32)),
                    output_index: 0,
                    address: Some(a.to_string()),
                    satoshis: Some(*s),
                })
                .collect(),
            outputs: outs
                .iter()
                .map(|(a, s)| TxOutputRecord {
                    address: Some(a.to_string()),
                    satoshis: *s,
                    script: String::new(),
                })
                .collect(),
            kind: TransactionKind::Standard,
        }
    }

    #[test]
    fn incoming_is_received() {
        let t = tx(1, Some(10), &[("yOther", 5_000)], &[("yMine1", 4_000), ("yOther", 800)]);
        let h = build_history([&t], &own());
        assert_eq!(h[0].kind, HistoryKind::Received);
        assert_eq!(h[0].satoshis_balance_impact, 4_000);
        assert_eq!(h[0].fee_impact, 0);
        assert_eq!(h[0].from, vec!["yOther"]);
    }

    #[test]
    fn outgoing_is_sent_with_fee() {
        let t = tx(2, Some(11), &[("yMine1", 10_000)], &[("yOther", 6_000), ("yMine2", 3_774)]);
        let h = build_history([&t], &own());
        assert_eq!(h[0].kind, HistoryKind::Sent);
        assert_eq!(h[0].satoshis_balance_impact, -6_226);
        assert_eq!(h[0].fee_impact, 226);
    }

    #[test]
    fn self_payment_is_address_transfer() {
        let t = tx(3, None, &[("yMine1", 10_000)], &[("yMine2", 9_800)]);
        let h = build_history([&t], &own());
        assert_eq!(h[0].kind, HistoryKind::AddressTransfer);
        assert_eq!(h[0].satoshis_balance_impact, -200);
        assert_eq!(h[0].fee_impact, 200);
    }

    #[test]
    fn newest_first_with_unconfirmed_on_top() {
        let old = tx(1, Some(5), &[("yOther", 1)], &[("yMine1", 1)]);
        let new = tx(2, Some(9), &[("yOther", 1)], &[("yMine1", 1)]);
        let pending = tx(3, None, &[("yOther", 1)], &[("yMine1", 1)]);
        let h = build_history([&old, &pending, &new], &own());
        let order: Vec<&str> = h.iter().map(|e| &e.tx_id[..2]).collect();
        assert_eq!(order, vec!["03", "02", "01"]);
    }

    #[test]
    fn type_serializes_snake_case() {
        let t = tx(3, None, &[("yMine1", 10)], &[("yMine2", 9)]);
        let json = serde_json::to_value(&build_history([&t], &own())[0]).unwrap();
        assert_eq!(json["type"], "address_transfer");
        assert!(json.get("satoshisBalanceImpact").is_some());
    }
}
