//! End-to-end account flow against the in-memory transport.
//!
//! Each test opens a wallet on the ABANDON mnemonic, funds addresses on the
//! fake chain, connects an account so its workers sync, then spends.

use std::sync::Arc;

use duff_core::bitcoin::Transaction;
use duff_core::bitcoin::consensus::encode::deserialize_hex;
use duff_core::config::WalletConfig;
use duff_core::events::{AccountEvent, StorageEvent, WorkerEventKind};
use duff_core::traits::Transport;
use duff_core::types::{ChainType, Network, TransactionKind};
use duff_core::WalletError;
use duff_storage::MemoryAdapter;
use duff_storage::{Storage, StorageHandle};
use duff_tests::helpers::*;
use duff_wallet::history::HistoryKind;
use duff_wallet::workers::{ADDRESS_SYNC, BLOCK_HEADERS, CHAIN_WATCHER};
use duff_wallet::{
    AccountOptions, AccountState, CoinSelectionStrategy, CreateTransactionOptions, Wallet, WalletSecret,
};

fn wallet_with(transport: &Arc<InMemoryTransport>) -> Wallet {
    wallet_with_config(transport, testnet_config())
}

fn wallet_with_config(transport: &Arc<InMemoryTransport>, config: WalletConfig) -> Wallet {
    let transport: Arc<dyn Transport> = transport.clone();
    Wallet::new(WalletSecret::mnemonic(ABANDON), config)
        .unwrap()
        .with_transport(transport)
}

#[tokio::test]
async fn connect_syncs_balance_and_headers() {
    let chain = Arc::new(InMemoryTransport::at_height(120));
    let first = abandon_address("m/44'/1'/0'/0/0");
    let funding = chain.fund(&first, 150_000, Some(100));

    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    assert_eq!(account.state(), AccountState::Ready);
    assert!(account.is_ready().await);

    assert_eq!(account.get_confirmed_balance().unwrap(), 150_000);
    assert_eq!(account.get_unconfirmed_balance().unwrap(), 0);
    let utxos = account.get_utxos().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].tx_id, funding);

    let storage = account.storage().read();
    assert_eq!(storage.chain_height(Network::Testnet), 120);
    let headers = storage.chain(Network::Testnet).unwrap();
    assert!(headers.block_header(100).is_some());
    assert!(headers.block_header(120).is_some());
    drop(storage);

    // Address 0 became used, so the gap window moved by one.
    let external = account.get_addresses(ChainType::External).unwrap();
    assert_eq!(external.len(), 4);
    assert!(external[0].used);

    let history = account.get_transaction_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, HistoryKind::Received);
    assert_eq!(history[0].satoshis_balance_impact, 150_000);

    account.disconnect().await.unwrap();
    assert_eq!(chain.connection_calls(), (1, 1));
}

#[tokio::test]
async fn spend_then_broadcast_consumes_inputs() {
    let chain = Arc::new(InMemoryTransport::at_height(50));
    chain.fund(&abandon_address("m/44'/1'/0'/0/0"), 100_000, Some(40));
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();

    let recipient = foreign_address();
    let signed = account
        .create_transaction(CreateTransactionOptions::to(recipient.clone(), 30_000))
        .unwrap();
    assert_eq!(signed.fee, 239);
    let change = signed.change.as_ref().unwrap();
    assert_eq!(change.satoshis, 100_000 - 30_000 - 239);
    assert_eq!(change.address, abandon_address("m/44'/1'/0'/1/0"));
    // Building does not touch storage.
    assert_eq!(account.get_utxos().unwrap().len(), 1);

    let mut events = account.subscribe();
    let txid = account.broadcast_transaction(&signed, false).await.unwrap();
    assert_eq!(txid, signed.txid);
    assert_eq!(chain.broadcasts(), vec![(signed.raw_hex.clone(), false)]);
    assert!(account.get_utxos().unwrap().is_empty());

    let mut saw_broadcast = false;
    while let Ok(event) = events.try_recv() {
        if event == (AccountEvent::TransactionBroadcast { txid: txid.clone() }) {
            saw_broadcast = true;
        }
    }
    assert!(saw_broadcast);

    let history = account.get_transaction_history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].tx_id, txid);
    assert_eq!(history[0].kind, HistoryKind::Sent);
    assert_eq!(history[0].fee_impact, 239);
    assert_eq!(history[0].satoshis_balance_impact, -(30_000 + 239));

    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn raw_transaction_matches_the_plan() {
    let chain = Arc::new(InMemoryTransport::at_height(50));
    chain.fund(&abandon_address("m/44'/1'/0'/0/0"), 60_000, Some(40));
    chain.fund(&abandon_address("m/44'/1'/0'/0/1"), 50_000, Some(41));
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();

    let recipient = foreign_address();
    let signed = account
        .create_transaction(CreateTransactionOptions::to(recipient.clone(), 90_000))
        .unwrap();
    assert_eq!(signed.inputs.len(), 2);
    let change = signed.change.clone().unwrap();

    let decoded: Transaction = deserialize_hex(&signed.raw_hex).unwrap();
    assert_eq!(decoded.compute_txid().to_string(), signed.txid);

    let outpoints: Vec<(String, u32)> = decoded
        .input
        .iter()
        .map(|txin| (txin.previous_output.txid.to_string(), txin.previous_output.vout))
        .collect();
    let planned: Vec<(String, u32)> = signed
        .inputs
        .iter()
        .map(|u| (u.tx_id.clone(), u.output_index))
        .collect();
    assert_eq!(outpoints, planned);
    assert!(decoded.input.iter().all(|txin| !txin.script_sig.is_empty()));

    let values: Vec<u64> = decoded.output.iter().map(|o| o.value.to_sat()).collect();
    assert_eq!(values, vec![90_000, change.satoshis]);
    assert_eq!(decoded.output[0].script_pubkey.to_hex_string(), p2pkh_script(&recipient));
    assert_eq!(decoded.output[1].script_pubkey.to_hex_string(), p2pkh_script(&change.address));

    let spent: u64 = signed.inputs.iter().map(|u| u.satoshis).sum();
    let paid: u64 = values.iter().sum();
    assert_eq!(spent, 110_000);
    assert_eq!(spent - paid, signed.fee);

    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn configured_input_cap_limits_parsed_strategy() {
    let chain = Arc::new(InMemoryTransport::at_height(50));
    for (i, height) in [(0, 40), (1, 41), (2, 42)] {
        chain.fund(&abandon_address(&format!("m/44'/1'/0'/0/{i}")), 100_000, Some(height));
    }
    let config = WalletConfig {
        max_inputs: 1,
        ..testnet_config()
    };
    let wallet = wallet_with_config(&chain, config);
    let strategy: CoinSelectionStrategy = "transaction-optimized".parse().unwrap();
    let account = wallet
        .create_account(AccountOptions::default().with_strategy(strategy.clone()))
        .unwrap();
    account.connect().await.unwrap();
    assert_eq!(account.get_utxos().unwrap().len(), 3);

    let err = account
        .create_transaction(CreateTransactionOptions::to(foreign_address(), 150_000))
        .unwrap_err();
    assert!(matches!(err.root_cause(), WalletError::InsufficientFunds { .. }), "{err:?}");

    let mut per_payment = CreateTransactionOptions::to(foreign_address(), 150_000);
    per_payment.strategy = Some(strategy);
    assert!(account.create_transaction(per_payment).is_err());

    let single = account
        .create_transaction(CreateTransactionOptions::to(foreign_address(), 90_000))
        .unwrap();
    assert_eq!(single.inputs.len(), 1);

    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn rejected_broadcast_leaves_storage_alone() {
    let chain = Arc::new(InMemoryTransport::at_height(50));
    chain.fund(&abandon_address("m/44'/1'/0'/0/1"), 80_000, Some(45));
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    assert_eq!(account.get_confirmed_balance().unwrap(), 80_000);

    chain.reject_broadcasts(true);
    let signed = account
        .create_transaction(CreateTransactionOptions::to(foreign_address(), 80_000).deduct_fee())
        .unwrap();
    assert_eq!(signed.fee, 205);
    assert_eq!(signed.outputs[0].satoshis, 80_000 - 205);

    let err = account.broadcast_transaction(&signed, false).await.unwrap_err();
    assert!(matches!(err, WalletError::Transport { .. }));
    assert_eq!(account.get_utxos().unwrap().len(), 1);
    assert_eq!(account.get_transactions().unwrap().len(), 1);

    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn instant_send_pays_per_input() {
    let chain = Arc::new(InMemoryTransport::at_height(50));
    chain.fund(&abandon_address("m/44'/1'/0'/0/0"), 40_000, Some(30));
    chain.fund(&abandon_address("m/44'/1'/0'/0/1"), 40_000, Some(31));
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();

    let signed = account
        .create_transaction(CreateTransactionOptions::to(foreign_address(), 50_000).instant_send())
        .unwrap();
    assert_eq!(signed.inputs.len(), 2);
    assert_eq!(signed.fee, 20_000);

    account.broadcast_transaction(&signed, true).await.unwrap();
    assert!(chain.broadcasts()[0].1);
    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn immature_coinbase_is_not_spendable() {
    let chain = Arc::new(InMemoryTransport::at_height(150));
    chain.fund_with_kind(
        &abandon_address("m/44'/1'/0'/0/0"),
        500_000,
        Some(100),
        TransactionKind::Coinbase {
            payload_height: Some(100),
        },
    );
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    assert!(account.get_utxos().unwrap().is_empty());

    chain.set_height(200);
    account.execute_worker(CHAIN_WATCHER).await.unwrap();
    assert_eq!(account.get_utxos().unwrap().len(), 1);
    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn rehydrated_storage_uses_configured_maturity() {
    let chain = Arc::new(InMemoryTransport::at_height(103));
    chain.fund_with_kind(
        &abandon_address("m/44'/1'/0'/0/0"),
        500_000,
        Some(100),
        TransactionKind::Coinbase {
            payload_height: Some(100),
        },
    );
    let storage = StorageHandle::rehydrate(Arc::new(MemoryAdapter::new())).await.unwrap();
    assert_eq!(storage.read().coinbase_maturity(), 100);

    let config = WalletConfig {
        coinbase_maturity: 2,
        ..testnet_config()
    };
    let wallet = wallet_with_config(&chain, config).with_storage(storage);
    assert_eq!(wallet.storage().read().coinbase_maturity(), 2);

    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    assert_eq!(account.get_utxos().unwrap().len(), 1);
    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn unconfirmed_funds_show_up_as_unconfirmed() {
    let chain = Arc::new(InMemoryTransport::at_height(10));
    chain.fund(&abandon_address("m/44'/1'/0'/1/0"), 12_345, None);
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    assert_eq!(account.get_confirmed_balance().unwrap(), 0);
    assert_eq!(account.get_unconfirmed_balance().unwrap(), 12_345);
    assert_eq!(account.get_total_balance().unwrap(), 12_345);
    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn workers_report_lifecycle_events() {
    let chain = Arc::new(InMemoryTransport::at_height(5));
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    let order = account.worker_order().await;
    let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
    assert!(pos(CHAIN_WATCHER) < pos(ADDRESS_SYNC));
    assert!(pos(ADDRESS_SYNC) < pos(BLOCK_HEADERS));

    let mut events = account.subscribe();
    account.connect().await.unwrap();
    account.disconnect().await.unwrap();

    let mut started = Vec::new();
    let mut stopped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let AccountEvent::Worker(w) = event {
            match w.kind {
                WorkerEventKind::Started => started.push(w.name),
                WorkerEventKind::Stopped => stopped.push(w.name),
                _ => {}
            }
        }
    }
    assert_eq!(started, order);
    stopped.reverse();
    assert_eq!(stopped, order);
    assert_eq!(account.state(), AccountState::Disconnected);
    assert!(!account.is_ready().await);
}

#[tokio::test]
async fn header_cache_is_bounded_and_not_refetched() {
    let chain = Arc::new(InMemoryTransport::at_height(50));
    for (i, height) in [(0, 10), (1, 11), (2, 12)] {
        chain.fund(&abandon_address(&format!("m/44'/1'/0'/0/{i}")), 5_000, Some(height));
    }
    let config = WalletConfig {
        max_headers_to_keep: 2,
        ..testnet_config()
    };
    let wallet = wallet_with_config(&chain, config);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    assert_eq!(chain.header_requests(), 2);
    {
        let storage = account.storage().read();
        let headers = storage.chain(Network::Testnet).unwrap();
        assert_eq!(headers.header_count(), 2);
        assert!(headers.block_header(12).is_some());
        assert!(headers.block_header(50).is_some());
    }

    let mut events = account.subscribe();
    for _ in 0..3 {
        account.execute_worker(BLOCK_HEADERS).await.unwrap();
    }
    assert_eq!(chain.header_requests(), 2);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, AccountEvent::Storage(StorageEvent::BlockHeaderImported { .. })),
            "{event:?}"
        );
    }

    // A new tip replaces the old one; the newest transaction header stays.
    chain.set_height(51);
    account.execute_worker(CHAIN_WATCHER).await.unwrap();
    account.execute_worker(BLOCK_HEADERS).await.unwrap();
    account.execute_worker(BLOCK_HEADERS).await.unwrap();
    assert_eq!(chain.header_requests(), 3);
    {
        let storage = account.storage().read();
        let headers = storage.chain(Network::Testnet).unwrap();
        assert!(headers.block_header(12).is_some());
        assert!(headers.block_header(51).is_some());
        assert!(headers.block_header(50).is_none());
    }

    account.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_saves_through_adapter() {
    let chain = Arc::new(InMemoryTransport::at_height(5));
    chain.fund(&abandon_address("m/44'/1'/0'/0/2"), 9_000, Some(4));
    let adapter = Arc::new(MemoryAdapter::new());
    let storage = StorageHandle::with_adapter(Storage::new(), adapter.clone());
    let wallet = wallet_with(&chain).with_storage(storage);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    wallet.disconnect().await.unwrap();

    assert_eq!(adapter.save_count(), 1);
    let restored = Storage::from_snapshot(adapter.last().unwrap()).unwrap();
    assert_eq!(restored.get_confirmed_balance(wallet.id(), 0).unwrap(), 9_000);
}

#[tokio::test]
async fn exported_cache_restores_addresses() {
    let chain = Arc::new(InMemoryTransport::at_height(20));
    chain.fund(&abandon_address("m/44'/1'/0'/0/0"), 1_000, Some(19));
    let wallet = wallet_with(&chain);
    let account = wallet.create_account(AccountOptions::default()).unwrap();
    account.connect().await.unwrap();
    let cache = account.export_cache().unwrap();
    account.disconnect().await.unwrap();

    let offline = Wallet::new(WalletSecret::mnemonic(ABANDON), testnet_config()).unwrap();
    let restored = offline
        .create_account(AccountOptions::default().with_cache(cache))
        .unwrap();
    assert_eq!(restored.get_confirmed_balance().unwrap(), 1_000);
    assert_eq!(restored.get_utxos().unwrap().len(), 1);
    assert_eq!(restored.get_transactions().unwrap().len(), 1);
}
