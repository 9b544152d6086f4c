// Path: crates/utxo/tests/supervisor.rs
mod common;

use bitcoin::consensus::encode::deserialize;
use bitcoin::{Amount, Transaction};
use common::*;
use ferry_types::bridge::{MIMIR_MAX_UTXOS_TO_SPEND, MIMIR_NODE_PAUSE_CHAIN_GLOBAL};
use ferry_types::{Chain, ChainNetwork, Coin, NodeStatus};
use ferry_utxo::Bitcoin;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn network_fee_is_posted_only_when_the_maximum_changes() {
    let h = Harness::<Bitcoin>::new();
    let post = |rate: f64| {
        h.rpc.reply("getblockstats", json!({ "avgfeerate": rate }));
    };

    post(12.0);
    h.client.send_network_fee(10).await.unwrap();
    assert_eq!(
        *h.bridge.network_fees.lock(),
        vec![(10, Chain::BTC, 1000, 12)]
    );

    post(12.0);
    h.client.send_network_fee(11).await.unwrap();
    post(5.0);
    h.client.send_network_fee(12).await.unwrap();
    post(0.0);
    h.client.send_network_fee(13).await.unwrap();
    assert_eq!(h.bridge.network_fees.lock().len(), 1);
    assert_eq!(h.client.last_fee_rate(), 12);

    post(30.0);
    h.client.send_network_fee(14).await.unwrap();
    assert_eq!(h.bridge.network_fees.lock()[1], (14, Chain::BTC, 1000, 30));
}

#[tokio::test]
async fn network_fee_respects_the_relay_floor() {
    let h = Harness::<Bitcoin>::new();
    h.rpc.reply(
        "getnetworkinfo",
        json!({"relayfee": 0.00002, "subversion": "/Satoshi:25.0.0/"}),
    );
    h.client.update_network_info().await.unwrap();
    h.rpc.reply("getblockstats", json!({ "avgfeerate": 1 }));

    h.client.send_network_fee(10).await.unwrap();
    assert_eq!(h.bridge.network_fees.lock()[0].3, 2);
}

#[tokio::test]
async fn pause_follows_halt_heights() {
    let h = Harness::<Bitcoin>::new();
    assert!(!h.client.is_chain_paused().await);

    h.bridge.set_mimir(&Chain::BTC.halt_mimir_key(), 400);
    assert!(h.client.is_chain_paused().await);

    h.bridge.height.store(300, Ordering::Relaxed);
    assert!(!h.client.is_chain_paused().await);

    h.bridge.set_mimir(MIMIR_NODE_PAUSE_CHAIN_GLOBAL, 1);
    assert!(h.client.is_chain_paused().await);
}

#[tokio::test]
async fn insolvent_vault_is_reported_once_per_interval() {
    let mut h = Harness::<Bitcoin>::new();
    h.bridge.asgards.lock()[0].coins = vec![Coin::gas(Chain::BTC, 1_000_000)];
    h.serve_vault_utxos(&[(0xa1, 0.005, 3)]);

    h.client.report_solvency(200).await.unwrap();
    let report = h.solvency.try_recv().unwrap();
    assert_eq!(report.height, 200);
    assert_eq!(report.chain, Chain::BTC);
    assert_eq!(report.pub_key, h.vault);
    assert_eq!(report.coins, vec![Coin::gas(Chain::BTC, 500_000)]);

    assert!(!h.client.should_report_solvency(201));
    h.client.report_solvency(201).await.unwrap();
    assert!(h.solvency.try_recv().is_err());
}

fn consolidation_harness(max_utxos: i64) -> Harness<Bitcoin> {
    let h = Harness::<Bitcoin>::new();
    *h.bridge.status.lock() = NodeStatus::Active;
    h.bridge.set_mimir(MIMIR_MAX_UTXOS_TO_SPEND, max_utxos);
    h.serve_vault_utxos(&[(0xc1, 0.01, 5), (0xc2, 0.01, 5), (0xc3, 0.01, 5)]);
    h.rpc.reply("getblockcount", json!(100));
    h.rpc.on("sendrawtransaction", |p| Ok(p[0].clone()));
    h
}

#[tokio::test]
async fn consolidation_merges_utxos_back_into_the_vault() {
    let h = consolidation_harness(2);
    h.client.consolidate_utxos().await.unwrap();

    let sent = h.rpc.calls("sendrawtransaction");
    assert_eq!(sent.len(), 1);
    let raw = hex::decode(sent[0][0].as_str().unwrap()).unwrap();
    let tx: Transaction = deserialize(&raw).unwrap();

    let vault_script = h
        .vault
        .address(Chain::BTC, ChainNetwork::MainNet)
        .unwrap()
        .script_pubkey()
        .unwrap();
    // Two inputs at the fallback rate of 25 sat/vbyte, no change.
    assert_eq!(tx.input.len(), 2);
    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[0].value, Amount::from_sat(2_000_000 - 9_000));
    assert_eq!(tx.output[0].script_pubkey, vault_script);
    assert!(tx.output[1].script_pubkey.is_op_return());
    assert!(tx.output[1]
        .script_pubkey
        .as_bytes()
        .ends_with(b"consolidate"));

    let meta = h.client.store().get_block_meta(100).unwrap().unwrap();
    assert!(meta.is_self_transaction(&tx.compute_txid().to_string()));
}

#[tokio::test]
async fn consolidation_waits_for_enough_utxos_and_an_active_node() {
    let h = consolidation_harness(5);
    h.client.consolidate_utxos().await.unwrap();
    assert!(h.rpc.calls("sendrawtransaction").is_empty());

    let h = consolidation_harness(2);
    *h.bridge.status.lock() = NodeStatus::Standby;
    h.client.consolidate_utxos().await.unwrap();
    assert!(h.rpc.calls("listunspent").is_empty());
}

#[tokio::test]
async fn started_client_scans_from_the_configured_height() {
    let mut h = Harness::<Bitcoin>::with_config(|cfg| {
        cfg.block_scanner.start_block_height = 99;
        cfg.block_scanner.block_height_discover_backoff_ms = 20;
    });
    let parent = raw_tx(
        &txid(0x11),
        vec![spend(&txid(0x01), 0)],
        vec![pay(SENDER_SEED, Chain::BTC, 0.2, 0)],
    );
    let transfer = raw_tx(
        &txid(0x22),
        vec![spend(&txid(0x11), 0)],
        vec![
            pay(VAULT_SEED, Chain::BTC, 0.1, 0),
            op_return("SWAP:ETH.ETH:0x4c1d4d2a5c9a1e2f", 1),
        ],
    );
    h.rpc.serve_txs(vec![parent]);
    h.rpc
        .serve_blocks(vec![block("h100", "h99", 100, vec![transfer])]);
    h.rpc.reply("getblockcount", json!(100));
    h.rpc.reply("createwallet", json!({"name": ""}));
    h.rpc.reply("importaddress", json!(null));

    h.client.start().await;
    let txin = tokio::time::timeout(Duration::from_secs(5), h.txs.recv())
        .await
        .expect("observation within timeout")
        .expect("queue open");
    h.client.stop().await;

    assert_eq!(txin.tx_array.len(), 1);
    assert_eq!(txin.tx_array[0].tx, txid(0x22));
    assert_eq!(txin.tx_array[0].block_height, 100);
    assert_eq!(h.client.store().get_scan_pos().unwrap(), Some(100));
    assert_eq!(h.client.current_height(), 100);
    assert!(!h.rpc.calls("importaddress").is_empty());
}
