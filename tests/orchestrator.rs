use std::cell::RefCell;
use std::str::FromStr;

use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Network as BitcoinNetwork, Txid};
use btc_wallet_cli::config::OperatorKeys;
use btc_wallet_cli::error::{AppError, IndexerError};
use btc_wallet_cli::indexer::Indexer;
use btc_wallet_cli::orchestrator::{run_send, SendOptions, TxOutcome};
use btc_wallet_cli::transaction::deserialize_tx_hex;
use btc_wallet_cli::types::{ScriptType, Utxo};

const KEY_ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";
const KEY_ONE_P2PKH: &str = "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r";
const KEY_ONE_P2WPKH: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
const KEY_TWO_P2WPKH: &str = "tb1qq6hag67dl53wl99vzg42z8eyzfz2xlkvvlryfj";
const KEY_TWO_P2PKH: &str = "mg8Jz5776UdyiYcBb9Z873NTozEiADRW5H";
const PREV_TXID: &str = "5e2383defe7efcbdc9fdd6dba55da148b206617bbb49e6bb93fce7bfbb459d44";
const EXPECTED_TXID: &str = "d4ee06ec5ec38ffe47fe076e5ef1f0f020226789b48709a5e7ef5b9d5b273353";
const HELLO_SIGNATURE: &str = "3045022100df3c82a158518f82ce2881b5546ac3174f837dfd125d57f481958ebcb381a7a0\
    02200ee0e5dfea1ed792d882c1273bfe9d90d8fe6201157f1d332d4e26e4fc92a183";

/// 応答を固定したインデクサ。送信された raw tx を記録する
struct FakeIndexer {
    utxos: Result<Vec<Utxo>, u16>,
    submitted: RefCell<Vec<String>>,
    list_calls: RefCell<Vec<String>>,
}

impl FakeIndexer {
    fn with_utxos(utxos: Vec<Utxo>) -> Self {
        Self {
            utxos: Ok(utxos),
            submitted: RefCell::new(Vec::new()),
            list_calls: RefCell::new(Vec::new()),
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            utxos: Err(status),
            submitted: RefCell::new(Vec::new()),
            list_calls: RefCell::new(Vec::new()),
        }
    }
}

impl Indexer for FakeIndexer {
    async fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>, AppError> {
        self.list_calls.borrow_mut().push(address.to_string());
        match &self.utxos {
            Ok(utxos) => Ok(utxos.clone()),
            Err(status) => Err(AppError::Indexer {
                context: format!("list_unspent(addr={})", address),
                source: IndexerError::HttpStatus {
                    status: *status,
                    body: "unavailable".into(),
                },
            }),
        }
    }

    async fn submit(&self, raw_tx_hex: &str) -> Result<String, AppError> {
        self.submitted.borrow_mut().push(raw_tx_hex.to_string());
        let tx = deserialize_tx_hex(raw_tx_hex)?;
        Ok(tx.compute_txid().to_string())
    }
}

fn utxo(value: u64, confirmed: bool) -> Utxo {
    Utxo {
        txid: Txid::from_str(PREV_TXID).unwrap(),
        vout: 0,
        value,
        confirmed,
    }
}

fn operator(address: &str) -> OperatorKeys {
    OperatorKeys::from_values(Some(KEY_ONE.into()), Some(address.into())).unwrap()
}

fn options_to(to: &str) -> SendOptions {
    SendOptions {
        to: to.to_string(),
        ..SendOptions::default()
    }
}

#[tokio::test]
async fn no_utxos_skips_transaction() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::with_utxos(Vec::new());
    let report = run_send(
        &secp,
        BitcoinNetwork::Testnet,
        &operator(KEY_ONE_P2WPKH),
        &indexer,
        &SendOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.signature_hex, HELLO_SIGNATURE);
    assert_eq!(report.address_type, ScriptType::P2WPKH);
    assert_eq!(report.utxo_count, 0);
    assert!(matches!(report.outcome, TxOutcome::Skipped { .. }));
    assert_eq!(indexer.list_calls.borrow().as_slice(), [KEY_ONE_P2WPKH]);
    assert!(indexer.submitted.borrow().is_empty());
}

#[tokio::test]
async fn builds_without_broadcasting_by_default() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::with_utxos(vec![utxo(5000, true)]);
    let report = run_send(
        &secp,
        BitcoinNetwork::Testnet,
        &operator(KEY_ONE_P2PKH),
        &indexer,
        &options_to(KEY_TWO_P2WPKH),
    )
    .await
    .unwrap();

    match &report.outcome {
        TxOutcome::NotBroadcast { txid, inputs, fee, change, reason, .. } => {
            assert_eq!(txid, EXPECTED_TXID);
            assert_eq!(*inputs, 1);
            assert_eq!(*fee, 1000);
            assert_eq!(*change, Some(3000));
            assert_eq!(reason, "broadcast disabled");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(indexer.submitted.borrow().is_empty());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"]["status"], "not_broadcast");
    assert_eq!(json["address_type"], "p2pkh");
}

#[tokio::test]
async fn broadcast_submits_signed_transaction() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::with_utxos(vec![utxo(5000, true)]);
    let options = SendOptions {
        broadcast: true,
        ..options_to(KEY_TWO_P2WPKH)
    };
    let report = run_send(&secp, BitcoinNetwork::Testnet, &operator(KEY_ONE_P2PKH), &indexer, &options)
        .await
        .unwrap();

    let TxOutcome::Broadcast { txid, raw_tx, .. } = &report.outcome else {
        panic!("unexpected outcome: {:?}", report.outcome);
    };
    assert_eq!(txid, EXPECTED_TXID);
    assert_eq!(indexer.submitted.borrow().as_slice(), [raw_tx.clone()]);
}

#[tokio::test]
async fn confirmed_only_ignores_mempool_outputs() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::with_utxos(vec![utxo(5000, false)]);
    let options = SendOptions {
        confirmed_only: true,
        ..options_to(KEY_TWO_P2PKH)
    };
    let report = run_send(&secp, BitcoinNetwork::Testnet, &operator(KEY_ONE_P2WPKH), &indexer, &options)
        .await
        .unwrap();
    assert_eq!(report.utxo_count, 1);
    assert!(matches!(report.outcome, TxOutcome::Skipped { .. }));

    let report = run_send(
        &secp,
        BitcoinNetwork::Testnet,
        &operator(KEY_ONE_P2WPKH),
        &indexer,
        &options_to(KEY_TWO_P2PKH),
    )
    .await
    .unwrap();
    assert!(matches!(report.outcome, TxOutcome::NotBroadcast { .. }));
}

#[tokio::test]
async fn foreign_sender_address_is_rejected_before_indexer() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::with_utxos(vec![utxo(5000, true)]);
    let err = run_send(
        &secp,
        BitcoinNetwork::Testnet,
        &operator(KEY_TWO_P2WPKH),
        &indexer,
        &SendOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::AddressMismatch { .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(indexer.list_calls.borrow().is_empty());
}

#[tokio::test]
async fn insufficient_funds_exit_code() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::with_utxos(vec![utxo(1500, true)]);
    let err = run_send(
        &secp,
        BitcoinNetwork::Testnet,
        &operator(KEY_ONE_P2WPKH),
        &indexer,
        &options_to(KEY_TWO_P2PKH),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        AppError::InsufficientFunds { available: 1500, required: 2000, fee: 1000 }
    ));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn indexer_failure_propagates() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::failing(503);
    let err = run_send(
        &secp,
        BitcoinNetwork::Testnet,
        &operator(KEY_ONE_P2WPKH),
        &indexer,
        &SendOptions::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.exit_code(), 2);
    assert!(err.diagnostic().contains(KEY_ONE_P2WPKH));
}

#[tokio::test]
async fn invalid_destination_fails_without_submit() {
    let secp = Secp256k1::new();
    let indexer = FakeIndexer::with_utxos(vec![utxo(5000, true)]);
    let options = SendOptions {
        broadcast: true,
        ..options_to("not-an-address")
    };
    let err = run_send(&secp, BitcoinNetwork::Testnet, &operator(KEY_ONE_P2WPKH), &indexer, &options)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidAddress { .. }));
    assert!(indexer.submitted.borrow().is_empty());
}
