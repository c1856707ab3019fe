use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Network as BitcoinNetwork;
use serde::Serialize;

use crate::config::OperatorKeys;
use crate::error::AppError;
use crate::indexer::Indexer;
use crate::keys::{self, WalletKey};
use crate::transaction::{self, TxRequest, DEFAULT_FEE_SATS};
use crate::types::{ScriptType, WalletAddress};

pub const DEFAULT_DESTINATION: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
pub const DEFAULT_AMOUNT_SATS: u64 = 1000;
pub const DEFAULT_MESSAGE: &str = "Hello BTC";

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub to: String,
    pub amount: u64,
    pub fee: u64,
    pub message: String,
    /// false の場合は構築・署名のみ行い送信しない
    pub broadcast: bool,
    pub confirmed_only: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            to: DEFAULT_DESTINATION.to_string(),
            amount: DEFAULT_AMOUNT_SATS,
            fee: DEFAULT_FEE_SATS,
            message: DEFAULT_MESSAGE.to_string(),
            broadcast: false,
            confirmed_only: false,
        }
    }
}

/// `send` の実行結果
#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub address: String,
    pub address_type: ScriptType,
    pub message: String,
    pub signature_hex: String,
    pub utxo_count: usize,
    pub outcome: TxOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxOutcome {
    Broadcast {
        txid: String,
        raw_tx: String,
        inputs: usize,
        fee: u64,
        change: Option<u64>,
    },
    NotBroadcast {
        txid: String,
        raw_tx: String,
        inputs: usize,
        fee: u64,
        change: Option<u64>,
        reason: String,
    },
    Skipped {
        reason: String,
    },
}

/// 鍵の読み込みから送信までの一連の流れ
///
/// 鍵はこの関数のスコープ内でのみ保持され、戻る時に消去される。
pub async fn run_send<I: Indexer>(
    secp: &Secp256k1<All>,
    network: BitcoinNetwork,
    operator: &OperatorKeys,
    indexer: &I,
    options: &SendOptions,
) -> Result<SendReport, AppError> {
    let key = WalletKey::import(secp, &operator.private_key_hex)?;
    let sender = WalletAddress::decode(&operator.address, network)?;
    if !key.owns(&sender) {
        log::error!("{} は BTC_PRIVATE_KEY から導出されるアドレスではありません", operator.address);
        return Err(AppError::AddressMismatch { address: operator.address.clone() });
    }
    log::info!("読み込んだアドレス: {} ({})", operator.address, sender.script_type());

    let signature_hex = keys::sign_message(secp, &key, options.message.as_bytes())?;
    log::info!("'{}' の署名: {}", options.message, signature_hex);

    log::info!("UTXO を取得しています...");
    let utxos = indexer.list_unspent(&operator.address).await?;
    let utxo_count = utxos.len();
    log::info!("{} 個の UTXO が見つかりました", utxo_count);

    let spendable: Vec<_> = if options.confirmed_only {
        utxos.into_iter().filter(|u| u.confirmed).collect()
    } else {
        utxos
    };

    let report = |outcome| SendReport {
        address: operator.address.clone(),
        address_type: sender.script_type(),
        message: options.message.clone(),
        signature_hex: signature_hex.clone(),
        utxo_count,
        outcome,
    };

    if spendable.is_empty() {
        log::info!("使用可能な UTXO が無いため、トランザクションの構築をスキップします");
        return Ok(report(TxOutcome::Skipped {
            reason: "no unspent outputs".to_string(),
        }));
    }

    let request = TxRequest::new(&operator.address, &options.to, options.amount, network)
        .with_fee(options.fee);
    let signed = transaction::build_signed_transaction(secp, &key, &request, &spendable)?;
    let raw_tx = signed.raw_hex();
    log::debug!("Raw transaction hex: {}", raw_tx);

    if !options.broadcast {
        log::info!("送信は無効です (--broadcast で送信します)。txid={}", signed.txid);
        return Ok(report(TxOutcome::NotBroadcast {
            txid: signed.txid.to_string(),
            raw_tx,
            inputs: signed.spent.len(),
            fee: signed.fee,
            change: signed.change,
            reason: "broadcast disabled".to_string(),
        }));
    }

    let txid = indexer.submit(&raw_tx).await?;
    if txid != signed.txid.to_string() {
        log::warn!("インデクサが返した txid {} がローカルの txid {} と一致しません", txid, signed.txid);
    }
    log::info!("トランザクションを送信しました: txid={}", txid);

    Ok(report(TxOutcome::Broadcast {
        txid,
        raw_tx,
        inputs: signed.spent.len(),
        fee: signed.fee,
        change: signed.change,
    }))
}
