use bitcoin::{
    absolute::LockTime,
    consensus::encode,
    hashes::Hash,
    network::Network as BitcoinNetwork,
    script::{Instruction, PushBytesBuf},
    secp256k1::{All, Message, Secp256k1, Verification},
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Amount, CompressedPublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::{
    coin_select,
    error::AppError,
    keys::WalletKey,
    types::{ScriptType, Utxo, WalletAddress},
};

// Bitcoin Coreのデフォルトダスト閾値 (P2PKH/P2WPKH出力に対して)
pub const DUST_THRESHOLD_SATS: u64 = 546;

/// 固定手数料のデフォルト値。これより低い手数料は受け付けない
pub const DEFAULT_FEE_SATS: u64 = 1000;

/// 全入力に設定する nSequence (RBF なし、nLockTime 有効)
pub const INPUT_SEQUENCE: Sequence = Sequence(0xFFFF_FFFE);

/// 送金の指定内容
#[derive(Debug, Clone)]
pub struct TxRequest<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub amount: u64,
    pub fee: u64,
    pub network: BitcoinNetwork,
    pub version: Version,
}

impl<'a> TxRequest<'a> {
    pub fn new(from: &'a str, to: &'a str, amount: u64, network: BitcoinNetwork) -> Self {
        Self {
            from,
            to,
            amount,
            fee: DEFAULT_FEE_SATS,
            network,
            version: Version::TWO,
        }
    }

    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = Version(version);
        self
    }
}

/// 署名済みトランザクションと、構築時に決まった数値
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub tx: Transaction,
    pub txid: Txid,
    pub spent: Vec<Utxo>,
    pub total_in: u64,
    /// 実際の手数料。おつりがダストとして切り捨てられた場合はその分を含む
    pub fee: u64,
    pub change: Option<u64>,
}

impl SignedTx {
    pub fn serialize(&self) -> Vec<u8> {
        encode::serialize(&self.tx)
    }

    pub fn raw_hex(&self) -> String {
        encode::serialize_hex(&self.tx)
    }
}

pub fn deserialize_tx(bytes: &[u8]) -> Result<Transaction, AppError> {
    encode::deserialize(bytes).map_err(|e| AppError::Serialization(e.to_string()))
}

pub fn deserialize_tx_hex(raw_hex: &str) -> Result<Transaction, AppError> {
    let bytes = hex::decode(raw_hex).map_err(|e| AppError::Serialization(e.to_string()))?;
    deserialize_tx(&bytes)
}

// 署名に必要な情報を一時的に保持するための構造体
struct SigningInfo {
    input_index: usize,
    sighash_message: Message,
    script_type: ScriptType,
}

pub fn build_signed_transaction(
    secp: &Secp256k1<All>,
    key: &WalletKey,
    request: &TxRequest<'_>,
    utxos: &[Utxo],
) -> Result<SignedTx, AppError> {
    log::info!(
        "トランザクション構築処理を開始します。from={}, to={}, amount={}, fee={}",
        request.from, request.to, request.amount, request.fee
    );

    // 1. 金額と手数料の検証
    if request.amount <= DUST_THRESHOLD_SATS {
        return Err(AppError::InvalidAmount(format!(
            "送金額 {} sats はダスト閾値 {} sats 以下です",
            request.amount, DUST_THRESHOLD_SATS
        )));
    }
    if request.fee < DEFAULT_FEE_SATS {
        return Err(AppError::InvalidAmount(format!(
            "手数料 {} sats は最低手数料 {} sats 未満です",
            request.fee, DEFAULT_FEE_SATS
        )));
    }

    // 2. アドレスのデコードとスクリプト導出
    let to_address = WalletAddress::decode(request.to, request.network)?;
    let from_address = WalletAddress::decode(request.from, request.network)?;
    if !key.owns(&from_address) {
        return Err(AppError::AddressMismatch { address: request.from.to_string() });
    }
    let from_script = from_address.script_pubkey();

    // 3. 入力の選択
    let selected = coin_select::select(utxos, request.amount, request.fee)?;
    log::debug!(
        "{} 個の UTXO を選択しました (合計 {} sats)",
        selected.chosen.len(),
        selected.total_in
    );

    let prevouts: Vec<TxOut> = selected
        .chosen
        .iter()
        .map(|utxo| TxOut {
            value: Amount::from_sat(utxo.value),
            script_pubkey: from_script.clone(),
        })
        .collect();

    // 4. 支払い出力とおつり
    let mut outputs = vec![TxOut {
        value: Amount::from_sat(request.amount),
        script_pubkey: to_address.script_pubkey(),
    }];

    let change_value_sats = selected.total_in - request.amount - request.fee;
    let change = if change_value_sats > DUST_THRESHOLD_SATS {
        log::debug!("おつり発生: {} sats, おつりアドレス: {}", change_value_sats, request.from);
        outputs.push(TxOut {
            value: Amount::from_sat(change_value_sats),
            script_pubkey: from_script.clone(),
        });
        Some(change_value_sats)
    } else {
        if change_value_sats > 0 {
            log::warn!(
                "おつり {} sats はダスト閾値 {} sats 以下のため手数料に含めます。",
                change_value_sats, DUST_THRESHOLD_SATS
            );
        }
        None
    };

    // 署名対象のトランザクションを初期化 (script_sig と witness は空)
    let mut transaction = Transaction {
        version: request.version,
        lock_time: LockTime::ZERO,
        input: selected
            .chosen
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.out_point(),
                script_sig: ScriptBuf::new(),
                sequence: INPUT_SEQUENCE,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    };

    sign_inputs(secp, key, &mut transaction, &prevouts)?;

    for (input_index, prevout) in prevouts.iter().enumerate() {
        verify_input(secp, &transaction, input_index, prevout)?;
    }

    let total_out: u64 = transaction.output.iter().map(|o| o.value.to_sat()).sum();
    let signed = SignedTx {
        txid: transaction.compute_txid(),
        tx: transaction,
        spent: selected.chosen,
        total_in: selected.total_in,
        fee: selected.total_in - total_out,
        change,
    };
    log::info!("署名済みトランザクションを生成しました: txid={}, fee={} sats", signed.txid, signed.fee);
    Ok(signed)
}

/// 入力ごとの sighash。P2PKH はレガシー、P2WPKH は BIP-143 (いずれも SIGHASH_ALL)
fn sighash_digest(
    cache: &mut SighashCache<&Transaction>,
    input_index: usize,
    prevout: &TxOut,
) -> Result<([u8; 32], ScriptType), AppError> {
    let sighash_type = EcdsaSighashType::All;
    let script_type = ScriptType::from_script_buf(&prevout.script_pubkey)?;
    let digest = match script_type {
        ScriptType::P2PKH => cache
            .legacy_signature_hash(input_index, &prevout.script_pubkey, sighash_type.to_u32())
            .map_err(|e| AppError::signing(Some(input_index), e))?
            .to_byte_array(),
        ScriptType::P2WPKH => cache
            .p2wpkh_signature_hash(input_index, &prevout.script_pubkey, prevout.value, sighash_type)
            .map_err(|e| AppError::signing(Some(input_index), e))?
            .to_byte_array(),
    };
    Ok((digest, script_type))
}

/// 1入力分の sighash (32バイト) を計算する
pub fn input_sighash(tx: &Transaction, input_index: usize, prevout: &TxOut) -> Result<[u8; 32], AppError> {
    let mut cache = SighashCache::new(tx);
    let (digest, _) = sighash_digest(&mut cache, input_index, prevout)?;
    Ok(digest)
}

fn sign_inputs(
    secp: &Secp256k1<All>,
    key: &WalletKey,
    transaction: &mut Transaction,
    prevouts: &[TxOut],
) -> Result<(), AppError> {
    log::info!("トランザクション署名処理を開始します。");
    let mut signing_infos: Vec<SigningInfo> = Vec::with_capacity(prevouts.len());

    // 1. 署名ハッシュ計算フェーズ
    {
        let mut sighash_cache = SighashCache::new(&*transaction);
        for (input_index, prevout) in prevouts.iter().enumerate() {
            let (digest, script_type) = sighash_digest(&mut sighash_cache, input_index, prevout)?;
            signing_infos.push(SigningInfo {
                input_index,
                sighash_message: Message::from_digest(digest),
                script_type,
            });
        }
    }

    // 2. 署名生成と適用フェーズ
    let public_key = key.public_key();
    for info in signing_infos {
        let signature = bitcoin::ecdsa::Signature {
            signature: secp.sign_ecdsa(&info.sighash_message, key.secret_key()),
            sighash_type: EcdsaSighashType::All,
        };

        let input = &mut transaction.input[info.input_index];
        match info.script_type {
            ScriptType::P2PKH => {
                let sig_push = PushBytesBuf::try_from(signature.to_vec()).map_err(|_| {
                    AppError::Serialization(format!("P2PKH署名のPushBytes変換失敗 (input {})", info.input_index))
                })?;
                input.script_sig = bitcoin::script::Builder::new()
                    .push_slice(sig_push)
                    .push_key(&bitcoin::PublicKey::new(public_key.0))
                    .into_script();
            }
            ScriptType::P2WPKH => {
                let mut witness = Witness::new();
                witness.push(signature.to_vec());
                witness.push(public_key.to_bytes());
                input.witness = witness;
            }
        }
        log::debug!("入力 {} ({}) の署名適用完了。", info.input_index, info.script_type);
    }
    Ok(())
}

/// 入力の署名を、消費する出力のスクリプトに対して検証する
pub fn verify_input<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    prevout: &TxOut,
) -> Result<(), AppError> {
    let fail = |reason: &str| AppError::signing(Some(input_index), reason);
    let input = tx
        .input
        .get(input_index)
        .ok_or_else(|| fail("入力インデックスが範囲外です"))?;

    let script_type = ScriptType::from_script_buf(&prevout.script_pubkey)?;
    let (sig_bytes, pubkey_bytes): (Vec<u8>, Vec<u8>) = match script_type {
        ScriptType::P2PKH => {
            let pushes = input
                .script_sig
                .instructions()
                .map(|ins| match ins {
                    Ok(Instruction::PushBytes(data)) => Ok(data.as_bytes().to_vec()),
                    _ => Err(fail("scriptSig にプッシュ以外の命令があります")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            match <[Vec<u8>; 2]>::try_from(pushes) {
                Ok([sig, pk]) => (sig, pk),
                Err(_) => return Err(fail("scriptSig は <sig> <pubkey> の2要素である必要があります")),
            }
        }
        ScriptType::P2WPKH => {
            if !input.script_sig.is_empty() || input.witness.len() != 2 {
                return Err(fail("P2WPKH 入力は空の scriptSig と2要素の witness が必要です"));
            }
            match (input.witness.nth(0), input.witness.nth(1)) {
                (Some(sig), Some(pk)) => (sig.to_vec(), pk.to_vec()),
                _ => return Err(fail("witness の読み出しに失敗しました")),
            }
        }
    };

    let public_key = CompressedPublicKey::from_slice(&pubkey_bytes).map_err(|e| AppError::signing(Some(input_index), e))?;
    let expected_script = match script_type {
        ScriptType::P2PKH => ScriptBuf::new_p2pkh(&public_key.pubkey_hash()),
        ScriptType::P2WPKH => ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()),
    };
    if expected_script != prevout.script_pubkey {
        return Err(fail("公開鍵が消費する出力のスクリプトと一致しません"));
    }

    let signature = bitcoin::ecdsa::Signature::from_slice(&sig_bytes).map_err(|e| AppError::signing(Some(input_index), e))?;
    if signature.sighash_type != EcdsaSighashType::All {
        return Err(fail("SIGHASH_ALL 以外の署名です"));
    }

    let digest = input_sighash(tx, input_index, prevout)?;
    secp.verify_ecdsa(&Message::from_digest(digest), &signature.signature, &public_key.0)
        .map_err(|e| AppError::signing(Some(input_index), e))
}
