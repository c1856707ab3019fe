use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::{Address, Network as BitcoinNetwork, OutPoint, PubkeyHash, ScriptBuf, Txid, WPubkeyHash};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 支払い・受け取りで扱うスクリプトの種類
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    P2PKH,
    P2WPKH,
}

impl ScriptType {
    pub fn from_script_buf(script: &ScriptBuf) -> Result<Self, AppError> {
        if script.is_p2pkh() {
            Ok(ScriptType::P2PKH)
        } else if script.is_p2wpkh() {
            Ok(ScriptType::P2WPKH)
        } else {
            Err(AppError::UnsupportedScriptType { script_hex: script.to_hex_string() })
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptType::P2PKH => f.write_str("p2pkh"),
            ScriptType::P2WPKH => f.write_str("p2wpkh"),
        }
    }
}

/// hash160 を保持するアドレス。文字列形式はネットワークに依存する
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WalletAddress {
    P2PKH(PubkeyHash),
    P2WPKH(WPubkeyHash),
}

impl WalletAddress {
    pub fn script_type(&self) -> ScriptType {
        match self {
            WalletAddress::P2PKH(_) => ScriptType::P2PKH,
            WalletAddress::P2WPKH(_) => ScriptType::P2WPKH,
        }
    }

    /// 20バイトの hash160
    pub fn hash160(&self) -> [u8; 20] {
        match self {
            WalletAddress::P2PKH(h) => h.to_byte_array(),
            WalletAddress::P2WPKH(h) => h.to_byte_array(),
        }
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        match self {
            WalletAddress::P2PKH(h) => ScriptBuf::new_p2pkh(h),
            WalletAddress::P2WPKH(h) => ScriptBuf::new_p2wpkh(h),
        }
    }

    pub fn to_address(&self, network: BitcoinNetwork) -> Result<Address, AppError> {
        Ok(Address::from_script(&self.script_pubkey(), network)?)
    }

    /// ネットワークの正規文字列 (base58check / bech32) にエンコードする
    pub fn encode(&self, network: BitcoinNetwork) -> Result<String, AppError> {
        Ok(self.to_address(network)?.to_string())
    }

    /// 文字列をデコードする。ネットワーク不一致や P2PKH/P2WPKH 以外はエラー
    ///
    /// 正規形式 (`encode` の出力) のみ受け付ける。大文字の bech32 は拒否する。
    pub fn decode(address: &str, network: BitcoinNetwork) -> Result<Self, AppError> {
        let parsed = Address::from_str(address)
            .map_err(|e| AppError::invalid_address(address, e))?
            .require_network(network)
            .map_err(|e| AppError::invalid_address(address, e))?;
        if parsed.to_string() != address {
            return Err(AppError::invalid_address(
                address,
                format!("正規形式ではありません ({} を使用してください)", parsed),
            ));
        }
        let script = parsed.script_pubkey();
        Self::from_script(&script).map_err(|e| match e {
            AppError::UnsupportedScriptType { .. } => e,
            other => AppError::invalid_address(address, other),
        })
    }

    pub fn from_script(script: &ScriptBuf) -> Result<Self, AppError> {
        let bytes = script.as_bytes();
        // P2PKH: OP_DUP OP_HASH160 <20> ... / P2WPKH: OP_0 <20> ...
        let address = match ScriptType::from_script_buf(script)? {
            ScriptType::P2PKH => PubkeyHash::from_slice(&bytes[3..23]).map(WalletAddress::P2PKH),
            ScriptType::P2WPKH => WPubkeyHash::from_slice(&bytes[2..22]).map(WalletAddress::P2WPKH),
        };
        address.map_err(|e| AppError::Serialization(e.to_string()))
    }
}

/// インデクサが返す未使用出力のスナップショット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub confirmed: bool,
}

impl Utxo {
    pub fn out_point(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}
