use std::path::PathBuf;
use bitcoin::address::FromScriptError;
use thiserror::Error;

/// インデクサ (Esplora 互換 REST API) との通信で発生するエラー
#[derive(Debug, Error)]
pub enum IndexerError {
    /// 接続・読み込み・タイムアウトの失敗
    #[error("Network: {0}")]
    Network(#[source] reqwest::Error),

    /// 2xx 以外のレスポンス。body は診断用テキスト
    #[error("HttpStatus({status}): {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Decode: {0}")]
    Decode(#[source] serde_json::Error),
}

impl IndexerError {
    /// リトライ対象かどうか (ネットワークエラーと 5xx のみ)
    pub fn is_transient(&self) -> bool {
        match self {
            IndexerError::Network(_) => true,
            IndexerError::HttpStatus { status, .. } => *status >= 500,
            IndexerError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("設定ファイルのパースエラー ファイル: {path:?}, 詳細: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("無効な秘密鍵: {0}")]
    InvalidKey(String),

    #[error("乱数生成に失敗しました: {0}")]
    RngFailure(String),

    #[error("アドレスのエンコードに失敗しました: {0}")]
    AddressEncode(#[from] FromScriptError),

    #[error("無効なアドレス ({address}): {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("アドレスと秘密鍵が一致しません: {address}")]
    AddressMismatch { address: String },

    #[error("{context}: {source}")]
    Indexer {
        context: String,
        #[source]
        source: IndexerError,
    },

    #[error("資金不足: 利用可能な総額 {available} sats, 要求額 {required} sats (手数料 {fee} sats を含む)")]
    InsufficientFunds {
        available: u64,
        required: u64,
        fee: u64,
    },

    #[error("無効な金額: {0}")]
    InvalidAmount(String),

    #[error("未対応のスクリプトタイプ: {script_hex}")]
    UnsupportedScriptType { script_hex: String },

    #[error("署名エラー (入力インデックス {input_index:?}): {reason}")]
    SigningFailed {
        input_index: Option<usize>,
        reason: String,
    },

    #[error("シリアライズエラー: {0}")]
    Serialization(String),
}

impl AppError {
    pub fn invalid_address(address: &str, reason: impl ToString) -> Self {
        AppError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn signing(input_index: Option<usize>, reason: impl ToString) -> Self {
        AppError::SigningFailed {
            input_index,
            reason: reason.to_string(),
        }
    }

    /// プロセス終了コード: 0 成功, 1 設定・入力, 2 インデクサ, 3 資金不足, 4 その他
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_)
            | AppError::ConfigFile { .. }
            | AppError::Io(_)
            | AppError::InvalidKey(_)
            | AppError::InvalidAddress { .. }
            | AppError::AddressMismatch { .. }
            | AppError::InvalidAmount(_) => 1,
            AppError::Indexer { .. } => 2,
            AppError::InsufficientFunds { .. } => 3,
            AppError::RngFailure(_)
            | AppError::AddressEncode(_)
            | AppError::UnsupportedScriptType { .. }
            | AppError::SigningFailed { .. }
            | AppError::Serialization(_) => 4,
        }
    }

    /// 元のエラーを含めた一行の診断メッセージ
    pub fn diagnostic(&self) -> String {
        let mut line = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            if !line.ends_with(&text) {
                line.push_str(": ");
                line.push_str(&text);
            }
            source = err.source();
        }
        line.replace('\n', " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(AppError::Config("x".into()).exit_code(), 1);
        assert_eq!(AppError::InvalidKey("x".into()).exit_code(), 1);
        assert_eq!(AppError::InvalidAmount("546 sats".into()).exit_code(), 1);
        let indexer = AppError::Indexer {
            context: "list_unspent(addr=tb1q)".into(),
            source: IndexerError::HttpStatus { status: 503, body: "busy".into() },
        };
        assert_eq!(indexer.exit_code(), 2);
        let funds = AppError::InsufficientFunds { available: 1, required: 2, fee: 1 };
        assert_eq!(funds.exit_code(), 3);
        assert_eq!(AppError::signing(Some(0), "boom").exit_code(), 4);
    }

    #[test]
    fn indexer_context_keeps_original_kind() {
        let err = AppError::Indexer {
            context: "list_unspent(addr=tb1qxyz)".into(),
            source: IndexerError::HttpStatus { status: 503, body: "unavailable".into() },
        };
        assert_eq!(
            err.diagnostic(),
            "list_unspent(addr=tb1qxyz): HttpStatus(503): unavailable"
        );
        match err {
            AppError::Indexer { source: IndexerError::HttpStatus { status, .. }, .. } => {
                assert_eq!(status, 503)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn only_network_and_5xx_are_transient() {
        assert!(IndexerError::HttpStatus { status: 502, body: String::new() }.is_transient());
        assert!(!IndexerError::HttpStatus { status: 404, body: String::new() }.is_transient());
        let decode = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(!IndexerError::Decode(decode).is_transient());
    }
}
