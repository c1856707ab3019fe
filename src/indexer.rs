//! Esplora 互換のブロックエクスプローラ REST API クライアント
//!
//! `GET {base}/address/{addr}/utxo` で未使用出力を取得し、
//! `POST {base}/tx` で署名済みトランザクションを送信する。

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use bitcoin::{Amount, Txid};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use crate::config::NodeConfig;
use crate::error::{AppError, IndexerError};
use crate::types::Utxo;

/// 失敗時の再試行方針。`base_delay * factor^n` で待機時間を延ばす
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    // 250ms, 1s
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            factor: 4,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// `retry` 回目 (0始まり) の再試行前に待つ時間
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(retry)
    }
}

/// オーケストレータとインデクサの境界
pub trait Indexer {
    fn list_unspent(&self, address: &str) -> impl Future<Output = Result<Vec<Utxo>, AppError>>;

    /// 16進数の raw transaction を送信し、txid を返す
    fn submit(&self, raw_tx_hex: &str) -> impl Future<Output = Result<String, AppError>>;
}

#[derive(Debug, Default, Deserialize)]
struct UtxoStatus {
    #[serde(default)]
    confirmed: bool,
}

/// `/address/{addr}/utxo` の1要素。未知のフィールドは無視する
#[derive(Debug, Deserialize)]
struct UtxoEntry {
    txid: String,
    vout: u32,
    value: u64,
    #[serde(default)]
    status: UtxoStatus,
}

/// JSON 配列を Utxo に変換する。txid の形式不正や MAX_MONEY を超える金額も Decode として扱う
pub fn parse_utxos(body: &str) -> Result<Vec<Utxo>, IndexerError> {
    let entries: Vec<UtxoEntry> = serde_json::from_str(body).map_err(IndexerError::Decode)?;
    entries
        .into_iter()
        .map(|entry| {
            if entry.value > Amount::MAX_MONEY.to_sat() {
                return Err(IndexerError::Decode(serde::de::Error::custom(format!(
                    "金額が上限を超えています ({}:{}): {} sats",
                    entry.txid, entry.vout, entry.value
                ))));
            }
            let txid = Txid::from_str(&entry.txid).map_err(|e| {
                IndexerError::Decode(serde::de::Error::custom(format!(
                    "無効なTXID形式 ({}): {}",
                    entry.txid, e
                )))
            })?;
            Ok(Utxo {
                txid,
                vout: entry.vout,
                value: entry.value,
                confirmed: entry.status.confirmed,
            })
        })
        .collect()
}

/// HTTP クライアント。タイムアウトとヘッダは設定から決まる
#[derive(Debug, Clone)]
pub struct EsploraClient {
    base_url: String,
    headers: HeaderMap,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(config: &NodeConfig) -> Result<Self, AppError> {
        let mut builder = reqwest::Client::builder();
        if config.time_out > 0 {
            builder = builder.timeout(Duration::from_secs(config.time_out));
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Config(format!("HTTPクライアントの初期化に失敗: {}", e)))?;

        Ok(Self {
            base_url: config.data_api_url.trim_end_matches('/').to_string(),
            headers: build_headers(config)?,
            retry: RetryPolicy::default(),
            client,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 一時的な失敗 (ネットワーク・5xx) のみ再試行する
    async fn with_retries<T, F, Fut>(&self, op: &str, mut attempt: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut retry = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay(retry);
                    log::warn!("{} が失敗しました ({})。{:?} 後に再試行します", op, e, delay);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, IndexerError> {
        let resp = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(IndexerError::Network)?;
        read_body(resp).await
    }

    async fn post_text(&self, url: &str, body: &str) -> Result<String, IndexerError> {
        let resp = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "text/plain")
            .body(body.to_string())
            .send()
            .await
            .map_err(IndexerError::Network)?;
        read_body(resp).await
    }
}

impl Indexer for EsploraClient {
    async fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>, AppError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let context = format!("list_unspent(addr={})", address);
        log::debug!("GET {}", url);

        let url = url.as_str();
        self.with_retries(&context, move || async move {
            let body = self.get_text(url).await?;
            parse_utxos(&body)
        })
        .await
        .map_err(|source| AppError::Indexer { context, source })
    }

    async fn submit(&self, raw_tx_hex: &str) -> Result<String, AppError> {
        let url = format!("{}/tx", self.base_url);
        let context = "submit(tx)".to_string();
        log::debug!("POST {} ({} bytes)", url, raw_tx_hex.len() / 2);

        let url = url.as_str();
        let body = self
            .with_retries(&context, move || self.post_text(url, raw_tx_hex))
            .await
            .map_err(|source| AppError::Indexer { context, source })?;
        Ok(body.trim().to_string())
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String, IndexerError> {
    let status = resp.status();
    let body = resp.text().await.map_err(IndexerError::Network)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(IndexerError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

fn build_headers(config: &NodeConfig) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();

    if !config.data_api_key.is_empty() {
        let value = HeaderValue::from_str(&config.data_api_key)
            .map_err(|e| AppError::Config(format!("data_api_key をヘッダに設定できません: {}", e)))?;
        headers.insert(HeaderName::from_static("x-api-key"), value);
    }

    if !config.data_api_token.is_empty() {
        let value = HeaderValue::from_str(&format!("Bearer {}", config.data_api_token))
            .map_err(|e| AppError::Config(format!("data_api_token をヘッダに設定できません: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}
