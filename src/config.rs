use std::path::Path;

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::AppError;

pub const ENV_NODE_API_URL: &str = "BTC_NODE_API_URL";
pub const ENV_PRIVATE_KEY: &str = "BTC_PRIVATE_KEY";
pub const ENV_ADDRESS: &str = "BTC_ADDRESS";

pub const DEFAULT_CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_DATA_API_URL: &str = "https://blockstream.info/testnet/api";

/// `config.yml` のルート。`wallet_node.eth` など未知のキーは無視する
#[derive(Deserialize, Debug, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub wallet_node: WalletNode,
}

#[derive(Deserialize, Debug, Default)]
pub struct WalletNode {
    #[serde(default)]
    pub btc: Option<NodeConfig>,
}

/// インデクサ接続設定。起動時に一度だけ決まり、以後は参照のみ
///
/// YAML で省略されたフィールドは空文字列 (0) になる。
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: String,
    #[serde(default)]
    pub rpc_pass: String,
    #[serde(default)]
    pub data_api_url: String,
    #[serde(default)]
    pub data_api_key: String,
    #[serde(default)]
    pub data_api_token: String,
    /// 秒。0 はタイムアウトなし
    #[serde(default)]
    pub time_out: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_DATA_API_URL.to_string(),
            rpc_user: String::new(),
            rpc_pass: String::new(),
            data_api_url: DEFAULT_DATA_API_URL.to_string(),
            data_api_key: String::new(),
            data_api_token: String::new(),
            time_out: 0,
        }
    }
}

/// 設定の出どころ (ログ出力用)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Env,
    Yaml,
    Defaults,
}

/// 優先順位: 環境変数 → YAML → デフォルト
///
/// 環境変数モードでは URL 以外はすべてデフォルト値になる (YAML とはマージしない)。
/// YAML は `data_api_url` が空でない場合のみ採用する。
pub fn resolve(
    env_url: Option<&str>,
    yaml: Option<(&str, &Path)>,
) -> Result<(NodeConfig, ConfigSource), AppError> {
    if let Some(url) = env_url.map(str::trim).filter(|u| !u.is_empty()) {
        return Ok((
            NodeConfig {
                rpc_url: url.to_string(),
                data_api_url: url.to_string(),
                ..NodeConfig::default()
            },
            ConfigSource::Env,
        ));
    }

    if let Some((content, path)) = yaml.filter(|(content, _)| !content.trim().is_empty()) {
        let file: ConfigFile = serde_yaml::from_str(content).map_err(|e| AppError::ConfigFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        if let Some(btc) = file
            .wallet_node
            .btc
            .filter(|btc| !btc.data_api_url.trim().is_empty())
        {
            return Ok((btc, ConfigSource::Yaml));
        }
        log::warn!("{:?} に data_api_url が無いためデフォルト設定を使用します", path);
    }

    Ok((NodeConfig::default(), ConfigSource::Defaults))
}

/// プロセス環境と YAML ファイルから設定を読み込む。ファイルが無ければ無視する
pub fn load(path: &Path) -> Result<NodeConfig, AppError> {
    let env_url = std::env::var(ENV_NODE_API_URL).ok();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            log::error!("設定ファイルの読み込みに失敗しました: {:?}", path);
            return Err(AppError::Io(e));
        }
    };

    let (config, source) = resolve(
        env_url.as_deref(),
        content.as_deref().map(|c| (c, path)),
    )?;
    log::info!(
        "インデクサ設定: source={:?}, data_api_url={}, time_out={}s",
        source, config.data_api_url, config.time_out
    );
    Ok(config)
}

/// 秘密鍵の値を検証する。空白のみは未設定として扱い、前後の空白は取り除く
pub fn private_key_from(value: Option<String>) -> Result<Zeroizing<String>, AppError> {
    let raw = value
        .map(Zeroizing::new)
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::Config(format!("{} が設定されていません", ENV_PRIVATE_KEY)))?;
    Ok(Zeroizing::new(raw.trim().to_string()))
}

pub fn private_key_from_env() -> Result<Zeroizing<String>, AppError> {
    private_key_from(std::env::var(ENV_PRIVATE_KEY).ok())
}

/// 運用者が用意する秘密鍵 (16進数) とアドレス
pub struct OperatorKeys {
    pub private_key_hex: Zeroizing<String>,
    pub address: String,
}

impl OperatorKeys {
    pub fn from_values(private_key: Option<String>, address: Option<String>) -> Result<Self, AppError> {
        let private_key_hex = private_key_from(private_key)?;
        let address = address
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AppError::Config(format!("{} が設定されていません", ENV_ADDRESS)))?;
        Ok(Self { private_key_hex, address })
    }

    pub fn from_env() -> Result<Self, AppError> {
        Self::from_values(
            std::env::var(ENV_PRIVATE_KEY).ok(),
            std::env::var(ENV_ADDRESS).ok(),
        )
    }
}
