use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use bitcoin::Network as BitcoinNetwork;
use crate::config::DEFAULT_CONFIG_FILE;
use crate::error::AppError;
use crate::orchestrator::{SendOptions, DEFAULT_AMOUNT_SATS, DEFAULT_DESTINATION, DEFAULT_MESSAGE};
use crate::transaction::DEFAULT_FEE_SATS;
use crate::types::ScriptType;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Bitcoin テストネット用の鍵生成・署名・送金 CLI", long_about = None)]
pub struct CliArgs {
    /// 使用するネットワーク ("bitcoin", "testnet", "signet", "regtest")
    #[clap(short, long, value_parser, default_value = "testnet", global = true)]
    pub network: String,

    /// インデクサ設定を記述した YAML ファイルへのパス
    #[clap(short, long, value_parser, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 新しい秘密鍵とアドレスを生成する
    Keygen {
        /// アドレスの種類 ("p2wpkh", "p2pkh")
        #[clap(short, long, value_parser, default_value = "p2wpkh")]
        address_type: String,
    },

    /// BTC_PRIVATE_KEY から P2PKH / P2WPKH のアドレスを表示する
    Address,

    /// BTC_PRIVATE_KEY でメッセージに署名する
    SignMessage {
        #[clap(short, long, value_parser, default_value = DEFAULT_MESSAGE)]
        message: String,
    },

    /// UTXO を取得し、送金トランザクションを構築・署名する (--broadcast で送信)
    Send(SendArgs),
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// 送金先アドレス
    #[clap(short, long, value_parser, default_value = DEFAULT_DESTINATION)]
    pub to: String,

    /// 送金額 (sats)
    #[clap(short, long, value_parser, default_value_t = DEFAULT_AMOUNT_SATS)]
    pub amount: u64,

    /// 固定手数料 (sats)
    #[clap(short, long, value_parser, default_value_t = DEFAULT_FEE_SATS)]
    pub fee: u64,

    /// 動作確認用に署名するメッセージ
    #[clap(short, long, value_parser, default_value = DEFAULT_MESSAGE)]
    pub message: String,

    /// 未確認の UTXO を使わない
    #[clap(long)]
    pub confirmed_only: bool,

    /// 署名済みトランザクションをインデクサに送信する (デフォルトでは送信しない)
    #[clap(long)]
    pub broadcast: bool,
}

impl From<SendArgs> for SendOptions {
    fn from(args: SendArgs) -> Self {
        SendOptions {
            to: args.to,
            amount: args.amount,
            fee: args.fee,
            message: args.message,
            broadcast: args.broadcast,
            confirmed_only: args.confirmed_only,
        }
    }
}

pub fn parse_network(network_str: &str) -> Result<BitcoinNetwork, AppError> {
    match network_str.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(BitcoinNetwork::Bitcoin),
        "testnet" => Ok(BitcoinNetwork::Testnet),
        "signet" => Ok(BitcoinNetwork::Signet),
        "regtest" => Ok(BitcoinNetwork::Regtest),
        s => Err(AppError::Config(format!("無効なネットワークが指定されました: {}", s))),
    }
}

pub fn parse_script_type(script_type_str: &str) -> Result<ScriptType, AppError> {
    match script_type_str.to_lowercase().as_str() {
        "p2wpkh" | "segwit" => Ok(ScriptType::P2WPKH),
        "p2pkh" | "legacy" => Ok(ScriptType::P2PKH),
        s => Err(AppError::Config(format!("無効なアドレスタイプが指定されました: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn send_defaults_do_not_broadcast() {
        let args = CliArgs::try_parse_from(["btc-wallet-cli", "send"]).unwrap();
        assert_eq!(args.network, "testnet");
        assert_eq!(args.config, PathBuf::from("config.yml"));
        let Command::Send(send) = args.command else {
            panic!("expected send subcommand");
        };
        let options = SendOptions::from(send);
        assert!(!options.broadcast);
        assert!(!options.confirmed_only);
        assert_eq!(options.to, DEFAULT_DESTINATION);
        assert_eq!(options.amount, 1000);
        assert_eq!(options.fee, 1000);
        assert_eq!(options.message, "Hello BTC");
    }

    #[test]
    fn send_flags_are_parsed() {
        let args = CliArgs::try_parse_from([
            "btc-wallet-cli", "send", "--to", "mg8Jz5776UdyiYcBb9Z873NTozEiADRW5H",
            "--amount", "2500", "--fee", "1200", "--broadcast", "--confirmed-only",
            "--network", "signet",
        ])
        .unwrap();
        assert_eq!(parse_network(&args.network).unwrap(), BitcoinNetwork::Signet);
        let Command::Send(send) = args.command else {
            panic!("expected send subcommand");
        };
        assert_eq!(send.amount, 2500);
        assert_eq!(send.fee, 1200);
        assert!(send.broadcast);
        assert!(send.confirmed_only);
    }

    #[test]
    fn network_and_script_type_names() {
        assert_eq!(parse_network("Mainnet").unwrap(), BitcoinNetwork::Bitcoin);
        assert_eq!(parse_network("regtest").unwrap(), BitcoinNetwork::Regtest);
        assert!(matches!(parse_network("litecoin"), Err(AppError::Config(_))));
        assert_eq!(parse_script_type("legacy").unwrap(), ScriptType::P2PKH);
        assert_eq!(parse_script_type("P2WPKH").unwrap(), ScriptType::P2WPKH);
        assert!(parse_script_type("p2tr").is_err());
    }
}
