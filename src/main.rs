use std::process::ExitCode;

use bitcoin::secp256k1::{All as AllContext, Secp256k1};
use bitcoin::Network as BitcoinNetwork;
use clap::Parser;

use btc_wallet_cli::cli::{parse_network, parse_script_type, CliArgs, Command};
use btc_wallet_cli::config::{self, OperatorKeys};
use btc_wallet_cli::error::AppError;
use btc_wallet_cli::indexer::EsploraClient;
use btc_wallet_cli::keys::{self, WalletKey};
use btc_wallet_cli::orchestrator::{self, SendOptions};
use btc_wallet_cli::types::ScriptType;

fn main() -> ExitCode {
    env_logger::init();

    match dotenvy::dotenv() {
        Ok(path) => log::debug!(".env を読み込みました: {:?}", path),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!(".env の読み込みに失敗しました: {}", e),
    }

    let args = CliArgs::parse();
    log::info!("アプリケーションを開始します。コマンド: {:?}", args.command);

    match run(args) {
        Ok(()) => {
            log::info!("処理が正常に完了しました。");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("処理に失敗しました: {}", e);
            eprintln!("error: {}", e.diagnostic());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(args: CliArgs) -> Result<(), AppError> {
    let network = parse_network(&args.network)?;
    log::info!("指定されたネットワーク: {:?}", network);
    let secp: Secp256k1<AllContext> = Secp256k1::new();

    match args.command {
        Command::Keygen { address_type } => {
            let script_type = parse_script_type(&address_type)?;
            let (key, address) = keys::generate(&secp, network, script_type)?;
            println!("{}={}", config::ENV_PRIVATE_KEY, key.secret_hex().as_str());
            println!("{}={}", config::ENV_ADDRESS, address);
        }
        Command::Address => {
            let key = operator_key(&secp)?;
            print_addresses(&key, network)?;
        }
        Command::SignMessage { message } => {
            let key = operator_key(&secp)?;
            let signature = keys::sign_message(&secp, &key, message.as_bytes())?;
            let verified = keys::verify_message(&secp, key.public_key(), message.as_bytes(), &signature)?;
            log::debug!("署名の自己検証: {}", verified);
            println!("{}", signature);
        }
        Command::Send(send_args) => {
            let operator = OperatorKeys::from_env()?;
            let node = config::load(&args.config)?;
            let client = EsploraClient::new(&node)?;
            let options = SendOptions::from(send_args);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(orchestrator::run_send(
                &secp, network, &operator, &client, &options,
            ))?;

            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn operator_key(secp: &Secp256k1<AllContext>) -> Result<WalletKey, AppError> {
    let hex_key = config::private_key_from_env()?;
    WalletKey::import(secp, &hex_key)
}

fn print_addresses(key: &WalletKey, network: BitcoinNetwork) -> Result<(), AppError> {
    for script_type in [ScriptType::P2WPKH, ScriptType::P2PKH] {
        println!("{}: {}", script_type, key.address(script_type).encode(network)?);
    }
    Ok(())
}
