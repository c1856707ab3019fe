//! Bitcoin テストネット向けの簡易ウォレット
//!
//! 鍵とアドレスの導出、メッセージ署名、Esplora 互換インデクサからの UTXO 取得、
//! 単純なコイン選択、P2PKH / P2WPKH トランザクションの構築と署名を行う。

pub mod cli;
pub mod coin_select;
pub mod config;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod orchestrator;
pub mod transaction;
pub mod types;
