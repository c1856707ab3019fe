use crate::error::AppError;
use crate::types::Utxo;

/// 選択された入力とその合計額
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedCoins {
    pub chosen: Vec<Utxo>,
    pub total_in: u64,
}

/// 与えられた順に UTXO を積み上げ、合計が `target + fee` 以上になった時点の
/// 先頭部分列を返す (greedy first-fit)。未確認の UTXO も対象になる
pub fn select(utxos: &[Utxo], target: u64, fee: u64) -> Result<SelectedCoins, AppError> {
    let required = target
        .checked_add(fee)
        .ok_or_else(|| AppError::InvalidAmount(format!("金額と手数料の合計がオーバーフローしました: {} + {}", target, fee)))?;

    let mut total_in: u64 = 0;
    for (i, utxo) in utxos.iter().enumerate() {
        total_in = total_in.saturating_add(utxo.value);
        log::debug!(
            "UTXO選択: txid={}, vout={}, value={}, 累計={}",
            utxo.txid, utxo.vout, utxo.value, total_in
        );
        if total_in >= required {
            return Ok(SelectedCoins {
                chosen: utxos[..=i].to_vec(),
                total_in,
            });
        }
    }

    Err(AppError::InsufficientFunds {
        available: total_in,
        required,
        fee,
    })
}
