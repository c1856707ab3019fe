use std::fmt;

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey, Signing, Verification};
use bitcoin::{CompressedPublicKey, Network as BitcoinNetwork};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::AppError;
use crate::types::{ScriptType, WalletAddress};

/// 範囲外の乱数が続いた場合に諦めるまでの試行回数
const MAX_KEYGEN_ATTEMPTS: usize = 16;

/// secp256k1 の秘密鍵と圧縮公開鍵の組。Drop 時に秘密鍵を消去する
pub struct WalletKey {
    secret: SecretKey,
    public: CompressedPublicKey,
}

impl WalletKey {
    /// OS の暗号学的乱数から [1, n-1] のスカラーを生成する
    pub fn generate<C: Signing>(secp: &Secp256k1<C>) -> Result<Self, AppError> {
        let mut buf = Zeroizing::new([0u8; 32]);
        for attempt in 1..=MAX_KEYGEN_ATTEMPTS {
            OsRng
                .try_fill_bytes(&mut buf[..])
                .map_err(|e| AppError::RngFailure(e.to_string()))?;
            match SecretKey::from_slice(&buf[..]) {
                Ok(secret) => return Ok(Self::from_secret(secp, secret)),
                Err(_) => log::warn!("範囲外のスカラーを引いたため再試行します (試行 {})", attempt),
            }
        }
        Err(AppError::RngFailure(format!(
            "{} 回試行しても有効な秘密鍵を生成できませんでした",
            MAX_KEYGEN_ATTEMPTS
        )))
    }

    /// 64文字の16進数文字列から秘密鍵を読み込む
    pub fn import<C: Signing>(secp: &Secp256k1<C>, hex_str: &str) -> Result<Self, AppError> {
        let bytes = Zeroizing::new(
            hex::decode(hex_str.trim())
                .map_err(|e| AppError::InvalidKey(format!("16進数のデコードに失敗: {}", e)))?,
        );
        if bytes.len() != 32 {
            return Err(AppError::InvalidKey(format!(
                "秘密鍵は32バイトである必要があります (実際: {} バイト)",
                bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|_| AppError::InvalidKey("スカラーが範囲外です (0 または n 以上)".into()))?;
        Ok(Self::from_secret(secp, secret))
    }

    fn from_secret<C: Signing>(secp: &Secp256k1<C>, secret: SecretKey) -> Self {
        let public = CompressedPublicKey(PublicKey::from_secret_key(secp, &secret));
        Self { secret, public }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &CompressedPublicKey {
        &self.public
    }

    /// 秘密鍵の16進数表現 (keygen の出力用)
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.secret.secret_bytes()))
    }

    pub fn address(&self, script_type: ScriptType) -> WalletAddress {
        match script_type {
            ScriptType::P2PKH => WalletAddress::P2PKH(self.public.pubkey_hash()),
            ScriptType::P2WPKH => WalletAddress::P2WPKH(self.public.wpubkey_hash()),
        }
    }

    /// アドレスがこの鍵の hash160 を指しているか
    pub fn owns(&self, address: &WalletAddress) -> bool {
        *address == self.address(address.script_type())
    }
}

impl Drop for WalletKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKey")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// 新しい鍵を生成し、指定タイプのアドレスと一緒に返す
pub fn generate(
    secp: &Secp256k1<All>,
    network: BitcoinNetwork,
    script_type: ScriptType,
) -> Result<(WalletKey, String), AppError> {
    let key = WalletKey::generate(secp)?;
    let address = key.address(script_type).encode(network)?;
    log::info!("新しい鍵を生成しました: {} ({})", address, script_type);
    Ok((key, address))
}

/// 16進数の秘密鍵を読み込み、指定タイプのアドレスと一緒に返す
pub fn import(
    secp: &Secp256k1<All>,
    hex_str: &str,
    network: BitcoinNetwork,
    script_type: ScriptType,
) -> Result<(WalletKey, String), AppError> {
    let key = WalletKey::import(secp, hex_str)?;
    let address = key.address(script_type).encode(network)?;
    Ok((key, address))
}

fn message_digest(message: &[u8]) -> Message {
    let hash = sha256d::Hash::hash(message);
    Message::from_digest(hash.to_byte_array())
}

/// SHA256(SHA256(message)) に RFC 6979 の決定的 ECDSA 署名を行い、
/// low-S の DER を16進数で返す
pub fn sign_message<C: Signing>(
    secp: &Secp256k1<C>,
    key: &WalletKey,
    message: &[u8],
) -> Result<String, AppError> {
    let mut signature = secp.sign_ecdsa(&message_digest(message), key.secret_key());
    // BIP-62 low-S
    signature.normalize_s();
    Ok(hex::encode(signature.serialize_der()))
}

pub fn verify_message<C: Verification>(
    secp: &Secp256k1<C>,
    public_key: &CompressedPublicKey,
    message: &[u8],
    der_hex: &str,
) -> Result<bool, AppError> {
    let der = hex::decode(der_hex).map_err(|e| AppError::signing(None, e))?;
    let signature = ecdsa::Signature::from_der(&der).map_err(|e| AppError::signing(None, e))?;
    Ok(secp
        .verify_ecdsa(&message_digest(message), &signature, &public_key.0)
        .is_ok())
}
