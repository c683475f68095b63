//! # App署名付きアサーション
//!
//! Installation tokenの取得に使う短命のJWT（RS256）を生成する。
//! I/Oは行わず、バイト列の計算のみ。
//!
//! ## クレーム
//! - `iat`: now - 60秒（時計ずれの許容）
//! - `exp`: now + 9分（上流の上限10分より短くする）
//! - `iss`: App ID

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::pem::normalize_private_key;
use crate::CryptoError;

/// `iat` を現在時刻から遡らせる秒数
pub const ISSUED_AT_BACKDATE_SECS: i64 = 60;
/// アサーションの有効期間（秒）
pub const ASSERTION_LIFETIME_SECS: i64 = 9 * 60;

/// アサーションのクレームセット。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// 発行時刻（UNIX秒）
    pub iat: i64,
    /// 有効期限（UNIX秒）
    pub exp: i64,
    /// 発行者（App ID）
    pub iss: String,
}

impl AssertionClaims {
    /// `now` を基準にクレームセットを組み立てる。
    pub fn new(issuer: &str, now: DateTime<Utc>) -> Self {
        Self {
            iat: (now - Duration::seconds(ISSUED_AT_BACKDATE_SECS)).timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
            iss: issuer.to_string(),
        }
    }
}

/// 署名済みアサーション。
#[derive(Clone)]
pub struct SignedAssertion {
    /// コンパクト形式のJWT
    pub token: String,
    /// 署名したクレーム
    pub claims: AssertionClaims,
}

impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

/// RS256署名器。構築時に試し署名を行い、使用可能な鍵であることを保証する。
#[derive(Clone)]
pub struct AssertionSigner {
    key: EncodingKey,
}

impl std::fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionSigner").finish_non_exhaustive()
    }
}

impl AssertionSigner {
    /// 正規形のPEMから署名器を構築する。
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let signer = Self { key };
        // PEMとして読めてもRSA鍵として不正な場合は署名時に初めて失敗する
        signer.sign("key-validation", Utc::now())?;
        Ok(signer)
    }

    /// 生の鍵文字列を正規化してから署名器を構築する。
    pub fn from_raw(raw: &str) -> Result<Self, CryptoError> {
        let pem = normalize_private_key(raw)?;
        Self::from_pem(&pem)
    }

    /// `issuer` を発行者とするアサーションに署名する。
    pub fn sign(&self, issuer: &str, now: DateTime<Utc>) -> Result<SignedAssertion, CryptoError> {
        let claims = AssertionClaims::new(issuer, now);
        let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(SignedAssertion { token, claims })
    }
}

/// 正規形のPEMで直接署名する。
pub fn sign(pem: &str, issuer: &str, now: DateTime<Utc>) -> Result<SignedAssertion, CryptoError> {
    AssertionSigner::from_pem(pem)?.sign(issuer, now)
}
