//! # Repobridge 暗号処理
//!
//! 上流プラットフォームのApp認証とスナップショットの変更検知に使う暗号処理。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | App署名付きアサーション | RS256 (RSA PKCS#1 v1.5 + SHA-256) |
//! | フィンガープリント | SHA-256 (hex) |

pub mod assertion;
pub mod pem;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

use sha2::{Digest, Sha256};

pub use assertion::{sign, AssertionClaims, AssertionSigner, SignedAssertion};
pub use pem::normalize_private_key;

/// 暗号処理のエラー型
#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    /// ヘッダー除去後に鍵本体が空だった
    #[error("秘密鍵の正規化に失敗: 鍵本体が空です")]
    EmptyKeyMaterial,
    /// 非対称秘密鍵として使用できない
    #[error("秘密鍵が不正です: {0}")]
    InvalidKey(String),
}

/// SHA-256ハッシュ計算。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// 内容のフィンガープリント（SHA-256、小文字hex）を計算する。
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_known_vector() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex() {
        let fp = fingerprint(b"server source");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
