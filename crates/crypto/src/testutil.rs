//! テスト用の鍵素材。
//!
//! 2048ビットのRSA鍵（テスト専用。本番で使用しないこと）。

/// PKCS#1形式の秘密鍵
pub const TEST_RSA_PKCS1_PEM: &str = include_str!("../testdata/rsa_pkcs1.pem");

/// 同じ鍵のPKCS#8形式
pub const TEST_RSA_PKCS8_PEM: &str = include_str!("../testdata/rsa_pkcs8.pem");

/// 対応する公開鍵（SPKI）
pub const TEST_RSA_PUBLIC_PEM: &str = include_str!("../testdata/rsa_public.pem");
