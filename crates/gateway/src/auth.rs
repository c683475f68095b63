//! # アクセスキー認証
//!
//! `X-Api-Key` ヘッダー、なければクエリパラメータ `apiKey` の値を
//! 設定された共有シークレットと比較する。不一致は `401 {"error":"unauthorized"}`。
//! キーの値はログに出さない。

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::GatewayError;
use crate::state::GatewayState;

/// アクセスキーのヘッダー名
pub const API_KEY_HEADER: &str = "x-api-key";
/// アクセスキーのクエリパラメータ名
pub const API_KEY_QUERY: &str = "apiKey";

/// 設定された共有シークレット。ダイジェストのみ保持する。
#[derive(Clone)]
pub struct AccessKey {
    digest: [u8; 32],
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey").finish_non_exhaustive()
    }
}

impl AccessKey {
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// 提示されたキーが一致するか。
    pub fn verify(&self, presented: Option<&str>) -> bool {
        let Some(presented) = presented else {
            return false;
        };
        let digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        digest[..].ct_eq(&self.digest[..]).into()
    }
}

/// リクエストから提示されたキーを取り出す。ヘッダーを優先する。
pub fn presented_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(value) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(mut params)| params.remove(API_KEY_QUERY))
}

/// 保護されたルートに適用するミドルウェア。
pub async fn require_api_key(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let presented = presented_key(request.headers(), request.uri());
    if !state.access_key.verify(presented.as_deref()) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            key_present = presented.is_some(),
            "アクセスキーが一致しません"
        );
        return Err(GatewayError::Unauthorized);
    }
    Ok(next.run(request).await)
}
