//! # Gateway エラー型
//!
//! リクエスト単位のエラー。常にJSONボディ `{"error": ..., "details"?: ...}` で応答し、
//! プロセスを落とさない。上流の非2xxはステータスをそのまま返す。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use repobridge_core::ApiError;
use repobridge_types::UpstreamBody;
use serde_json::json;

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 必須フィールドの欠落など
    #[error("{0}")]
    BadRequest(String),
    /// APIキーの不一致
    #[error("unauthorized")]
    Unauthorized,
    /// 削除対象が存在しない
    #[error("{0}")]
    NotFound(String),
    /// 上流が非2xxを返した
    #[error("upstream request failed with HTTP {status}")]
    Upstream { status: u16, body: UpstreamBody },
    /// installation tokenの取得に失敗
    #[error("failed to obtain installation token (upstream HTTP {status})")]
    TokenExchange { status: u16, body: UpstreamBody },
    /// 上流の応答がタイムアウト
    #[error("upstream request timed out")]
    Timeout(String),
    /// 内部エラー
    #[error("internal error")]
    Internal(String),
}

impl From<ApiError> for GatewayError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Upstream { status, body } => GatewayError::Upstream { status, body },
            ApiError::TokenExchange { status, body } => {
                GatewayError::TokenExchange { status, body }
            }
            ApiError::Timeout(detail) => GatewayError::Timeout(detail),
            ApiError::NotAFile(path) => {
                GatewayError::BadRequest(format!("path is a directory: {path}"))
            }
            other @ (ApiError::Transport(_) | ApiError::Decode(_) | ApiError::Signing(_)) => {
                GatewayError::Internal(other.to_string())
            }
        }
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::TokenExchange { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let body = match self {
            GatewayError::Upstream { body, .. } => {
                json!({ "error": message, "details": body.into_json() })
            }
            GatewayError::TokenExchange { status: upstream, body } => {
                tracing::error!(upstream_status = upstream, "installation tokenの取得に失敗");
                json!({ "error": message, "details": body.into_json() })
            }
            GatewayError::Timeout(detail) => {
                tracing::warn!(detail = %detail, "上流APIがタイムアウトしました");
                json!({ "error": message })
            }
            GatewayError::Internal(detail) => {
                tracing::error!(detail = %detail, "内部エラー");
                json!({ "error": message })
            }
            _ => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
