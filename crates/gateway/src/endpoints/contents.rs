//! # /contents エンドポイント
//!
//! - `GET /contents/` — ルート一覧
//! - `GET /contents/{path}` — ファイルまたはディレクトリ
//! - `PUT /contents/{path}` — 作成・更新
//! - `POST /contents/{path}/delete` — 削除
//! - `DELETE /contents/{path}` — POST側の削除処理に転送
//!
//! ボディはハンドラ内でパースし、失敗もJSONのエラーで返す。

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use repobridge_types::{DeleteContentRequest, PutContentRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::GatewayError;
use crate::state::GatewayState;

const DELETE_SUFFIX: &str = "/delete";

/// 空のボディは既定値として扱う。
fn parse_body<T>(body: &Bytes) -> Result<T, GatewayError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid JSON body: {e}")))
}

pub async fn handle_list_root(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, GatewayError> {
    let body = state.gateway.get("").await?;
    Ok(Json(body.into_json()))
}

pub async fn handle_get(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let body = state.gateway.get(&path).await?;
    Ok(Json(body.into_json()))
}

pub async fn handle_put(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let request: PutContentRequest = parse_body(&body)?;
    let result = state.gateway.put(&path, request).await?;
    Ok(Json(result.into_json()))
}

/// `POST /contents/{path}/delete`。末尾が `/delete` でないPOSTは404。
pub async fn handle_post(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let Some(target) = path.strip_suffix(DELETE_SUFFIX) else {
        return Err(GatewayError::NotFound("not found".to_string()));
    };
    delete_content(&state, target, &body).await
}

/// `DELETE /contents/{path}`。POST側と同じ削除処理に転送する。
pub async fn handle_delete(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    delete_content(&state, &path, &body).await
}

async fn delete_content(
    state: &GatewayState,
    path: &str,
    body: &Bytes,
) -> Result<Json<Value>, GatewayError> {
    let request: DeleteContentRequest = parse_body(body)?;
    let result = state.gateway.delete(path, request).await?;
    Ok(Json(result.into_json()))
}
