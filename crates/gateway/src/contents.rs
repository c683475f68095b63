//! # Content Gateway
//!
//! 公開HTTP面のCRUDを上流のContents API呼び出しに変換する。
//!
//! - 書き込み内容はBase64に変換する（`is_base64_encoded` 指定時はそのまま）
//! - `sha` 省略時はメタデータを読んで解決する。404は「作成」、それ以外の失敗は伝播する
//! - 削除で `sha` が解決できなければ404を返し、上流の削除は呼ばない
//! - 楽観的並行制御の衝突は再試行しない

use base64::Engine;
use repobridge_core::{ContentsClient, RepoRef};
use repobridge_types::{
    ContentDelete, ContentWrite, DeleteContentRequest, PutContentRequest, UpstreamBody,
};

use crate::error::GatewayError;

/// 削除対象が見つからない場合のメッセージ
pub const DELETE_NOT_FOUND: &str = "File not found for deletion";

pub struct ContentGateway {
    contents: ContentsClient,
}

impl ContentGateway {
    pub fn new(contents: ContentsClient) -> Self {
        Self { contents }
    }

    pub fn repo(&self) -> &RepoRef {
        self.contents.repo()
    }

    /// 設定ブランチを参照してファイルまたはディレクトリを取得する。
    pub async fn get(&self, path: &str) -> Result<UpstreamBody, GatewayError> {
        let branch = &self.repo().branch;
        Ok(self.contents.get(path, Some(branch.as_str())).await?)
    }

    /// ファイルを作成・更新する。
    pub async fn put(
        &self,
        path: &str,
        request: PutContentRequest,
    ) -> Result<UpstreamBody, GatewayError> {
        let path = require_path(path)?;
        let (Some(message), Some(content)) = (non_empty(request.message), non_empty(request.content))
        else {
            return Err(GatewayError::BadRequest(
                "message and content are required".to_string(),
            ));
        };
        let branch = non_empty(request.branch).unwrap_or_else(|| self.repo().branch.clone());

        let content = if request.is_base64_encoded {
            let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(&compact)
                .map_err(|_| GatewayError::BadRequest("content is not valid base64".to_string()))?;
            compact
        } else {
            base64::engine::general_purpose::STANDARD.encode(content.as_bytes())
        };

        let sha = match non_empty(request.sha) {
            Some(sha) => Some(sha),
            None => self.contents.resolve_sha(path, Some(branch.as_str())).await?,
        };
        tracing::debug!(path = %path, update = sha.is_some(), "書き込み先を解決しました");

        let write = ContentWrite {
            message,
            content,
            branch,
            sha,
        };
        Ok(self.contents.put(path, &write).await?)
    }

    /// ファイルを削除する。DELETEとPOST .../delete の両方がここに到達する。
    pub async fn delete(
        &self,
        path: &str,
        request: DeleteContentRequest,
    ) -> Result<UpstreamBody, GatewayError> {
        let path = require_path(path)?;
        let branch = non_empty(request.branch).unwrap_or_else(|| self.repo().branch.clone());

        let sha = match non_empty(request.sha) {
            Some(sha) => sha,
            None => self
                .contents
                .resolve_sha(path, Some(branch.as_str()))
                .await?
                .ok_or_else(|| GatewayError::NotFound(DELETE_NOT_FOUND.to_string()))?,
        };

        let delete = ContentDelete {
            message: non_empty(request.message).unwrap_or_else(|| format!("Delete {path}")),
            sha,
            branch,
        };
        Ok(self.contents.delete(path, &delete).await?)
    }

    /// 設定ブランチの先頭コミットSHA。
    pub async fn head(&self) -> Result<String, GatewayError> {
        let branch = &self.repo().branch;
        Ok(self.contents.branch_head(branch).await?)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn require_path(path: &str) -> Result<&str, GatewayError> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Err(GatewayError::BadRequest("path is required".to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use repobridge_core::test_helpers::{contents_client, MockUpstream};

    async fn gateway(mock: &MockUpstream) -> ContentGateway {
        ContentGateway::new(contents_client(&mock.clone().start().await))
    }

    fn put_request(content: &str) -> PutContentRequest {
        PutContentRequest {
            message: Some("write".to_string()),
            content: Some(content.to_string()),
            ..PutContentRequest::default()
        }
    }

    /// 既存パスへのsha省略PUTは、メタデータのshaを付けて書き込む
    #[tokio::test]
    async fn test_put_without_sha_updates_existing() {
        let mock = MockUpstream::new().with_file_sha("notes/a.txt", b"old", "abc123");
        let gateway = gateway(&mock).await;

        gateway.put("notes/a.txt", put_request("new")).await.unwrap();

        let put = mock.contents_calls("PUT").pop().unwrap();
        let body = put.body.unwrap();
        assert_eq!(body["sha"], "abc123");
        assert_eq!(body["content"], "bmV3");
        assert_eq!(body["branch"], "main");
        assert_eq!(mock.file("notes/a.txt").unwrap(), b"new");
    }

    /// 存在しないパスへのsha省略PUTは、shaなしで作成する
    #[tokio::test]
    async fn test_put_without_sha_creates_missing() {
        let mock = MockUpstream::new();
        let gateway = gateway(&mock).await;

        gateway.put("notes/new.txt", put_request("hi")).await.unwrap();

        let body = mock.contents_calls("PUT").pop().unwrap().body.unwrap();
        assert!(body.get("sha").is_none());
        assert_eq!(mock.file("notes/new.txt").unwrap(), b"hi");
    }

    /// メタデータ取得の404以外の失敗は作成にすり替えず伝播する
    #[tokio::test]
    async fn test_put_metadata_failure_is_not_swallowed() {
        let mock = MockUpstream::new().fail_get("notes/a.txt", 503);
        let gateway = gateway(&mock).await;

        let err = gateway.put("notes/a.txt", put_request("x")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: 503, .. }));
        assert!(mock.contents_calls("PUT").is_empty());
    }

    #[tokio::test]
    async fn test_put_requires_message_and_content() {
        let mock = MockUpstream::new();
        let gateway = gateway(&mock).await;

        let mut request = put_request("x");
        request.message = None;
        assert!(matches!(
            gateway.put("a.txt", request).await,
            Err(GatewayError::BadRequest(_))
        ));
        assert!(matches!(
            gateway.put("a.txt", put_request("")).await,
            Err(GatewayError::BadRequest(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_put_pre_encoded_content_passes_through() {
        let mock = MockUpstream::new();
        let gateway = gateway(&mock).await;

        let mut request = put_request("iVBORw0K\nGgo=");
        request.is_base64_encoded = true;
        request.branch = Some("drafts".to_string());
        gateway.put("img/logo.png", request).await.unwrap();

        let body = mock.contents_calls("PUT").pop().unwrap().body.unwrap();
        assert_eq!(body["content"], "iVBORw0KGgo=");
        assert_eq!(body["branch"], "drafts");

        let mut request = put_request("not base64!");
        request.is_base64_encoded = true;
        assert!(matches!(
            gateway.put("img/bad.png", request).await,
            Err(GatewayError::BadRequest(_))
        ));
    }

    /// shaを指定した古い書き込みは上流の409をそのまま返し、再試行しない
    #[tokio::test]
    async fn test_put_stale_sha_is_not_retried() {
        let mock = MockUpstream::new().with_file_sha("a.txt", b"a", "current");
        let gateway = gateway(&mock).await;

        let mut request = put_request("b");
        request.sha = Some("stale".to_string());
        let err = gateway.put("a.txt", request).await.unwrap_err();

        assert_eq!(err.status().as_u16(), 409);
        assert_eq!(mock.contents_calls("PUT").len(), 1);
    }

    #[tokio::test]
    async fn test_put_on_directory_is_bad_request() {
        let mock = MockUpstream::new().with_file("docs/a.md", b"a");
        let gateway = gateway(&mock).await;

        let err = gateway.put("docs", put_request("x")).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(m) if m.contains("directory")));
    }

    /// sha省略の削除でファイルがなければ404、上流の削除は呼ばない
    #[tokio::test]
    async fn test_delete_missing_file_is_not_found() {
        let mock = MockUpstream::new();
        let gateway = gateway(&mock).await;

        let err = gateway
            .delete("gone.txt", DeleteContentRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(m) if m == DELETE_NOT_FOUND));
        assert!(mock.contents_calls("DELETE").is_empty());
    }

    #[tokio::test]
    async fn test_delete_resolves_sha_and_defaults_message() {
        let mock = MockUpstream::new().with_file_sha("old/a.txt", b"a", "abc123");
        let gateway = gateway(&mock).await;

        gateway
            .delete("old/a.txt", DeleteContentRequest::default())
            .await
            .unwrap();

        let body = mock.contents_calls("DELETE").pop().unwrap().body.unwrap();
        assert_eq!(body["sha"], "abc123");
        assert_eq!(body["message"], "Delete old/a.txt");
        assert_eq!(body["branch"], "main");
        assert!(mock.file("old/a.txt").is_none());
    }

    #[tokio::test]
    async fn test_empty_path_is_rejected() {
        let mock = MockUpstream::new();
        let gateway = gateway(&mock).await;

        assert!(matches!(
            gateway.delete("/", DeleteContentRequest::default()).await,
            Err(GatewayError::BadRequest(_))
        ));
    }
}
