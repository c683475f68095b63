//! # Contents APIクライアント
//!
//! パス指定の読み書きを上流の `/repos/{owner}/{repo}/contents/{path}` に変換する。
//! 認証には [`TokenCache`] から取得したinstallation tokenを使う。
//!
//! 上流の非2xxはステータスを変換せず [`ApiError::Upstream`] として返す。
//! メタデータ取得の404は `None` で表し、それ以外の失敗と区別する。

use std::sync::Arc;

use base64::Engine;
use repobridge_types::{ContentDelete, ContentEntry, ContentWrite, GitRef, UpstreamBody};
use reqwest::{Method, RequestBuilder, Url};

use crate::client::UpstreamClient;
use crate::error::ApiError;
use crate::token::TokenCache;

/// 操作対象のリポジトリとブランチ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    /// 既定のブランチ
    pub branch: String,
}

/// 1つのリポジトリに対するContents APIクライアント。
#[derive(Clone)]
pub struct ContentsClient {
    upstream: UpstreamClient,
    tokens: Arc<TokenCache>,
    repo: RepoRef,
}

impl ContentsClient {
    pub fn new(upstream: UpstreamClient, tokens: Arc<TokenCache>, repo: RepoRef) -> Self {
        Self {
            upstream,
            tokens,
            repo,
        }
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    /// パスの内容を取得する。ファイルならエントリ、ディレクトリなら配列。
    pub async fn get(&self, path: &str, git_ref: Option<&str>) -> Result<UpstreamBody, ApiError> {
        let url = self.contents_url(path)?;
        let mut request = self.authorized(Method::GET, url).await?;
        if let Some(git_ref) = git_ref {
            request = request.query(&[("ref", git_ref)]);
        }
        self.expect_success(path, request).await
    }

    /// パスのメタデータを取得する。存在しない場合は `None`。
    ///
    /// ディレクトリだった場合は [`ApiError::NotAFile`]。
    pub async fn metadata(
        &self,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<ContentEntry>, ApiError> {
        let body = match self.get(path, git_ref).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if body.is_listing() {
            return Err(ApiError::NotAFile(path.to_string()));
        }
        let entry = serde_json::from_value(body.into_json())
            .map_err(|e| ApiError::Decode(format!("{path} のメタデータを解釈できません: {e}")))?;
        Ok(Some(entry))
    }

    /// ディレクトリ直下のエントリ一覧を取得する。存在しない場合は `None`。
    pub async fn list(
        &self,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<Vec<ContentEntry>>, ApiError> {
        let body = match self.get(path, git_ref).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if !body.is_listing() {
            return Err(ApiError::Decode(format!("{path} はディレクトリではありません")));
        }
        let entries = serde_json::from_value(body.into_json())
            .map_err(|e| ApiError::Decode(format!("{path} の一覧を解釈できません: {e}")))?;
        Ok(Some(entries))
    }

    /// 現在のSHAを解決する。存在しない場合は `None`。
    pub async fn resolve_sha(
        &self,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<String>, ApiError> {
        Ok(self.metadata(path, git_ref).await?.map(|entry| entry.sha))
    }

    /// ファイルを作成・更新する。上流の結果（新しいSHAを含む）をそのまま返す。
    pub async fn put(&self, path: &str, write: &ContentWrite) -> Result<UpstreamBody, ApiError> {
        let url = self.contents_url(path)?;
        let request = self.authorized(Method::PUT, url).await?.json(write);
        let body = self.expect_success(path, request).await?;
        tracing::info!(
            path = %path,
            branch = %write.branch,
            update = write.sha.is_some(),
            "ファイルを書き込みました"
        );
        Ok(body)
    }

    /// ファイルを削除する。
    pub async fn delete(&self, path: &str, delete: &ContentDelete) -> Result<UpstreamBody, ApiError> {
        let url = self.contents_url(path)?;
        let request = self.authorized(Method::DELETE, url).await?.json(delete);
        let body = self.expect_success(path, request).await?;
        tracing::info!(path = %path, branch = %delete.branch, "ファイルを削除しました");
        Ok(body)
    }

    /// ブランチ先頭のコミットSHAを取得する。
    pub async fn branch_head(&self, branch: &str) -> Result<String, ApiError> {
        let mut segments = vec![
            "repos",
            self.repo.owner.as_str(),
            self.repo.name.as_str(),
            "git",
            "refs",
            "heads",
        ];
        segments.extend(branch.split('/'));
        let url = self.upstream.url(segments)?;

        let request = self.authorized(Method::GET, url).await?;
        let body = self.expect_success(branch, request).await?;
        let git_ref: GitRef = serde_json::from_value(body.into_json())
            .map_err(|e| ApiError::Decode(format!("ブランチ参照を解釈できません: {e}")))?;
        Ok(git_ref.object.sha)
    }

    /// エントリのBase64内容をデコードする。上流は60桁ごとに改行を入れて返す。
    pub fn decode_content(entry: &ContentEntry) -> Result<Vec<u8>, ApiError> {
        let encoded: String = entry
            .content
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ApiError::Decode(format!("{} の内容をデコードできません: {e}", entry.path)))
    }

    fn contents_url(&self, path: &str) -> Result<Url, ApiError> {
        let mut segments = vec![
            "repos",
            self.repo.owner.as_str(),
            self.repo.name.as_str(),
            "contents",
        ];
        segments.extend(path.split('/'));
        self.upstream.url(segments)
    }

    async fn authorized(&self, method: Method, url: Url) -> Result<RequestBuilder, ApiError> {
        let token = self.tokens.get_token().await?;
        Ok(self
            .upstream
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("token {}", token.value())))
    }

    async fn expect_success(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<UpstreamBody, ApiError> {
        let (status, body) = self.upstream.send(request).await?;
        if status.is_success() {
            return Ok(body);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(path = %path, "上流にエントリがありません");
        } else {
            tracing::warn!(path = %path, status = status.as_u16(), "上流APIがエラーを返しました");
        }
        Err(ApiError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}
