//! # 上流HTTPクライアント
//!
//! 上流APIのベースURLとタイムアウト付きの `reqwest::Client` を束ねる。
//! token交換とContents APIの双方がこのクライアントを共有する。

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Url};
use repobridge_types::UpstreamBody;

use crate::error::{transport_error, ApiError};

/// 上流APIのメディアタイプ
pub const GITHUB_JSON: &str = "application/vnd.github+json";
/// 上流APIのバージョンヘッダー値
pub const API_VERSION: &str = "2022-11-28";
/// User-Agent（上流は匿名のエージェントを拒否する）
pub const USER_AGENT: &str = concat!("repobridge/", env!("CARGO_PKG_VERSION"));
/// 既定の上流呼び出しタイムアウト
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// 上流APIへの共有HTTPクライアント。
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    api_base: String,
}

impl UpstreamClient {
    /// ベースURL（例: `https://api.github.com`）とタイムアウトから構築する。
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_JSON));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Transport(format!("HTTPクライアントの構築に失敗: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// ベースURLにセグメントを1つずつエスケープして連結する。
    ///
    /// `.` と `..` のセグメントは無視されるため、ベースより上には出られない。
    pub fn url<'a, I>(&self, segments: I) -> Result<Url, ApiError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ApiError::Decode(format!("上流ベースURLが不正: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Decode(format!("上流ベースURLが不正: {}", self.api_base)))?
            .pop_if_empty()
            .extend(segments.into_iter().filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// リクエストビルダーを作る。
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// リクエストを送信し、ステータスとボディを返す。ボディの形式判定はここで一度だけ行う。
    pub(crate) async fn send(
        &self,
        request: RequestBuilder,
    ) -> Result<(reqwest::StatusCode, UpstreamBody), ApiError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        Ok((status, UpstreamBody::from_text(text)))
    }
}
