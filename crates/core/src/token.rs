//! # Installation token キャッシュ
//!
//! principal（プライマリApp / ミラーApp）ごとに有効なinstallation tokenを最大1つ保持する。
//!
//! ## 状態
//! - **Fresh**: `expires_at > now + 60s`。I/Oなしでキャッシュを返す。
//! - **Stale**: tokenなし、または `expires_at <= now + 60s`。
//!   署名付きアサーションを生成し、上流のtoken交換エンドポイントを1回呼ぶ。
//!
//! 交換はprincipalごとにsingle-flight。Staleを観測した同時呼び出しはロックで待ち合わせ、
//! 待っている間に完了した交換の結果を、成功・失敗を問わずそのまま受け取る。
//! 交換に失敗した場合キャッシュはStaleのままで、次に到着した呼び出しが再度交換する。

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use repobridge_crypto::AssertionSigner;
use repobridge_types::AccessTokenResponse;
use reqwest::Method;
use tokio::sync::Mutex;

use crate::client::UpstreamClient;
use crate::error::ApiError;

/// 有効期限の安全マージン（秒）
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// tokenの所有者。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Principal {
    /// Gatewayが中継に使うプライマリApp
    Primary,
    /// スナップショットに使うミラーApp
    Mirror,
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::Primary => f.write_str("primary"),
            Principal::Mirror => f.write_str("mirror"),
        }
    }
}

/// Appの認証情報。
#[derive(Debug, Clone)]
pub struct AppCredentials {
    /// App ID（アサーションの発行者）
    pub app_id: String,
    /// Installation ID
    pub installation_id: String,
    /// 検証済みの署名器
    pub signer: AssertionSigner,
}

/// 上流が発行した短命のbearer token。
#[derive(Clone)]
pub struct InstallationToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl InstallationToken {
    pub fn new(value: String, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// `now` 時点で安全マージンを残して有効かどうか。
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// principal単位のinstallation tokenキャッシュ。
///
/// プロセス起動時に1度だけ構築し、`Arc` で共有する。
pub struct TokenCache {
    principal: Principal,
    credentials: AppCredentials,
    upstream: UpstreamClient,
    slot: Mutex<Slot>,
    /// 完了した交換の世代。ロック待ちの前に読み、待っている間の交換を検出する
    generation: AtomicU64,
}

#[derive(Default)]
struct Slot {
    token: Option<InstallationToken>,
    /// 直近の交換が失敗していればそのエラー
    last_failure: Option<ApiError>,
}

impl TokenCache {
    pub fn new(principal: Principal, credentials: AppCredentials, upstream: UpstreamClient) -> Self {
        Self {
            principal,
            credentials,
            upstream,
            slot: Mutex::new(Slot::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// 有効なtokenを返す。Staleなら交換してから返す。
    pub async fn get_token(&self) -> Result<InstallationToken, ApiError> {
        let observed = self.generation.load(Ordering::Acquire);
        // 交換中もロックを保持し、後続の呼び出しを待たせる
        let mut slot = self.slot.lock().await;
        let now = Utc::now();

        if let Some(token) = slot.token.as_ref().filter(|t| t.is_fresh(now)) {
            tracing::debug!(
                principal = %self.principal,
                expires_at = %token.expires_at,
                "キャッシュ済みのinstallation tokenを使用"
            );
            return Ok(token.clone());
        }

        // 待っている間に完了した交換が失敗していれば、その結果を共有する
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(err) = &slot.last_failure {
                tracing::debug!(principal = %self.principal, "待ち合わせた交換の失敗を返します");
                return Err(err.clone());
            }
        }

        let result = self.exchange(now).await;
        match &result {
            Ok(token) => {
                slot.token = Some(token.clone());
                slot.last_failure = None;
            }
            Err(err) => slot.last_failure = Some(err.clone()),
        }
        self.generation.fetch_add(1, Ordering::Release);
        result
    }

    /// 署名付きアサーションを上流のtoken交換エンドポイントに送る。
    async fn exchange(&self, now: DateTime<Utc>) -> Result<InstallationToken, ApiError> {
        tracing::info!(principal = %self.principal, "installation tokenを要求します");

        let assertion = self.credentials.signer.sign(&self.credentials.app_id, now)?;
        let url = self.upstream.url([
            "app",
            "installations",
            self.credentials.installation_id.as_str(),
            "access_tokens",
        ])?;

        let request = self
            .upstream
            .request(Method::POST, url)
            .bearer_auth(&assertion.token);
        let (status, body) = self.upstream.send(request).await?;

        if !status.is_success() {
            tracing::error!(
                principal = %self.principal,
                status = status.as_u16(),
                "installation tokenの取得に失敗"
            );
            return Err(ApiError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        let response: AccessTokenResponse = serde_json::from_value(body.into_json())
            .map_err(|e| ApiError::Decode(format!("token交換レスポンスのパースに失敗: {e}")))?;
        let expires_at = DateTime::parse_from_rfc3339(&response.expires_at)
            .map_err(|e| ApiError::Decode(format!("expires_atのパースに失敗: {e}")))?
            .with_timezone(&Utc);

        tracing::info!(
            principal = %self.principal,
            expires_at = %expires_at,
            "installation tokenを取得しました"
        );
        Ok(InstallationToken::new(response.token, expires_at))
    }
}
