//! # Gateway設定
//!
//! 起動時に環境変数から一度だけ読み込む。
//! 必須項目の欠落や数値のパース失敗は [`ConfigError`] となり、待ち受け開始前に終了する。
//!
//! ミラー用の認証情報は全項目が揃った場合のみ有効。一部だけの場合は警告を出して
//! スナップショットを無効にする（Gateway本体の起動は妨げない）。

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use repobridge_core::snapshot::{DEFAULT_PREFIX, DEFAULT_RETENTION};
use repobridge_core::{RepoRef, SnapshotSettings};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_MIRROR_BRANCH: &str = "main";
const DEFAULT_TIMEZONE: &str = "Europe/Berlin";

const MIRROR_VARS: [&str; 5] = [
    "MIRROR_APP_ID",
    "MIRROR_INSTALLATION_ID",
    "MIRROR_PRIVATE_KEY",
    "MIRROR_REPO_OWNER",
    "MIRROR_REPO_NAME",
];

/// 設定エラー（起動時に致命的）
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("必須の環境変数 {0} が設定されていません")]
    Missing(&'static str),
    #[error("環境変数 {name} が不正です: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// 1つのAppの認証情報（鍵は未正規化のまま保持する）
#[derive(Clone)]
pub struct AppConfig {
    pub app_id: String,
    pub installation_id: String,
    pub private_key: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_id", &self.app_id)
            .field("installation_id", &self.installation_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// ミラー（スナップショット保存先）の設定
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub app: AppConfig,
    pub repo: RepoRef,
}

/// スナップショットの設定
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// フィンガープリント対象のファイル
    pub source: PathBuf,
    pub settings: SnapshotSettings,
    /// 定期実行の間隔（未設定なら起動時に1回）
    pub interval: Option<Duration>,
}

/// Gateway全体の設定
#[derive(Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub api_base: String,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
    pub api_key: String,
    pub app: AppConfig,
    pub repo: RepoRef,
    pub mirror: Option<MirrorConfig>,
    pub snapshot: Option<SnapshotConfig>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_base", &self.api_base)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("api_key", &"<redacted>")
            .field("app", &self.app)
            .field("repo", &self.repo)
            .field("mirror", &self.mirror)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl GatewayConfig {
    /// プロセスの環境変数から読み込む。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の参照関数から読み込む。空文字列は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let app = AppConfig {
            app_id: require("APP_ID")?,
            installation_id: require("INSTALLATION_ID")?,
            // 鍵は正規化に任せるため前後の空白以外は触らない
            private_key: require("APP_PRIVATE_KEY")?,
        };
        let repo = RepoRef {
            owner: require("REPO_OWNER")?,
            name: require("REPO_NAME")?,
            branch: require("BRANCH")?,
        };
        let api_key = require("API_KEY")?;

        let host = get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;
        let api_base = get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let timeout_secs = parse_or(
            "UPSTREAM_TIMEOUT_SECS",
            get("UPSTREAM_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
        )?;
        let max_body_bytes = parse_or("MAX_BODY_BYTES", get("MAX_BODY_BYTES"), DEFAULT_MAX_BODY_BYTES)?;

        let mirror = Self::mirror_from(&get);
        let snapshot = match (get("SNAPSHOT_SOURCE"), mirror.is_some()) {
            (Some(source), true) => Some(Self::snapshot_from(&get, source)?),
            (Some(_), false) => {
                tracing::warn!("SNAPSHOT_SOURCEが設定されていますがミラー設定がありません。スナップショットは無効です");
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            host,
            port,
            api_base,
            upstream_timeout: Duration::from_secs(timeout_secs),
            max_body_bytes,
            api_key,
            app,
            repo,
            mirror,
            snapshot,
        })
    }

    fn mirror_from<G>(get: &G) -> Option<MirrorConfig>
    where
        G: Fn(&str) -> Option<String>,
    {
        let values: Vec<Option<String>> = MIRROR_VARS.iter().map(|name| get(*name)).collect();
        let present = values.iter().filter(|v| v.is_some()).count();
        if present == 0 {
            return None;
        }
        if present < MIRROR_VARS.len() {
            let missing: Vec<&str> = MIRROR_VARS
                .iter()
                .zip(&values)
                .filter(|(_, v)| v.is_none())
                .map(|(name, _)| *name)
                .collect();
            tracing::warn!(missing = ?missing, "ミラー設定が不完全です。スナップショットは無効です");
            return None;
        }

        let values: Vec<String> = values.into_iter().flatten().collect();
        let [app_id, installation_id, private_key, owner, name]: [String; 5] =
            values.try_into().ok()?;
        Some(MirrorConfig {
            app: AppConfig {
                app_id,
                installation_id,
                private_key,
            },
            repo: RepoRef {
                owner,
                name,
                branch: get("MIRROR_BRANCH").unwrap_or_else(|| DEFAULT_MIRROR_BRANCH.to_string()),
            },
        })
    }

    fn snapshot_from<G>(get: &G, source: String) -> Result<SnapshotConfig, ConfigError>
    where
        G: Fn(&str) -> Option<String>,
    {
        let retention = parse_or("SNAPSHOT_RETENTION", get("SNAPSHOT_RETENTION"), DEFAULT_RETENTION)?;
        if retention == 0 {
            return Err(ConfigError::Invalid {
                name: "SNAPSHOT_RETENTION",
                reason: "1以上を指定してください".to_string(),
            });
        }

        let tz_name = get("SNAPSHOT_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = tz_name.parse().map_err(|e| ConfigError::Invalid {
            name: "SNAPSHOT_TIMEZONE",
            reason: format!("{tz_name}: {e}"),
        })?;

        let interval = match get("SNAPSHOT_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = parse_or("SNAPSHOT_INTERVAL_SECS", Some(raw), 0)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(SnapshotConfig {
            source: PathBuf::from(source),
            settings: SnapshotSettings {
                prefix: get("SNAPSHOT_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
                retention,
                timezone,
            },
            interval,
        })
    }

    /// 待ち受けアドレス
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{raw}: {e}"),
        }),
        None => Ok(default),
    }
}
