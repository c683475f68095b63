//! # スナップショット・世代管理
//!
//! 自身のデプロイ内容のフィンガープリントをミラーリポジトリ上のポインタと比較し、
//! 変化があった場合のみタイムスタンプ付きスナップショットを書き込む。
//!
//! ## 1回の実行の流れ
//! 1. ソースを読み、SHA-256(hex)を計算
//! 2. ポインタを取得（404は「前回なし」）
//! 3. 前後の値が一致すれば終了（書き込みなし）
//! 4. スナップショットを作成
//! 5. ポインタを更新（前回のSHAがあれば付与）
//! 6. 保持数を超えた古いスナップショットを削除
//!
//! 1〜5の失敗はその回の実行全体を中断する。再試行はしない。
//! 6の個別の削除失敗はログに残して続行する。

pub mod retention;
pub mod source;

use base64::Engine;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use repobridge_types::{ContentDelete, ContentWrite};

use crate::contents::ContentsClient;
use crate::error::ApiError;

pub use retention::{select_expired, PruneReport, SnapshotNaming};
pub use source::{FileSource, SnapshotSource};

#[cfg(any(test, feature = "testutil"))]
pub use source::MemorySource;

/// 既定の保持数
pub const DEFAULT_RETENTION: usize = 3;
/// 既定のスナップショット置き場
pub const DEFAULT_PREFIX: &str = "backups";

/// スナップショット処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// ソースの読み出しに失敗
    #[error("スナップショット対象を読み出せません: {0}")]
    Source(String),
    /// 上流API呼び出しに失敗
    #[error(transparent)]
    Api(#[from] ApiError),
    /// ポインタの内容が不正
    #[error("フィンガープリントポインタが不正です: {0}")]
    Pointer(String),
}

/// スナップショットの設定。
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    /// ミラーリポジトリ内の置き場
    pub prefix: String,
    /// 保持するスナップショット数
    pub retention: usize,
    /// タイムスタンプのタイムゾーン
    pub timezone: Tz,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            retention: DEFAULT_RETENTION,
            timezone: chrono_tz::Europe::Berlin,
        }
    }
}

/// 1回の実行結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// フィンガープリントが一致したため何もしなかった
    Unchanged { fingerprint: String },
    /// スナップショットを作成した
    Created {
        path: String,
        fingerprint: String,
        /// 世代管理の結果（一覧取得に失敗した場合は `None`）
        prune: Option<PruneReport>,
    },
}

/// スナップショットの作成と世代管理を行う。
pub struct SnapshotManager {
    contents: ContentsClient,
    source: Box<dyn SnapshotSource>,
    settings: SnapshotSettings,
    naming: SnapshotNaming,
}

impl SnapshotManager {
    /// `contents` はミラーリポジトリ向けのクライアント。
    pub fn new(
        contents: ContentsClient,
        source: Box<dyn SnapshotSource>,
        settings: SnapshotSettings,
    ) -> Self {
        let naming = SnapshotNaming::new(&settings.prefix, &source.extension());
        Self {
            contents,
            source,
            settings,
            naming,
        }
    }

    pub async fn run(&self) -> Result<SnapshotOutcome, SnapshotError> {
        self.run_at(Utc::now()).await
    }

    /// `now` を作成時刻として1回実行する。
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SnapshotOutcome, SnapshotError> {
        let bytes = self.source.read().await?;
        let fingerprint = repobridge_crypto::fingerprint(&bytes);
        let branch = self.contents.repo().branch.clone();
        tracing::debug!(
            source = %self.source.describe(),
            fingerprint = %fingerprint,
            "フィンガープリントを計算しました"
        );

        let pointer_path = self.naming.pointer_path();
        let pointer_entry = self
            .contents
            .metadata(&pointer_path, Some(branch.as_str()))
            .await?;
        let (previous, pointer_sha) = match pointer_entry {
            Some(entry) => {
                let raw = ContentsClient::decode_content(&entry)?;
                let text = String::from_utf8(raw)
                    .map_err(|e| SnapshotError::Pointer(format!("{pointer_path}: {e}")))?;
                (Some(text.trim().to_string()), Some(entry.sha))
            }
            None => (None, None),
        };

        if previous.as_deref() == Some(fingerprint.as_str()) {
            tracing::info!(fingerprint = %fingerprint, "変更なし。スナップショットをスキップします");
            return Ok(SnapshotOutcome::Unchanged { fingerprint });
        }

        let short = fingerprint.get(..10).unwrap_or(&fingerprint);
        let timestamp = now
            .with_timezone(&self.settings.timezone)
            .format(retention::TIMESTAMP_FORMAT)
            .to_string();
        let path = self.naming.snapshot_path(&timestamp);

        let snapshot = ContentWrite {
            message: format!("Snapshot {short}"),
            content: base64::engine::general_purpose::STANDARD.encode(&bytes),
            branch: branch.clone(),
            sha: None,
        };
        self.contents.put(&path, &snapshot).await?;

        let pointer = ContentWrite {
            message: format!("Update fingerprint to {short}"),
            content: base64::engine::general_purpose::STANDARD.encode(fingerprint.as_bytes()),
            branch,
            sha: pointer_sha,
        };
        self.contents.put(&pointer_path, &pointer).await?;

        tracing::info!(
            path = %path,
            fingerprint = %fingerprint,
            previous = previous.as_deref().unwrap_or("-"),
            "スナップショットを作成しました"
        );

        let prune = match self.prune().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "スナップショットの世代管理に失敗");
                None
            }
        };

        Ok(SnapshotOutcome::Created {
            path,
            fingerprint,
            prune,
        })
    }

    /// 保持数を超えた古いスナップショットを1件ずつ削除する。
    ///
    /// 個別の削除失敗はログに残して残りの削除を続ける。
    pub async fn prune(&self) -> Result<PruneReport, SnapshotError> {
        let branch = self.contents.repo().branch.clone();
        let Some(entries) = self
            .contents
            .list(self.naming.prefix(), Some(branch.as_str()))
            .await?
        else {
            return Ok(PruneReport::default());
        };

        let total = entries.iter().filter(|e| self.naming.matches(e)).count();
        let expired = select_expired(&entries, &self.naming, self.settings.retention);
        let mut report = PruneReport {
            kept: total - expired.len(),
            ..PruneReport::default()
        };

        for entry in expired {
            let delete = ContentDelete {
                message: format!("Prune snapshot {}", entry.name),
                sha: entry.sha.clone(),
                branch: branch.clone(),
            };
            match self.contents.delete(&entry.path, &delete).await {
                Ok(_) => report.deleted.push(entry.path),
                Err(e) => {
                    tracing::warn!(path = %entry.path, error = %e, "古いスナップショットの削除に失敗");
                    report.failed.push(entry.path);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::test_helpers::{contents_client, MockUpstream};

    const SOURCE: &[u8] = b"console.log('deployed');";

    fn manager(base: &str, bytes: Option<&[u8]>) -> SnapshotManager {
        let source = MemorySource {
            bytes: bytes.map(<[u8]>::to_vec),
            extension: ".js".to_string(),
        };
        SnapshotManager::new(
            contents_client(base),
            Box::new(source),
            SnapshotSettings::default(),
        )
    }

    fn winter_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap()
    }

    /// ポインタと一致する場合は書き込みが一切発生しない
    #[tokio::test]
    async fn test_unchanged_fingerprint_writes_nothing() {
        let current = repobridge_crypto::fingerprint(SOURCE);
        let mock = MockUpstream::new().with_file(
            "backups/current_fingerprint.txt",
            format!("  {current}\n").as_bytes(),
        );
        let manager = manager(&mock.clone().start().await, Some(SOURCE));

        let outcome = manager.run_at(winter_noon()).await.unwrap();
        assert_eq!(outcome, SnapshotOutcome::Unchanged { fingerprint: current });
        assert!(mock.contents_calls("PUT").is_empty());
        assert!(mock.contents_calls("DELETE").is_empty());
    }

    /// 初回はポインタをSHAなしで作成する
    #[tokio::test]
    async fn test_first_run_creates_pointer() {
        let mock = MockUpstream::new();
        let manager = manager(&mock.clone().start().await, Some(SOURCE));

        let outcome = manager.run_at(winter_noon()).await.unwrap();
        let SnapshotOutcome::Created { path, fingerprint, prune } = outcome else {
            panic!("expected a snapshot");
        };

        // Europe/Berlin は冬季 UTC+1
        assert_eq!(path, "backups/snapshot_2024-01-15_13-30-00.js");
        assert_eq!(mock.file(&path).unwrap(), SOURCE);
        assert_eq!(
            mock.file("backups/current_fingerprint.txt").unwrap(),
            fingerprint.as_bytes()
        );

        let puts = mock.contents_calls("PUT");
        assert_eq!(puts.len(), 2);
        let pointer_body = puts[1].body.as_ref().unwrap();
        assert!(pointer_body.get("sha").is_none());
        assert_eq!(pointer_body["branch"], "main");
        assert_eq!(prune.unwrap().kept, 1);
    }

    /// 変更時はスナップショット1件・ポインタ更新1件・世代管理が行われる
    #[tokio::test]
    async fn test_changed_fingerprint_snapshots_and_prunes() {
        let mock = MockUpstream::new()
            .with_file_sha("backups/current_fingerprint.txt", b"0000old", "ptr-sha")
            .with_file("backups/snapshot_2024-01-11_00-00-00.js", b"1")
            .with_file("backups/snapshot_2024-01-12_00-00-00.js", b"2")
            .with_file("backups/snapshot_2024-01-13_00-00-00.js", b"3")
            .with_file("backups/snapshot_2024-01-14_00-00-00.js", b"4");
        let manager = manager(&mock.clone().start().await, Some(SOURCE));

        let outcome = manager.run_at(winter_noon()).await.unwrap();
        let SnapshotOutcome::Created { prune, .. } = outcome else {
            panic!("expected a snapshot");
        };

        let puts = mock.contents_calls("PUT");
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[1].body.as_ref().unwrap()["sha"], "ptr-sha");

        let report = prune.unwrap();
        assert_eq!(report.kept, 3);
        assert_eq!(
            report.deleted,
            vec![
                "backups/snapshot_2024-01-11_00-00-00.js",
                "backups/snapshot_2024-01-12_00-00-00.js"
            ]
        );
        assert_eq!(mock.contents_calls("DELETE").len(), 2);
        assert!(mock.file("backups/snapshot_2024-01-13_00-00-00.js").is_some());
    }

    /// 1件の削除失敗で残りの削除が止まらない
    #[tokio::test]
    async fn test_prune_continues_past_failed_delete() {
        let mut mock = MockUpstream::new();
        for day in 1..=5 {
            mock = mock.with_file(&format!("backups/snapshot_2024-02-0{day}_00-00-00.js"), b"x");
        }
        let mock = mock.fail_delete("backups/snapshot_2024-02-01_00-00-00.js", 500);
        let manager = manager(&mock.clone().start().await, Some(SOURCE));

        let report = manager.prune().await.unwrap();
        assert_eq!(report.failed, vec!["backups/snapshot_2024-02-01_00-00-00.js"]);
        assert_eq!(report.deleted, vec!["backups/snapshot_2024-02-02_00-00-00.js"]);

        let deletes = mock.contents_calls("DELETE");
        assert_eq!(deletes.len(), 2);
        assert_eq!(
            deletes[1].path,
            "/repos/octo/site/contents/backups/snapshot_2024-02-02_00-00-00.js"
        );
    }

    #[tokio::test]
    async fn test_prune_missing_prefix_is_noop() {
        let mock = MockUpstream::new().with_file("README.md", b"hi");
        let manager = manager(&mock.clone().start().await, Some(SOURCE));

        assert_eq!(manager.prune().await.unwrap(), PruneReport::default());
        assert!(mock.contents_calls("DELETE").is_empty());
    }

    /// ソースが読めない場合は上流に触れずに中断する
    #[tokio::test]
    async fn test_source_failure_aborts_before_upstream() {
        let mock = MockUpstream::new();
        let manager = manager(&mock.clone().start().await, None);

        let err = manager.run_at(winter_noon()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Source(_)));
        assert!(mock.calls().is_empty());
    }

    /// ポインタ取得の404以外の失敗は中断され、書き込みは行われない
    #[tokio::test]
    async fn test_pointer_read_failure_aborts() {
        let mock = MockUpstream::new().fail_get("backups/current_fingerprint.txt", 502);
        let manager = manager(&mock.clone().start().await, Some(SOURCE));

        let err = manager.run_at(winter_noon()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Api(ApiError::Upstream { status: 502, .. })));
        assert!(mock.contents_calls("PUT").is_empty());
    }
}
