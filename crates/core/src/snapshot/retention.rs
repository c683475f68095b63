//! スナップショットの命名規則と世代管理。
//!
//! 名前にタイムスタンプを含むため、名前の昇順がそのまま時系列順になる。

use repobridge_types::ContentEntry;

/// スナップショットのファイル名の接頭辞
pub const SNAPSHOT_STEM: &str = "snapshot_";
/// フィンガープリントポインタのファイル名
pub const POINTER_FILE: &str = "current_fingerprint.txt";
/// タイムスタンプの書式（パスに使えない `:` を含まない）
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `<prefix>/snapshot_<timestamp><ext>` 形式の命名規則。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotNaming {
    prefix: String,
    extension: String,
}

impl SnapshotNaming {
    pub fn new(prefix: &str, extension: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn snapshot_path(&self, timestamp: &str) -> String {
        format!("{}/{SNAPSHOT_STEM}{timestamp}{}", self.prefix, self.extension)
    }

    pub fn pointer_path(&self) -> String {
        format!("{}/{POINTER_FILE}", self.prefix)
    }

    /// 命名規則に一致するスナップショットファイルかどうか。
    pub fn matches(&self, entry: &ContentEntry) -> bool {
        entry.is_file()
            && entry.name != POINTER_FILE
            && entry.name.starts_with(SNAPSHOT_STEM)
            && entry.name.ends_with(&self.extension)
    }
}

/// 保持数を超えた古いスナップショットを古い順に返す。
pub fn select_expired(
    entries: &[ContentEntry],
    naming: &SnapshotNaming,
    retain: usize,
) -> Vec<ContentEntry> {
    let mut snapshots: Vec<&ContentEntry> = entries.iter().filter(|e| naming.matches(e)).collect();
    snapshots.sort_by(|a, b| a.name.cmp(&b.name));

    let excess = snapshots.len().saturating_sub(retain);
    snapshots.into_iter().take(excess).cloned().collect()
}

/// 世代管理の結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// 残したスナップショット数
    pub kept: usize,
    /// 削除したパス
    pub deleted: Vec<String>,
    /// 削除に失敗したパス
    pub failed: Vec<String>,
}
