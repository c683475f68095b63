//! スナップショット対象の読み出し元。

use std::path::PathBuf;

use async_trait::async_trait;

use super::SnapshotError;

/// スナップショット対象のバイト列を提供する。
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// ログ用の説明
    fn describe(&self) -> String;

    /// スナップショット名の拡張子（ドット込み、なければ空）
    fn extension(&self) -> String;

    async fn read(&self) -> Result<Vec<u8>, SnapshotError>;
}

/// ローカルファイルを読み出すソース。
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default()
    }

    async fn read(&self) -> Result<Vec<u8>, SnapshotError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| SnapshotError::Source(format!("{}: {e}", self.path.display())))
    }
}

/// メモリ上のバイト列を返すソース（テスト用）。
#[cfg(any(test, feature = "testutil"))]
#[derive(Debug, Clone)]
pub struct MemorySource {
    pub bytes: Option<Vec<u8>>,
    pub extension: String,
}

#[cfg(any(test, feature = "testutil"))]
#[async_trait]
impl SnapshotSource for MemorySource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn extension(&self) -> String {
        self.extension.clone()
    }

    async fn read(&self) -> Result<Vec<u8>, SnapshotError> {
        self.bytes
            .clone()
            .ok_or_else(|| SnapshotError::Source("memory source is empty".to_string()))
    }
}
