//! # Repobridge Core
//!
//! 上流のリポジトリContents APIとのやり取りを担うライブラリ。
//!
//! ## 構成
//! - [`token`]: App認証によるinstallation tokenのキャッシュ（principal単位、single-flight）
//! - [`contents`]: パス指定のCRUDを上流APIに変換するクライアント
//! - [`snapshot`]: 自身のデプロイ内容のフィンガープリント比較・スナップショット・世代管理
//!
//! HTTPサーバーや設定の読み込みは `repobridge-gateway` 側の責務。

pub mod client;
pub mod contents;
pub mod error;
pub mod snapshot;
pub mod token;

#[cfg(any(test, feature = "testutil"))]
pub mod test_helpers;

pub use client::UpstreamClient;
pub use contents::{ContentsClient, RepoRef};
pub use error::ApiError;
pub use snapshot::{SnapshotError, SnapshotManager, SnapshotOutcome, SnapshotSettings};
pub use token::{AppCredentials, InstallationToken, Principal, TokenCache};
