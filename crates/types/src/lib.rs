//! # Repobridge 共有型定義
//!
//! Gatewayの公開HTTP面と、上流のリポジトリContents APIの双方で
//! やり取りされるデータ構造をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - Base64: ファイル内容の転送表現（上流APIが要求する）
//! - SHA: 上流のバージョンタグ（楽観的並行制御トークン）

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Contents API エントリ
// ---------------------------------------------------------------------------

/// 上流のエントリ種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// 通常ファイル
    File,
    /// ディレクトリ
    Dir,
    /// シンボリックリンク
    Symlink,
    /// サブモジュール
    Submodule,
}

/// 上流が返すパス単位のエントリ（ファイルまたはディレクトリ）。
///
/// このシステムはエントリを所有しない。必要時に取得・書き込みされる一時的なビュー。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEntry {
    /// ファイル名（パス末尾のセグメント）
    #[serde(default)]
    pub name: String,
    /// リポジトリルートからのパス
    pub path: String,
    /// 現在のバージョンタグ。既存パスへの書き込みにはこの値が必須。
    pub sha: String,
    /// エントリ種別
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// サイズ（バイト）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// エンコード済み内容（単一ファイル取得時のみ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// `content` のエンコーディング（通常 "base64"）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl ContentEntry {
    /// 通常ファイルかどうか。
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// 上流への書き込みボディ（作成・更新）。
/// `sha` がある場合は更新、ない場合は作成として扱われる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentWrite {
    /// コミットメッセージ
    pub message: String,
    /// Base64エンコード済み内容
    pub content: String,
    /// 書き込み先ブランチ
    pub branch: String,
    /// 既存エントリのSHA（更新時のみ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// 上流への削除ボディ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDelete {
    /// コミットメッセージ
    pub message: String,
    /// 削除対象のSHA
    pub sha: String,
    /// 対象ブランチ
    pub branch: String,
}

// ---------------------------------------------------------------------------
// Gateway リクエスト
// ---------------------------------------------------------------------------

/// PUT /contents/{path} リクエスト。
///
/// `message` と `content` は必須だが、欠落時に400で応答するため
/// デシリアライズ段階ではOptionとして受ける。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutContentRequest {
    /// コミットメッセージ
    #[serde(default)]
    pub message: Option<String>,
    /// ファイル内容（UTF-8テキスト、または `is_base64_encoded` 時はBase64）
    #[serde(default)]
    pub content: Option<String>,
    /// 書き込み先ブランチ（省略時は設定値）
    #[serde(default)]
    pub branch: Option<String>,
    /// 既存エントリのSHA（省略時はGatewayが解決する）
    #[serde(default)]
    pub sha: Option<String>,
    /// `content` がすでにBase64である場合にtrue
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// DELETE /contents/{path} および POST /contents/{path}/delete リクエスト。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteContentRequest {
    /// コミットメッセージ（省略時は "Delete {path}"）
    #[serde(default)]
    pub message: Option<String>,
    /// 削除対象のSHA（省略時はGatewayが解決する）
    #[serde(default)]
    pub sha: Option<String>,
    /// 対象ブランチ（省略時は設定値）
    #[serde(default)]
    pub branch: Option<String>,
}

// ---------------------------------------------------------------------------
// Gateway レスポンス
// ---------------------------------------------------------------------------

/// GET /health レスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// 常に "ok"
    pub status: String,
    /// 対象リポジトリ名
    pub repo: String,
    /// 対象ブランチ
    pub branch: String,
}

/// GET /debug/head-test レスポンス。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadResponse {
    /// ブランチ先頭コミットのSHA
    pub head: String,
}

// ---------------------------------------------------------------------------
// 上流 認証・参照
// ---------------------------------------------------------------------------

/// installations/{id}/access_tokens のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    /// Installation token
    pub token: String,
    /// 有効期限（ISO-8601）
    pub expires_at: String,
}

/// git/refs/heads/{branch} のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRef {
    /// 参照先オブジェクト
    pub object: GitObject,
}

/// 参照先のGitオブジェクト。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitObject {
    /// オブジェクトSHA
    pub sha: String,
}

// ---------------------------------------------------------------------------
// 上流レスポンスボディ
// ---------------------------------------------------------------------------

/// 上流レスポンスボディ。
///
/// 境界で一度だけJSONかどうかを判定し、以降は型付きの値として扱う。
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    /// JSONとしてパースできたボディ
    Structured(serde_json::Value),
    /// JSONではないボディ（生テキスト）
    Raw(String),
}

impl UpstreamBody {
    /// 生テキストから判定する。空文字列は `Raw("")`。
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => UpstreamBody::Structured(value),
            Err(_) => UpstreamBody::Raw(text),
        }
    }

    /// 上流の配列レスポンス（ディレクトリ一覧）かどうか。
    pub fn is_listing(&self) -> bool {
        matches!(self, UpstreamBody::Structured(serde_json::Value::Array(_)))
    }

    /// クライアント向けJSONに変換する。生テキストは `{"raw": ...}` で包む。
    pub fn into_json(self) -> serde_json::Value {
        match self {
            UpstreamBody::Structured(value) => value,
            UpstreamBody::Raw(text) => serde_json::json!({ "raw": text }),
        }
    }
}
