//! # 上流API エラー型

use repobridge_crypto::CryptoError;
use repobridge_types::UpstreamBody;

/// 上流API呼び出しのエラー型。
///
/// HTTPステータスは変換せずにそのまま保持する。
/// token交換の失敗は待ち合わせた呼び出し全員に返すため `Clone`。
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// 上流が2xx以外を返した
    #[error("上流APIがエラーを返しました: HTTP {status}")]
    Upstream {
        /// 上流のHTTPステータス
        status: u16,
        /// 上流のレスポンスボディ
        body: UpstreamBody,
    },
    /// installation tokenの交換が2xx以外を返した
    #[error("installation tokenの取得に失敗: HTTP {status}")]
    TokenExchange {
        /// 上流のHTTPステータス
        status: u16,
        /// 上流のレスポンスボディ
        body: UpstreamBody,
    },
    /// 上流呼び出しのタイムアウト
    #[error("上流APIの応答がタイムアウトしました: {0}")]
    Timeout(String),
    /// 接続失敗等の通信エラー
    #[error("上流APIとの通信に失敗: {0}")]
    Transport(String),
    /// 上流レスポンスが想定した形式ではない
    #[error("上流レスポンスの解釈に失敗: {0}")]
    Decode(String),
    /// アサーションの署名に失敗
    #[error("アサーションの署名に失敗: {0}")]
    Signing(#[from] CryptoError),
    /// ファイルを期待したパスがディレクトリだった
    #[error("パスはディレクトリです: {0}")]
    NotAFile(String),
}

impl ApiError {
    /// 上流が404を返したかどうか。
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Upstream { status: 404, .. })
    }
}

/// reqwestのエラーをタイムアウトとそれ以外に振り分ける。
pub(crate) fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(e.to_string())
    } else {
        ApiError::Transport(e.to_string())
    }
}
