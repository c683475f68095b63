//! Gatewayの共有状態。

use crate::auth::AccessKey;
use crate::contents::ContentGateway;

/// 全ハンドラで共有する状態（`Arc` で保持）。
pub struct GatewayState {
    pub gateway: ContentGateway,
    pub access_key: AccessKey,
}
