//! # Gatewayエンドポイント

pub mod contents;
pub mod health;

pub use contents::{handle_delete, handle_get, handle_list_root, handle_post, handle_put};
pub use head_test::handle_head_test;
pub use health::handle_health;
