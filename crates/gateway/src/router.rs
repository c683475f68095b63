//! # ルーティング
//!
//! `/health` 以外はアクセスキー認証を通す。
//! リクエストスパンにはメソッドとパスのみ記録し、クエリ（`apiKey` を含みうる）は出さない。

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_api_key;
use crate::endpoints::{
    handle_delete, handle_get, handle_head_test, handle_health, handle_list_root, handle_post,
    handle_put,
};
use crate::state::GatewayState;

fn request_span(request: &Request) -> tracing::Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

pub fn build_router(state: Arc<GatewayState>, max_body_bytes: usize) -> Router {
    let protected = Router::new()
        .route("/contents", get(handle_list_root))
        .route("/contents/", get(handle_list_root))
        .route(
            "/contents/{*path}",
            get(handle_get)
                .put(handle_put)
                .post(handle_post)
                .delete(handle_delete),
        )
        .route("/debug/head-test", get(handle_head_test))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new().route("/health", get(handle_health));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessKey;
    use crate::contents::ContentGateway;
    use repobridge_core::test_helpers::{contents_client, MockUpstream, RecordedCall};
    use serde_json::{json, Value};

    const KEY: &str = "test-key";

    /// ログ出力を溜めるライター
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// モック上流に向けたGatewayを起動し、(GatewayのベースURL, モック) を返す
    async fn start_gateway(mock: MockUpstream) -> (String, MockUpstream) {
        let upstream_base = mock.clone().start().await;
        let state = Arc::new(GatewayState {
            gateway: ContentGateway::new(contents_client(&upstream_base)),
            access_key: AccessKey::new(KEY),
        });
        let app = build_router(state, 1024 * 1024);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://127.0.0.1:{port}"), mock)
    }

    /// 比較用に認証ヘッダーを除いた呼び出し
    fn without_auth(calls: Vec<RecordedCall>) -> Vec<RecordedCall> {
        calls
            .into_iter()
            .map(|c| RecordedCall {
                authorization: None,
                ..c
            })
            .collect()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (base, mock) = start_gateway(MockUpstream::new()).await;

        let response = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "status": "ok", "repo": "site", "branch": "main" }));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_wrong_key_is_unauthorized() {
        let (base, mock) = start_gateway(MockUpstream::new().with_file("a.txt", b"a")).await;
        let client = reqwest::Client::new();

        for request in [
            client.get(format!("{base}/contents/a.txt")),
            client.get(format!("{base}/contents/a.txt")).header("X-Api-Key", "wrong"),
            client.get(format!("{base}/contents/a.txt?apiKey=wrong")),
            client.delete(format!("{base}/contents/a.txt")),
        ] {
            let response = request.send().await.unwrap();
            assert_eq!(response.status(), 401);
            let body: Value = response.json().await.unwrap();
            assert_eq!(body, json!({ "error": "unauthorized" }));
        }
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_get_file_with_header_or_query_key() {
        let (base, mock) = start_gateway(MockUpstream::new().with_file("docs/my file.md", b"# hi")).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{base}/contents/docs/my%20file.md"))
            .header("X-Api-Key", KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["path"], "docs/my file.md");

        let response = client
            .get(format!("{base}/contents/docs?apiKey={KEY}"))
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert!(body.is_array());

        let call = &mock.contents_calls("GET")[0];
        assert_eq!(call.path, "/repos/octo/site/contents/docs/my%20file.md");
        assert_eq!(call.query.as_deref(), Some("ref=main"));
    }

    /// クエリで渡したキーはdebugレベルでもログに出ない
    #[tokio::test]
    async fn test_query_key_is_not_logged() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (base, _mock) = start_gateway(MockUpstream::new().with_file("a.txt", b"a")).await;
        let response = reqwest::get(format!("{base}/contents/a.txt?apiKey={KEY}"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let output = logs.contents();
        assert!(output.contains("path=/contents/a.txt"));
        assert!(!output.contains(KEY));
    }

    #[tokio::test]
    async fn test_list_root() {
        let (base, _mock) = start_gateway(
            MockUpstream::new()
                .with_file("README.md", b"r")
                .with_file("src/main.rs", b"m"),
        )
        .await;

        let body: Value = reqwest::Client::new()
            .get(format!("{base}/contents/"))
            .header("X-Api-Key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    /// 上流の404はそのまま404で返る
    #[tokio::test]
    async fn test_upstream_status_passthrough() {
        let (base, _mock) = start_gateway(MockUpstream::new()).await;

        let response = reqwest::Client::new()
            .get(format!("{base}/contents/missing.txt"))
            .header("X-Api-Key", KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["details"]["message"], "Not Found");
    }

    #[tokio::test]
    async fn test_put_resolves_sha_over_http() {
        let (base, mock) =
            start_gateway(MockUpstream::new().with_file_sha("notes/a.txt", b"old", "abc123")).await;
        let client = reqwest::Client::new();

        let response = client
            .put(format!("{base}/contents/notes/a.txt"))
            .header("X-Api-Key", KEY)
            .json(&json!({ "message": "update", "content": "new" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert!(body["content"]["sha"].is_string());

        let put = mock.contents_calls("PUT").pop().unwrap();
        assert_eq!(put.body.unwrap()["sha"], "abc123");

        let response = client
            .put(format!("{base}/contents/notes/b.txt"))
            .header("X-Api-Key", KEY)
            .json(&json!({ "content": "no message" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    /// DELETE と POST .../delete のどちらでも、存在しないファイルは404で上流のDELETEなし
    #[tokio::test]
    async fn test_delete_without_sha_on_missing_file() {
        let client = reqwest::Client::new();

        for via_post in [false, true] {
            let (base, mock) = start_gateway(MockUpstream::new()).await;
            let request = if via_post {
                client.post(format!("{base}/contents/gone.txt/delete"))
            } else {
                client.delete(format!("{base}/contents/gone.txt"))
            };

            let response = request
                .header("X-Api-Key", KEY)
                .json(&json!({ "message": "remove" }))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), 404, "via_post={via_post}");
            let body: Value = response.json().await.unwrap();
            assert_eq!(body, json!({ "error": "File not found for deletion" }));
            assert!(mock.contents_calls("DELETE").is_empty());
        }
    }

    /// DELETE と POST .../delete は同じ上流呼び出しになる
    #[tokio::test]
    async fn test_delete_verb_and_post_route_are_equivalent() {
        let fixture = || MockUpstream::new().with_file_sha("docs/foo.md", b"foo", "abc123");
        let body = json!({ "message": "remove foo" });
        let client = reqwest::Client::new();

        let (base, via_delete) = start_gateway(fixture()).await;
        let response = client
            .delete(format!("{base}/contents/docs/foo.md"))
            .header("X-Api-Key", KEY)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let (base, via_post) = start_gateway(fixture()).await;
        let response = client
            .post(format!("{base}/contents/docs/foo.md/delete"))
            .header("X-Api-Key", KEY)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let delete_calls = without_auth(via_delete.calls());
        assert_eq!(delete_calls, without_auth(via_post.calls()));
        let deletes: Vec<_> = delete_calls.iter().filter(|c| c.method == "DELETE").collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(
            deletes[0].body,
            Some(json!({ "message": "remove foo", "sha": "abc123", "branch": "main" }))
        );
    }

    /// ボディなしのDELETEも受け付ける
    #[tokio::test]
    async fn test_delete_without_body() {
        let (base, mock) = start_gateway(MockUpstream::new().with_file("a.txt", b"a")).await;

        let response = reqwest::Client::new()
            .delete(format!("{base}/contents/a.txt"))
            .header("X-Api-Key", KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(mock.file("a.txt").is_none());
    }

    #[tokio::test]
    async fn test_post_without_delete_suffix_is_not_found() {
        let (base, mock) = start_gateway(MockUpstream::new().with_file("a.txt", b"a")).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/contents/a.txt"))
            .header("X-Api-Key", KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_head_probe() {
        let (base, _mock) = start_gateway(MockUpstream::new().with_head("main", "cafef00d")).await;

        let body: Value = reqwest::Client::new()
            .get(format!("{base}/debug/head-test"))
            .header("X-Api-Key", KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({ "head": "cafef00d" }));
    }

    /// token交換の失敗は502で詳細付き
    #[tokio::test]
    async fn test_token_exchange_failure_is_bad_gateway() {
        let (base, _mock) = start_gateway(MockUpstream::new().with_token_failure(401)).await;

        let response = reqwest::Client::new()
            .get(format!("{base}/contents/a.txt"))
            .header("X-Api-Key", KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 502);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["details"]["message"], "Bad credentials");
    }
}
