//! # テスト用の上流モック
//!
//! token交換・Contents API・ブランチ参照を状態付きで模倣するaxumサーバー。
//! すべての呼び出しを記録し、テストから検証できるようにする。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::client::{UpstreamClient, DEFAULT_TIMEOUT};
use crate::contents::{ContentsClient, RepoRef};
use crate::token::{AppCredentials, Principal, TokenCache};

/// 記録された上流呼び出し。
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    /// エスケープされたままのパス
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl RecordedCall {
    /// Contents APIへの呼び出しかどうか。
    pub fn is_contents(&self) -> bool {
        self.path.contains("/contents")
    }
}

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    sha: String,
}

struct MockState {
    files: BTreeMap<String, MockFile>,
    heads: HashMap<String, String>,
    calls: Vec<RecordedCall>,
    token_ttl_secs: i64,
    token_delay_ms: u64,
    token_failure: Option<u16>,
    get_failures: HashMap<String, u16>,
    delete_failures: HashMap<String, u16>,
    exchanges: u64,
    next_sha: u64,
}

impl MockState {
    fn new_sha(&mut self) -> String {
        self.next_sha += 1;
        format!("sha{:04}", self.next_sha)
    }
}

/// 上流APIのインメモリモック。
#[derive(Clone)]
pub struct MockUpstream {
    inner: Arc<Mutex<MockState>>,
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpstream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                files: BTreeMap::new(),
                heads: HashMap::new(),
                calls: Vec::new(),
                token_ttl_secs: 3600,
                token_delay_ms: 0,
                token_failure: None,
                get_failures: HashMap::new(),
                delete_failures: HashMap::new(),
                exchanges: 0,
                next_sha: 0,
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().unwrap()
    }

    /// 発行するtokenの残り有効期間（秒）
    pub fn with_token_ttl(self, secs: i64) -> Self {
        self.state().token_ttl_secs = secs;
        self
    }

    /// token交換の応答を遅らせる
    pub fn with_token_delay_ms(self, ms: u64) -> Self {
        self.state().token_delay_ms = ms;
        self
    }

    /// token交換を指定ステータスで失敗させる
    pub fn with_token_failure(self, status: u16) -> Self {
        self.state().token_failure = Some(status);
        self
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        {
            let mut state = self.state();
            let sha = state.new_sha();
            state.files.insert(
                path.to_string(),
                MockFile {
                    content: content.to_vec(),
                    sha,
                },
            );
        }
        self
    }

    pub fn with_file_sha(self, path: &str, content: &[u8], sha: &str) -> Self {
        self.state().files.insert(
            path.to_string(),
            MockFile {
                content: content.to_vec(),
                sha: sha.to_string(),
            },
        );
        self
    }

    pub fn with_head(self, branch: &str, sha: &str) -> Self {
        self.state()
            .heads
            .insert(branch.to_string(), sha.to_string());
        self
    }

    /// 指定パスのGETを失敗させる
    pub fn fail_get(self, path: &str, status: u16) -> Self {
        self.state().get_failures.insert(path.to_string(), status);
        self
    }

    /// 指定パスのDELETEを失敗させる
    pub fn fail_delete(self, path: &str, status: u16) -> Self {
        self.state()
            .delete_failures
            .insert(path.to_string(), status);
        self
    }

    /// 記録された全呼び出し
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// 指定メソッドのContents API呼び出し
    pub fn contents_calls(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.is_contents() && c.method == method)
            .collect()
    }

    pub fn token_exchanges(&self) -> u64 {
        self.state().exchanges
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).map(|f| f.content.clone())
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/app/installations/{id}/access_tokens", post(handle_token))
            .route("/repos/{owner}/{repo}/git/refs/heads/{*branch}", get(handle_ref))
            .route("/repos/{owner}/{repo}/contents", any(handle_contents_root))
            .route("/repos/{owner}/{repo}/contents/{*path}", any(handle_contents))
            .with_state(self)
    }

    /// 127.0.0.1の空きポートで起動し、ベースURLを返す。
    pub async fn start(self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn record(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: &Bytes) {
        let call = RecordedCall {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            authorization: headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_slice(body).ok(),
        };
        self.state().calls.push(call);
    }
}

fn reply(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

fn has_token_auth(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("token "))
}

fn encode_for_listing(content: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(content);
    let mut out = String::new();
    for chunk in encoded.as_bytes().chunks(60) {
        out.push_str(std::str::from_utf8(chunk).unwrap());
        out.push('\n');
    }
    out
}

fn file_entry(path: &str, file: &MockFile, with_content: bool) -> Value {
    let name = path.rsplit('/').next().unwrap_or(path);
    let mut entry = json!({
        "name": name,
        "path": path,
        "sha": file.sha,
        "size": file.content.len(),
        "type": "file",
    });
    if with_content {
        entry["content"] = json!(encode_for_listing(&file.content));
        entry["encoding"] = json!("base64");
    }
    entry
}

async fn handle_token(
    State(mock): State<MockUpstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record(&method, &uri, &headers, &body);

    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "));
    if !bearer {
        return reply(401, json!({ "message": "A JSON web token could not be decoded" }));
    }

    let (n, ttl, delay, failure) = {
        let mut state = mock.state();
        state.exchanges += 1;
        (
            state.exchanges,
            state.token_ttl_secs,
            state.token_delay_ms,
            state.token_failure,
        )
    };
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
    if let Some(status) = failure {
        return reply(status, json!({ "message": "Bad credentials" }));
    }

    let expires_at = (Utc::now() + Duration::seconds(ttl)).to_rfc3339_opts(SecondsFormat::Secs, true);
    reply(
        201,
        json!({ "token": format!("ghs_test_{n}"), "expires_at": expires_at }),
    )
}

async fn handle_ref(
    State(mock): State<MockUpstream>,
    Path((_owner, _repo, branch)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record(&method, &uri, &headers, &body);
    if !has_token_auth(&headers) {
        return reply(401, json!({ "message": "Requires authentication" }));
    }
    match mock.state().heads.get(&branch) {
        Some(sha) => reply(
            200,
            json!({
                "ref": format!("refs/heads/{branch}"),
                "object": { "sha": sha, "type": "commit" },
            }),
        ),
        None => reply(404, json!({ "message": "Not Found" })),
    }
}

async fn handle_contents_root(
    State(mock): State<MockUpstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    contents(mock, String::new(), method, uri, headers, body)
}

async fn handle_contents(
    State(mock): State<MockUpstream>,
    Path((_owner, _repo, path)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    contents(mock, path, method, uri, headers, body)
}

fn contents(
    mock: MockUpstream,
    path: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record(&method, &uri, &headers, &body);
    if !has_token_auth(&headers) {
        return reply(401, json!({ "message": "Requires authentication" }));
    }
    let path = path.trim_matches('/').to_string();
    let json: Option<Value> = serde_json::from_slice(&body).ok();
    let mut state = mock.state();

    match method {
        Method::GET => {
            if let Some(status) = state.get_failures.get(&path) {
                return reply(*status, json!({ "message": "Server Error" }));
            }
            if let Some(file) = state.files.get(&path) {
                return reply(200, file_entry(&path, file, true));
            }
            list_directory(&state, &path)
        }
        Method::PUT => {
            let Some(json) = json else {
                return reply(400, json!({ "message": "Problems parsing JSON" }));
            };
            let message = json["message"].as_str().unwrap_or_default().to_string();
            let Some(content) = json["content"].as_str() else {
                return reply(422, json!({ "message": "content wasn't supplied." }));
            };
            let content: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(content) else {
                return reply(422, json!({ "message": "content is not valid Base64" }));
            };

            let given_sha = json["sha"].as_str();
            let created = match (state.files.get(&path), given_sha) {
                (Some(_), None) => {
                    return reply(
                        422,
                        json!({ "message": "Invalid request.\n\n\"sha\" wasn't supplied." }),
                    )
                }
                (Some(existing), Some(sha)) if existing.sha != sha => {
                    return reply(409, json!({ "message": format!("{path} does not match {sha}") }))
                }
                (existing, _) => existing.is_none(),
            };

            let sha = state.new_sha();
            let file = MockFile {
                content: decoded,
                sha,
            };
            let entry = file_entry(&path, &file, false);
            state.files.insert(path.clone(), file);
            let commit = state.new_sha();
            reply(
                if created { 201 } else { 200 },
                json!({ "content": entry, "commit": { "sha": commit, "message": message } }),
            )
        }
        Method::DELETE => {
            if let Some(status) = state.delete_failures.get(&path) {
                return reply(*status, json!({ "message": "Server Error" }));
            }
            let Some(existing) = state.files.get(&path) else {
                return reply(404, json!({ "message": "Not Found" }));
            };
            let given_sha = json.as_ref().and_then(|j| j["sha"].as_str());
            match given_sha {
                None => {
                    return reply(
                        422,
                        json!({ "message": "Invalid request.\n\n\"sha\" wasn't supplied." }),
                    )
                }
                Some(sha) if sha != existing.sha => {
                    return reply(409, json!({ "message": format!("{path} does not match {sha}") }))
                }
                Some(_) => {}
            }
            state.files.remove(&path);
            let message = json
                .as_ref()
                .and_then(|j| j["message"].as_str())
                .unwrap_or_default()
                .to_string();
            let commit = state.new_sha();
            reply(
                200,
                json!({ "content": null, "commit": { "sha": commit, "message": message } }),
            )
        }
        _ => reply(405, json!({ "message": "Method Not Allowed" })),
    }
}

fn list_directory(state: &MockState, path: &str) -> Response {
    let prefix = if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    };

    let mut entries = Vec::new();
    let mut dirs = BTreeSet::new();
    for (key, file) in state.files.iter() {
        let Some(rest) = key.strip_prefix(&prefix) else {
            continue;
        };
        match rest.split_once('/') {
            Some((dir, _)) => {
                dirs.insert(dir.to_string());
            }
            None => entries.push(file_entry(key, file, false)),
        }
    }
    for dir in dirs {
        entries.push(json!({
            "name": dir,
            "path": format!("{prefix}{dir}"),
            "sha": "tree",
            "type": "dir",
        }));
    }

    if entries.is_empty() && !path.is_empty() {
        return reply(404, json!({ "message": "Not Found" }));
    }
    reply(200, Value::Array(entries))
}

/// テスト用のApp認証情報（App ID 12345、Installation ID 67890）
pub fn test_credentials() -> AppCredentials {
    AppCredentials {
        app_id: "12345".to_string(),
        installation_id: "67890".to_string(),
        signer: repobridge_crypto::AssertionSigner::from_pem(
            repobridge_crypto::testutil::TEST_RSA_PKCS1_PEM,
        )
        .unwrap(),
    }
}

/// テスト用のリポジトリ（octo/site@main）
pub fn test_repo() -> RepoRef {
    RepoRef {
        owner: "octo".to_string(),
        name: "site".to_string(),
        branch: "main".to_string(),
    }
}

/// モックのベースURLに向けたtokenキャッシュ
pub fn token_cache(base: &str) -> Arc<TokenCache> {
    let upstream = UpstreamClient::new(base, DEFAULT_TIMEOUT).unwrap();
    Arc::new(TokenCache::new(
        Principal::Primary,
        test_credentials(),
        upstream,
    ))
}

/// モックのベースURLに向けたContentsクライアント
pub fn contents_client(base: &str) -> ContentsClient {
    let upstream = UpstreamClient::new(base, DEFAULT_TIMEOUT).unwrap();
    ContentsClient::new(upstream, token_cache(base), test_repo())
}
