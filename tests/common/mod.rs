//! In-process Distribution v2 registry for integration tests
//!
//! Implements just enough of the protocol for the client: ping, blob upload
//! sessions (POST, PATCH, PUT ?digest=), blob HEAD/GET with `Range`, manifest
//! GET/PUT and an optional bearer token service at `/token`.

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image_layer::{AuthConfig, ClientOptions, Logger};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SERVICE: &str = "mock-registry";

#[derive(Default)]
pub struct RegistryState {
    pub blobs: HashMap<String, Vec<u8>>,
    pub uploads: HashMap<String, Vec<u8>>,
    /// (repository, reference) -> (content type, body)
    pub manifests: HashMap<(String, String), (String, Vec<u8>)>,
    /// Credentials the token service accepts; `None` means no auth at all
    pub credentials: Option<(String, String)>,
    /// token -> scope it was issued for
    pub issued: HashMap<String, String>,
    /// Every scope requested from the token service
    pub token_scopes: Vec<String>,
    /// `METHOD path` for every registry request
    pub requests: Vec<String>,
    /// Status `/v2/` answers with, without any challenge
    pub ping_status: Option<StatusCode>,
    /// Digest reported on commit instead of the computed one
    pub commit_digest: Option<String>,
    /// Store committed blobs one byte short
    pub truncate_commits: bool,
}

type Shared = Arc<Mutex<RegistryState>>;

pub struct MockRegistry {
    pub addr: SocketAddr,
    pub state: Shared,
    handle: JoinHandle<()>,
}

impl MockRegistry {
    /// Anonymous registry
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Registry guarded by a bearer token service that accepts `username`/`password`
    pub async fn start_with_auth(username: &str, password: &str) -> Self {
        Self::spawn(Some((username.to_string(), password.to_string()))).await
    }

    async fn spawn(credentials: Option<(String, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state: Shared = Arc::new(Mutex::new(RegistryState {
            credentials,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/v2/", get(ping))
            .route("/token", get(token))
            .fallback(registry)
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, handle }
    }

    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// `host/<repository_and_tag>`
    pub fn reference(&self, repository_and_tag: &str) -> String {
        format!("{}/{}", self.host(), repository_and_tag)
    }

    pub fn realm(&self) -> String {
        format!("http://{}/token", self.host())
    }

    pub fn token_scopes(&self) -> Vec<String> {
        self.state.lock().unwrap().token_scopes.clone()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn blob_count(&self) -> usize {
        self.state.lock().unwrap().blobs.len()
    }

    pub fn blob(&self, digest: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().blobs.get(digest).cloned()
    }

    pub fn manifest(&self, repository: &str, reference: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(&(repository.to_string(), reference.to_string()))
            .map(|(_, body)| body.clone())
    }

    /// Answer `/v2/` with `status` and no challenge
    pub fn fail_ping(&self, status: StatusCode) {
        self.state.lock().unwrap().ping_status = Some(status);
    }

    /// Report `digest` in `Docker-Content-Digest` on every commit
    pub fn report_commit_digest(&self, digest: &str) {
        self.state.lock().unwrap().commit_digest = Some(digest.to_string());
    }

    /// Drop the last byte of every committed blob
    pub fn truncate_commits(&self) {
        self.state.lock().unwrap().truncate_commits = true;
    }

    /// Store a blob directly, returning its digest
    pub fn insert_blob(&self, data: &[u8]) -> String {
        let digest = sha256_digest(data);
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(digest.clone(), data.to_vec());
        digest
    }

    /// Store a raw manifest document under a tag
    pub fn insert_manifest(&self, repository: &str, reference: &str, body: &[u8]) {
        self.state.lock().unwrap().manifests.insert(
            (repository.to_string(), reference.to_string()),
            (
                "application/vnd.oci.image.manifest.v1+json".to_string(),
                body.to_vec(),
            ),
        );
    }
}

impl Drop for MockRegistry {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Client options for talking plain HTTP to a mock registry
pub fn insecure_options() -> ClientOptions {
    ClientOptions::new()
        .with_insecure(true)
        .with_logger(Logger::new_quiet())
}

pub fn insecure_options_with(auth: AuthConfig) -> ClientOptions {
    insecure_options().with_auth(auth)
}

pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "errors": [{ "code": code, "message": message }]
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn challenge(host: &str) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "Bearer realm=\"http://{}/token\",service=\"{}\"",
        host, SERVICE
    ))
    .unwrap()
}

fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn unauthorized(headers: &HeaderMap) -> Response {
    let mut response = error_response(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        "authentication required",
    );
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, challenge(&request_host(headers)));
    response
}

async fn ping(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = state.lock().unwrap();
    if let Some(status) = state.ping_status {
        return status.into_response();
    }
    if state.credentials.is_some() && bearer_scope(&state, &headers).is_none() {
        return unauthorized(&headers);
    }
    (
        StatusCode::OK,
        [("Docker-Distribution-API-Version", "registry/2.0")],
        "{}",
    )
        .into_response()
}

async fn token(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().unwrap();
    let scope = params.get("scope").cloned().unwrap_or_default();
    state.token_scopes.push(scope.clone());

    if params.get("service").map(String::as_str) != Some(SERVICE) {
        return error_response(StatusCode::BAD_REQUEST, "UNSUPPORTED", "unknown service");
    }

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Basic "))
        .and_then(|b| STANDARD.decode(b).ok())
        .and_then(|raw| String::from_utf8(raw).ok());
    let expected = state
        .credentials
        .as_ref()
        .map(|(user, pass)| format!("{}:{}", user, pass));
    if presented != expected {
        return error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "invalid credentials");
    }

    let token = uuid::Uuid::new_v4().to_string();
    state.issued.insert(token.clone(), scope);
    axum::Json(serde_json::json!({ "token": token })).into_response()
}

/// Scope of the bearer token presented, if it was issued here
fn bearer_scope(state: &RegistryState, headers: &HeaderMap) -> Option<String> {
    let token = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?;
    state.issued.get(token).cloned()
}

enum Route {
    StartUpload(String),
    Upload(String, String),
    Blob(String, String),
    Manifest(String, String),
}

fn route(path: &str) -> Option<Route> {
    let path = path.strip_prefix("/v2/")?;
    if let Some((name, id)) = path.split_once("/blobs/uploads/") {
        return Some(if id.is_empty() {
            Route::StartUpload(name.to_string())
        } else {
            Route::Upload(name.to_string(), id.to_string())
        });
    }
    if let Some((name, digest)) = path.split_once("/blobs/") {
        return Some(Route::Blob(name.to_string(), digest.to_string()));
    }
    if let Some((name, reference)) = path.split_once("/manifests/") {
        return Some(Route::Manifest(name.to_string(), reference.to_string()));
    }
    None
}

async fn registry(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    state.requests.push(format!("{} {}", method, uri.path()));

    let Some(route) = route(uri.path()) else {
        return error_response(StatusCode::NOT_FOUND, "NAME_UNKNOWN", "unknown endpoint");
    };

    if state.credentials.is_some() {
        let writes = !(method == Method::GET || method == Method::HEAD);
        let allowed = bearer_scope(&state, &headers).is_some_and(|scope| {
            let actions = scope.rsplit(':').next().unwrap_or_default();
            actions.split(',').any(|a| a == "push") || !writes
        });
        if !allowed {
            return unauthorized(&headers);
        }
    }

    match (route, method) {
        (Route::StartUpload(name), Method::POST) => {
            let id = uuid::Uuid::new_v4().to_string();
            state.uploads.insert(id.clone(), Vec::new());
            accepted_upload(&name, &id, 0)
        }
        (Route::Upload(name, id), Method::PATCH) => match state.uploads.get_mut(&id) {
            Some(data) => {
                data.extend_from_slice(&body);
                let len = data.len();
                accepted_upload(&name, &id, len)
            }
            None => error_response(StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN", "no such upload"),
        },
        (Route::Upload(name, id), Method::PUT) => {
            let Some(mut data) = state.uploads.remove(&id) else {
                return error_response(StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN", "no such upload");
            };
            data.extend_from_slice(&body);

            let expected = uri
                .query()
                .unwrap_or_default()
                .split('&')
                .find_map(|pair| pair.strip_prefix("digest="))
                .map(|d| d.replace("%3A", ":"))
                .unwrap_or_default();
            let actual = sha256_digest(&data);
            if expected != actual {
                return error_response(StatusCode::BAD_REQUEST, "DIGEST_INVALID", "digest mismatch");
            }

            if state.truncate_commits {
                data.pop();
            }
            let reported = state.commit_digest.clone().unwrap_or_else(|| actual.clone());
            state.blobs.insert(actual.clone(), data);
            (
                StatusCode::CREATED,
                [
                    (header::LOCATION.as_str(), format!("/v2/{}/blobs/{}", name, actual)),
                    ("Docker-Content-Digest", reported),
                ],
            )
                .into_response()
        }
        (Route::Blob(_, digest), Method::HEAD) => match state.blobs.get(&digest) {
            Some(data) => blob_response(StatusCode::OK, &digest, data.clone()),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        (Route::Blob(_, digest), Method::GET) => match state.blobs.get(&digest) {
            Some(data) => {
                let start = headers
                    .get(header::RANGE)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|h| h.strip_prefix("bytes="))
                    .and_then(|h| h.strip_suffix('-'))
                    .and_then(|h| h.parse::<usize>().ok());
                match start {
                    Some(start) if start <= data.len() => {
                        let mut response =
                            blob_response(StatusCode::PARTIAL_CONTENT, &digest, data[start..].to_vec());
                        let range = format!(
                            "bytes {}-{}/{}",
                            start,
                            data.len().saturating_sub(1),
                            data.len()
                        );
                        response
                            .headers_mut()
                            .insert(header::CONTENT_RANGE, HeaderValue::from_str(&range).unwrap());
                        response
                    }
                    Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
                    None => blob_response(StatusCode::OK, &digest, data.clone()),
                }
            }
            None => error_response(StatusCode::NOT_FOUND, "BLOB_UNKNOWN", "blob unknown to registry"),
        },
        (Route::Manifest(name, reference), Method::PUT) => {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let digest = sha256_digest(&body);
            state
                .manifests
                .insert((name.clone(), reference), (content_type, body.to_vec()));
            (
                StatusCode::CREATED,
                [
                    (header::LOCATION.as_str(), format!("/v2/{}/manifests/{}", name, digest)),
                    ("Docker-Content-Digest", digest),
                ],
            )
                .into_response()
        }
        (Route::Manifest(name, reference), Method::GET) => {
            match state.manifests.get(&(name, reference)) {
                Some((content_type, data)) => (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE.as_str(), content_type.clone()),
                        ("Docker-Content-Digest", sha256_digest(data)),
                    ],
                    data.clone(),
                )
                    .into_response(),
                None => error_response(StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN", "manifest unknown"),
            }
        }
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "UNSUPPORTED", "unsupported operation"),
    }
}

fn accepted_upload(name: &str, id: &str, received: usize) -> Response {
    (
        StatusCode::ACCEPTED,
        [
            (header::LOCATION.as_str(), format!("/v2/{}/blobs/uploads/{}", name, id)),
            (header::RANGE.as_str(), format!("0-{}", received.saturating_sub(1))),
            ("Docker-Upload-UUID", id.to_string()),
        ],
    )
        .into_response()
}

fn blob_response(status: StatusCode, digest: &str, data: Vec<u8>) -> Response {
    let len = data.len();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header("Docker-Content-Digest", digest)
        .body(Body::from(data))
        .unwrap()
}
