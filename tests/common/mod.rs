//! Fake ClickHouse nodes and request helpers shared by the gateway tests

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Request, StatusCode, Uri};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chgate::{
    AppState, ClusterConfig, Config, ExecutionUserConfig, InitialUserConfig, ProxyMetrics,
    ReverseProxy, build_router,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// Request observed by a fake node
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub uri: String,
    pub user_agent: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Clone)]
struct NodeState {
    delay: Duration,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    kills: Arc<Mutex<Vec<String>>>,
}

/// In-process stand-in for a ClickHouse HTTP interface
///
/// Answers `KILL QUERY` statements immediately and every other request
/// after `delay`.
pub struct FakeNode {
    pub addr: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    kills: Arc<Mutex<Vec<String>>>,
}

impl FakeNode {
    pub async fn spawn(delay: Duration) -> Self {
        let state = NodeState {
            delay,
            seen: Arc::new(Mutex::new(Vec::new())),
            kills: Arc::new(Mutex::new(Vec::new())),
        };
        let seen = Arc::clone(&state.seen);
        let kills = Arc::clone(&state.kills);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake node");
        let addr = listener.local_addr().expect("local addr").to_string();
        let app = Router::new().fallback(handle).with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake node serve");
        });

        Self { addr, seen, kills }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn kills(&self) -> Vec<String> {
        self.kills.lock().unwrap().clone()
    }

    /// Waits until the node has received `count` proxied requests
    pub async fn wait_for_requests(&self, count: usize) {
        for _ in 0..200 {
            if self.seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("node {} did not receive {} requests", self.addr, count);
    }

    /// Waits until the node has received at least one termination command
    pub async fn wait_for_kill(&self) -> String {
        for _ in 0..200 {
            if let Some(statement) = self.kills.lock().unwrap().first() {
                return statement.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("node {} did not receive a KILL QUERY", self.addr);
    }
}

async fn handle(
    State(state): State<NodeState>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    if body.starts_with("KILL QUERY") {
        state.kills.lock().unwrap().push(body);
        return (StatusCode::OK, "Ok.\n".to_string());
    }

    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.seen.lock().unwrap().push(SeenRequest {
        uri: uri.to_string(),
        user_agent: header(USER_AGENT),
        authorization: header(AUTHORIZATION),
        body: body.clone(),
    });

    tokio::time::sleep(state.delay).await;
    (StatusCode::OK, format!("result for {}\n", uri))
}

/// Address of a local port with nothing listening on it
pub async fn closed_addr() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    drop(listener);
    addr
}

pub fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// One cluster `main` with execution user `default`/`backend-pw` and one
/// initial user `web`/`secret` mapped onto it
pub fn config(nodes: &[&str], web: InitialUserConfig, default: ExecutionUserConfig) -> Config {
    Config::new()
        .cluster(ClusterConfig::new("main", nodes).user(default))
        .user(web)
}

pub fn web_user() -> InitialUserConfig {
    InitialUserConfig::new("web", "secret", "main", "default")
}

pub fn default_user() -> ExecutionUserConfig {
    ExecutionUserConfig::new("default", "backend-pw")
}

pub struct Gateway {
    pub proxy: Arc<ReverseProxy>,
    pub metrics: Arc<ProxyMetrics>,
    pub router: Router,
}

impl Gateway {
    pub fn new(config: &Config) -> Self {
        let metrics = Arc::new(ProxyMetrics::new());
        let proxy = Arc::new(ReverseProxy::new(config, metrics.clone()).expect("proxy"));
        let router = build_router(AppState::new(Arc::clone(&proxy), Arc::clone(&metrics)));
        Self {
            proxy,
            metrics,
            router,
        }
    }

    /// Sends a query as `user` and returns status and body
    pub async fn query(&self, user: &str, password: &str, sql: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri("/?database=system")
            .header(AUTHORIZATION, basic_auth(user, password))
            .body(Body::from(sql.to_string()))
            .expect("request should build");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("response expected");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        (status, String::from_utf8_lossy(&body).into_owned())
    }
}
