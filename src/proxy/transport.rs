use crate::core::{GatewayError, Result};
use crate::metrics::MetricsSink;
use crate::topology::{ExecutionUser, Host};
use axum::body::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    HeaderName::from_static("keep-alive"),
];

/// Request as it will be forwarded to a backend node
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    /// Path plus optional query, e.g. `/?query=SELECT+1`
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendRequest {
    pub fn new(method: Method, path_and_query: &str) -> Self {
        Self {
            method,
            path_and_query: path_and_query.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Fully buffered backend response
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// HTTP client towards the cluster nodes that records status codes and
/// transport errors per node
pub struct ObservableTransport {
    client: reqwest::Client,
    metrics: Arc<dyn MetricsSink>,
}

impl ObservableTransport {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("can't build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, metrics))
    }

    pub fn with_client(client: reqwest::Client, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { client, metrics }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends the request to `host` as `user` and buffers the whole response
    pub async fn round_trip(
        &self,
        host: &Host,
        user: &ExecutionUser,
        request: BackendRequest,
    ) -> Result<BackendResponse> {
        let label = host.label();
        let url = format!(
            "{}{}",
            host.addr().as_str().trim_end_matches('/'),
            request.path_and_query
        );
        debug!(url = %url, method = %request.method, "forwarding request");

        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::AUTHORIZATION);
        headers.remove(header::CONTENT_LENGTH);

        let result = self
            .client
            .request(request.method, &url)
            .headers(headers)
            .basic_auth(user.name(), Some(user.password()))
            .body(request.body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => return Err(self.transport_error(&label, err)),
        };

        let status = response.status();
        self.metrics.status_code(&label, status.as_u16());

        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(&label, err))?;

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }

    fn transport_error(&self, label: &str, err: reqwest::Error) -> GatewayError {
        let message = err.to_string();
        self.metrics.error(label, &message);
        GatewayError::Transport {
            host: label.to_string(),
            message,
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Sets the `User-Agent` the termination command filters on
pub fn set_user_agent(headers: &mut HeaderMap, user_agent: &str) -> Result<()> {
    let value = HeaderValue::from_str(user_agent).map_err(|e| {
        GatewayError::Config(format!("invalid user agent {:?}: {}", user_agent, e))
    })?;
    headers.insert(header::USER_AGENT, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_set_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        set_user_agent(&mut headers, "ClickHouseProxy: web").unwrap();
        assert_eq!(headers[header::USER_AGENT], "ClickHouseProxy: web");

        assert!(set_user_agent(&mut headers, "bad\nagent").is_err());
    }
}
