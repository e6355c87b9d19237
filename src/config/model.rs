use serde::Deserialize;
use std::time::Duration;

pub(crate) const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9090";
pub(crate) const DEFAULT_MAX_EXECUTION_TIME_MS: u64 = 120_000;

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_max_concurrent_queries() -> u32 {
    u32::MAX
}

fn default_max_execution_time_ms() -> u64 {
    DEFAULT_MAX_EXECUTION_TIME_MS
}

/// Gateway configuration
///
/// Describes the backend clusters with their execution users and the
/// client-facing initial users mapped onto them.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Address the gateway listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Enables debug logging when set
    #[serde(default)]
    pub log_debug: bool,

    /// Backend clusters
    pub clusters: Vec<ClusterConfig>,

    /// Client-facing users
    pub users: Vec<InitialUserConfig>,
}

/// One backend cluster
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    pub name: String,

    /// URL scheme used to reach the nodes, `http` or `https`
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// `host:port` of every node
    pub nodes: Vec<String>,

    /// Backend credentials valid for this cluster
    pub users: Vec<ExecutionUserConfig>,
}

/// Backend credential with its own limits
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExecutionUserConfig {
    pub name: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: u32,

    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,
}

impl ExecutionUserConfig {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }
}

/// Client-facing user mapped onto a cluster's execution user
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InitialUserConfig {
    pub name: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: u32,

    #[serde(default = "default_max_execution_time_ms")]
    pub max_execution_time_ms: u64,

    /// Name of the target cluster
    pub to_cluster: String,

    /// Name of the execution user within the target cluster
    pub to_user: String,
}

impl InitialUserConfig {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }
}
