// ============================================================================
// chgate Library
// ============================================================================

pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod server;
pub mod topology;

// Re-export main types for convenience
pub use config::{ClusterConfig, Config, ExecutionUserConfig, InitialUserConfig};
pub use crate::core::{GatewayError, Identity, Result};
pub use metrics::{MetricsSink, ProxyMetrics, RequestLabels};
pub use proxy::{BackendRequest, BackendResponse, Credentials, QueryKiller, ReverseProxy, Scope};
pub use server::{AppState, build_router};
pub use topology::{Cluster, ExecutionUser, Host, InitialUser, Topology, UserLimits};
