//! Scope resolution, admission and dispatch of proxied requests

pub mod credentials;
pub mod killer;
pub mod scope;
pub mod transport;

pub use credentials::Credentials;
pub use killer::{HttpQueryKiller, QueryKiller, kill_queries};
pub use scope::{Scope, ScopeGuard, USER_AGENT_PREFIX};
pub use transport::{BackendRequest, BackendResponse, ObservableTransport};

use crate::config::Config;
use crate::core::{GatewayError, Identity, Result};
use crate::logging::LogHandle;
use crate::metrics::MetricsSink;
use crate::topology::{Topology, quote};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tracing::{debug, info};

enum Outcome {
    Completed(std::result::Result<Result<BackendResponse>, JoinError>),
    TimedOut(Identity),
}

/// Reverse proxy in front of the configured clusters
///
/// Holds the active [`Topology`] generation behind a lock that is only
/// taken to look things up or to swap in a new generation.
pub struct ReverseProxy {
    topology: RwLock<Arc<Topology>>,
    transport: Arc<ObservableTransport>,
    killer: Arc<dyn QueryKiller>,
    metrics: Arc<dyn MetricsSink>,
    log_handle: Option<LogHandle>,
}

impl ReverseProxy {
    /// Creates a proxy serving the given configuration
    pub fn new(config: &Config, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let topology = Topology::build(config)?;
        let transport = ObservableTransport::new(Arc::clone(&metrics))?;
        let killer = Arc::new(HttpQueryKiller::new(transport.client().clone()));

        Ok(Self {
            topology: RwLock::new(Arc::new(topology)),
            transport: Arc::new(transport),
            killer,
            metrics,
            log_handle: None,
        })
    }

    /// Replaces the component that sends termination commands
    pub fn with_killer(mut self, killer: Arc<dyn QueryKiller>) -> Self {
        self.killer = killer;
        self
    }

    /// Lets configuration applies toggle debug logging
    pub fn with_log_handle(mut self, handle: LogHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    /// Returns the active topology generation
    pub async fn topology(&self) -> Arc<Topology> {
        Arc::clone(&*self.topology.read().await)
    }

    /// Applies a configuration
    ///
    /// The new generation is built completely before it replaces the
    /// current one. On error the current generation stays in effect.
    pub async fn apply_config(&self, config: &Config) -> Result<()> {
        let topology = Arc::new(Topology::build(config)?);

        *self.topology.write().await = topology;

        if let Some(handle) = &self.log_handle {
            handle.set_debug(config.log_debug);
        }
        info!(
            clusters = config.clusters.len(),
            users = config.users.len(),
            "configuration applied"
        );
        Ok(())
    }

    /// Loads a configuration file and applies it
    pub async fn reload_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let config = Config::load_file(path)?;
        self.apply_config(&config).await
    }

    /// Resolves credentials into a scope bound to the least loaded node
    pub async fn get_request_scope(&self, credentials: &Credentials) -> Result<Scope> {
        let topology = self.topology.read().await;

        let initial_user = topology
            .initial_user(&credentials.user)
            .filter(|u| u.password_matches(&credentials.password))
            .ok_or_else(|| GatewayError::Unauthorized(credentials.user.clone()))?;

        let cluster = topology.cluster(initial_user.to_cluster()).ok_or_else(|| {
            GatewayError::ConfigIntegrity(format!(
                "user {:?} matches to unknown cluster {:?}",
                initial_user.name(),
                initial_user.to_cluster()
            ))
        })?;

        let execution_user = cluster.user(initial_user.to_user()).ok_or_else(|| {
            GatewayError::ConfigIntegrity(format!(
                "user {:?} matches to unknown user {:?} at cluster {:?}",
                initial_user.name(),
                initial_user.to_user(),
                initial_user.to_cluster()
            ))
        })?;

        // Topology::build rejects clusters without nodes.
        let host = cluster.get_host().ok_or_else(|| {
            GatewayError::ConfigIntegrity(format!("cluster {:?} has no hosts", cluster.name()))
        })?;

        Ok(Scope::new(
            Arc::clone(initial_user),
            Arc::clone(execution_user),
            Arc::clone(cluster),
            host,
        ))
    }

    /// Proxies one request
    ///
    /// The backend call races both execution-time limits. When a limit
    /// wins, the call is aborted, every node of the cluster is asked to
    /// kill the matching queries and a timeout error is returned.
    ///
    /// Admission, the race and the kill run on their own task, so a client
    /// that goes away neither frees its slots early nor escapes the limits.
    pub async fn serve(
        &self,
        credentials: &Credentials,
        request: BackendRequest,
    ) -> Result<BackendResponse> {
        debug!(
            user = %credentials.user,
            path = %request.path_and_query,
            "accepting request"
        );

        let scope = self.get_request_scope(credentials).await?;
        debug!(scope = %scope, "request scope");

        let host = scope.host().label();
        let dispatch = Dispatch {
            scope,
            transport: Arc::clone(&self.transport),
            killer: Arc::clone(&self.killer),
            metrics: Arc::clone(&self.metrics),
        };

        tokio::spawn(dispatch.run(request))
            .await
            .unwrap_or_else(|err| {
                Err(GatewayError::Transport {
                    host,
                    message: format!("dispatch task failed: {}", err),
                })
            })
    }
}

/// A resolved request on its way to a node
struct Dispatch {
    scope: Scope,
    transport: Arc<ObservableTransport>,
    killer: Arc<dyn QueryKiller>,
    metrics: Arc<dyn MetricsSink>,
}

impl Dispatch {
    async fn run(self, mut request: BackendRequest) -> Result<BackendResponse> {
        let scope = &self.scope;
        let guard = scope.acquire()?;
        let labels = scope.labels();
        self.metrics.request_sum(&labels);

        let user_agent = scope.user_agent();
        transport::set_user_agent(&mut request.headers, &user_agent)?;

        let transport = Arc::clone(&self.transport);
        let host = Arc::clone(scope.host());
        let execution_user = Arc::clone(scope.execution_user());
        let mut call = tokio::spawn(async move {
            transport.round_trip(&host, &execution_user, request).await
        });

        let outcome = tokio::select! {
            biased;
            joined = &mut call => Outcome::Completed(joined),
            _ = tokio::time::sleep(scope.max_execution_time(Identity::InitialUser)) => {
                Outcome::TimedOut(Identity::InitialUser)
            }
            _ = tokio::time::sleep(scope.max_execution_time(Identity::ExecutionUser)) => {
                Outcome::TimedOut(Identity::ExecutionUser)
            }
        };

        let result = match outcome {
            Outcome::Completed(Ok(Ok(response))) => {
                self.metrics.request_success(&labels);
                Ok(response)
            }
            Outcome::Completed(Ok(Err(err))) => Err(err),
            Outcome::Completed(Err(err)) => Err(GatewayError::Transport {
                host: labels.host.clone(),
                message: format!("backend task failed: {}", err),
            }),
            Outcome::TimedOut(identity) => {
                call.abort();
                self.metrics.timeout(&labels);
                self.spawn_kill_queries(identity, &user_agent);
                Err(GatewayError::Timeout {
                    identity,
                    name: match identity {
                        Identity::InitialUser => scope.initial_user().name().to_string(),
                        Identity::ExecutionUser => scope.execution_user().name().to_string(),
                    },
                    limit: scope.max_execution_time(identity),
                })
            }
        };

        drop(guard);
        debug!(scope = %scope, "request scope proxied");
        result
    }

    fn spawn_kill_queries(&self, identity: Identity, user_agent: &str) {
        let scope = &self.scope;
        let condition = match identity {
            Identity::InitialUser => format!("http_user_agent = {}", quote(user_agent)),
            Identity::ExecutionUser => {
                format!("initial_user = {}", quote(scope.execution_user().name()))
            }
        };
        let elapsed = scope.max_execution_time(identity);
        let killer = Arc::clone(&self.killer);
        let cluster = Arc::clone(scope.cluster());
        let execution_user = Arc::clone(scope.execution_user());

        tokio::spawn(async move {
            kill_queries(
                killer.as_ref(),
                &cluster,
                &execution_user,
                &condition,
                elapsed,
            )
            .await;
        });
    }
}

impl std::fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseProxy").finish_non_exhaustive()
    }
}
