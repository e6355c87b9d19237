use crate::core::{GatewayError, Result};
use crate::topology::{Cluster, ExecutionUser, Host, kill_query_statement};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, error};

/// Sends termination commands to backend nodes
#[async_trait]
pub trait QueryKiller: Send + Sync {
    /// Executes `statement` on `host` as `user`
    async fn kill(&self, host: &Host, user: &ExecutionUser, statement: &str) -> Result<()>;
}

/// Posts the statement to the node's HTTP interface
pub struct HttpQueryKiller {
    client: reqwest::Client,
}

impl HttpQueryKiller {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueryKiller for HttpQueryKiller {
    async fn kill(&self, host: &Host, user: &ExecutionUser, statement: &str) -> Result<()> {
        let response = self
            .client
            .post(host.addr().as_str())
            .basic_auth(user.name(), Some(user.password()))
            .body(statement.to_string())
            .send()
            .await
            .map_err(|e| GatewayError::Transport {
                host: host.label(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Transport {
            host: host.label(),
            message: format!("unexpected status {}: {}", status, body.trim()),
        })
    }
}

/// Asks every node of the cluster to abort queries matching `condition`
/// that have been running for at least `elapsed`
///
/// Nodes are contacted concurrently. A failure on one node is logged and
/// does not affect the others.
pub async fn kill_queries(
    killer: &dyn QueryKiller,
    cluster: &Cluster,
    user: &ExecutionUser,
    condition: &str,
    elapsed: Duration,
) {
    let statement = kill_query_statement(condition, elapsed);
    let addrs: Vec<String> = cluster.hosts().iter().map(|h| h.label()).collect();
    debug!(
        statement = %statement,
        hosts = ?addrs,
        "execution time exceeded, killing queries"
    );

    let attempts = cluster
        .hosts()
        .iter()
        .map(|host| killer.kill(host, user, &statement));
    for (host, result) in cluster.hosts().iter().zip(join_all(attempts).await) {
        if let Err(err) = result {
            error!(
                host = %host.label(),
                condition = %condition,
                elapsed = ?elapsed,
                error = %err,
                "error while killing queries"
            );
        }
    }
}
