//! In-memory model of clusters, nodes and users
//!
//! A [`Topology`] is one immutable generation built from a validated
//! [`Config`]. Reloads build a fresh generation and swap it in whole.

mod cluster;
mod host;
mod user;

pub use cluster::{Cluster, kill_query_statement, quote};
pub use host::Host;
pub use user::{ExecutionUser, InitialUser, UserLimits};

use crate::config::Config;
use crate::core::{GatewayError, Result};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Topology {
    users: HashMap<String, Arc<InitialUser>>,
    clusters: HashMap<String, Arc<Cluster>>,
}

impl Topology {
    /// Builds a complete generation from the configuration
    ///
    /// Fails without side effects if the configuration is invalid or if
    /// an initial user points at a cluster or execution user that does
    /// not exist.
    pub fn build(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut clusters = HashMap::with_capacity(config.clusters.len());
        for c in &config.clusters {
            let mut hosts = Vec::with_capacity(c.nodes.len());
            for node in &c.nodes {
                let addr = Url::parse(&format!("{}://{}", c.scheme, node)).map_err(|e| {
                    GatewayError::Config(format!(
                        "cluster {:?}: invalid node address {:?}: {}",
                        c.name, node, e
                    ))
                })?;
                hosts.push(Arc::new(Host::new(addr)));
            }

            let users = c
                .users
                .iter()
                .map(|u| {
                    let limits =
                        UserLimits::new(u.max_concurrent_queries, u.max_execution_time());
                    (
                        u.name.clone(),
                        Arc::new(ExecutionUser::new(&u.name, &u.password, limits)),
                    )
                })
                .collect();

            clusters.insert(c.name.clone(), Arc::new(Cluster::new(&c.name, hosts, users)));
        }

        let mut users = HashMap::with_capacity(config.users.len());
        for u in &config.users {
            let cluster = clusters.get(&u.to_cluster).ok_or_else(|| {
                GatewayError::Config(format!(
                    "error while mapping user {:?} to cluster {:?}: no such cluster",
                    u.name, u.to_cluster
                ))
            })?;
            if cluster.user(&u.to_user).is_none() {
                return Err(GatewayError::Config(format!(
                    "error while mapping user {:?} to cluster's {:?} user {:?}: no such user",
                    u.name, u.to_cluster, u.to_user
                )));
            }

            let limits = UserLimits::new(u.max_concurrent_queries, u.max_execution_time());
            users.insert(
                u.name.clone(),
                Arc::new(InitialUser::new(
                    &u.name,
                    &u.password,
                    limits,
                    &u.to_cluster,
                    &u.to_user,
                )),
            );
        }

        Ok(Self { users, clusters })
    }

    pub fn initial_user(&self, name: &str) -> Option<&Arc<InitialUser>> {
        self.users.get(name)
    }

    pub fn cluster(&self, name: &str) -> Option<&Arc<Cluster>> {
        self.clusters.get(name)
    }

    pub fn initial_users(&self) -> impl Iterator<Item = &Arc<InitialUser>> {
        self.users.values()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Arc<Cluster>> {
        self.clusters.values()
    }
}
