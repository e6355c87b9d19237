mod model;

pub use model::{ClusterConfig, Config, ExecutionUserConfig, InitialUserConfig};

use crate::core::{GatewayError, Result};
use std::collections::HashSet;
use std::path::Path;

impl Config {
    /// Create an empty configuration listening on the default address
    pub fn new() -> Self {
        Self {
            listen_addr: model::DEFAULT_LISTEN_ADDR.to_string(),
            log_debug: false,
            clusters: Vec::new(),
            users: Vec::new(),
        }
    }

    /// Add a cluster
    pub fn cluster(mut self, cluster: ClusterConfig) -> Self {
        self.clusters.push(cluster);
        self
    }

    /// Add an initial user
    pub fn user(mut self, user: InitialUserConfig) -> Self {
        self.users.push(user);
        self
    }

    /// Set the listen address
    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.listen_addr = addr.to_string();
        self
    }

    /// Toggle debug logging
    pub fn log_debug(mut self, enabled: bool) -> Self {
        self.log_debug = enabled;
        self
    }

    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read, parse and validate a configuration file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("can't read config {:?}: {}", path, e))
        })?;
        let config = Self::from_json(&text).map_err(|e| {
            GatewayError::Config(format!("can't parse config {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// Rejects empty or duplicate names, clusters without nodes or users,
    /// unsupported schemes and initial users whose target cluster or
    /// execution user does not exist.
    pub fn validate(&self) -> Result<()> {
        if self.clusters.is_empty() {
            return Err(invalid("at least one cluster must be configured"));
        }
        if self.users.is_empty() {
            return Err(invalid("at least one user must be configured"));
        }

        let mut cluster_names = HashSet::new();
        for cluster in &self.clusters {
            cluster.validate()?;
            if !cluster_names.insert(cluster.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate cluster name {:?}",
                    cluster.name
                )));
            }
        }

        let mut user_names = HashSet::new();
        for user in &self.users {
            if user.name.is_empty() {
                return Err(invalid("user name cannot be empty"));
            }
            if !user_names.insert(user.name.as_str()) {
                return Err(invalid(format!("duplicate user name {:?}", user.name)));
            }

            let cluster = self
                .clusters
                .iter()
                .find(|c| c.name == user.to_cluster)
                .ok_or_else(|| {
                    invalid(format!(
                        "error while mapping user {:?} to cluster {:?}: no such cluster",
                        user.name, user.to_cluster
                    ))
                })?;

            if !cluster.users.iter().any(|u| u.name == user.to_user) {
                return Err(invalid(format!(
                    "error while mapping user {:?} to cluster's {:?} user {:?}: no such user",
                    user.name, user.to_cluster, user.to_user
                )));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterConfig {
    pub fn new(name: &str, nodes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            scheme: "http".to_string(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            users: Vec::new(),
        }
    }

    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn user(mut self, user: ExecutionUserConfig) -> Self {
        self.users.push(user);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("cluster name cannot be empty"));
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err(invalid(format!(
                "cluster {:?}: scheme must be http or https, got {:?}",
                self.name, self.scheme
            )));
        }
        if self.nodes.is_empty() {
            return Err(invalid(format!(
                "cluster {:?}: at least one node must be configured",
                self.name
            )));
        }
        if self.nodes.iter().any(|n| n.trim().is_empty()) {
            return Err(invalid(format!(
                "cluster {:?}: node address cannot be empty",
                self.name
            )));
        }
        if self.users.is_empty() {
            return Err(invalid(format!(
                "cluster {:?}: at least one user must be configured",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for user in &self.users {
            if user.name.is_empty() {
                return Err(invalid(format!(
                    "cluster {:?}: user name cannot be empty",
                    self.name
                )));
            }
            if !names.insert(user.name.as_str()) {
                return Err(invalid(format!(
                    "cluster {:?}: duplicate user name {:?}",
                    self.name, user.name
                )));
            }
        }

        Ok(())
    }
}

impl ExecutionUserConfig {
    pub fn new(name: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            password: password.to_string(),
            max_concurrent_queries: u32::MAX,
            max_execution_time_ms: model::DEFAULT_MAX_EXECUTION_TIME_MS,
        }
    }

    pub fn max_concurrent_queries(mut self, max: u32) -> Self {
        self.max_concurrent_queries = max;
        self
    }

    pub fn max_execution_time_ms(mut self, ms: u64) -> Self {
        self.max_execution_time_ms = ms;
        self
    }
}

impl InitialUserConfig {
    pub fn new(name: &str, password: &str, to_cluster: &str, to_user: &str) -> Self {
        Self {
            name: name.to_string(),
            password: password.to_string(),
            max_concurrent_queries: u32::MAX,
            max_execution_time_ms: model::DEFAULT_MAX_EXECUTION_TIME_MS,
            to_cluster: to_cluster.to_string(),
            to_user: to_user.to_string(),
        }
    }

    pub fn max_concurrent_queries(mut self, max: u32) -> Self {
        self.max_concurrent_queries = max;
        self
    }

    pub fn max_execution_time_ms(mut self, ms: u64) -> Self {
        self.max_execution_time_ms = ms;
        self
    }
}

fn invalid(message: impl Into<String>) -> GatewayError {
    GatewayError::Config(message.into())
}
