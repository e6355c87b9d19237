use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Concurrency and execution-time limits shared by both kinds of user,
/// plus the live count of queries running under the identity.
#[derive(Debug)]
pub struct UserLimits {
    max_concurrent_queries: u32,
    max_execution_time: Duration,
    running_queries: Mutex<u32>,
}

impl UserLimits {
    pub fn new(max_concurrent_queries: u32, max_execution_time: Duration) -> Self {
        Self {
            max_concurrent_queries,
            max_execution_time,
            running_queries: Mutex::new(0),
        }
    }

    pub fn max_concurrent_queries(&self) -> u32 {
        self.max_concurrent_queries
    }

    pub fn max_execution_time(&self) -> Duration {
        self.max_execution_time
    }

    pub fn running_queries(&self) -> u32 {
        *self.lock()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, u32> {
        // The counter is a plain integer, a poisoned guard still holds a valid value.
        self.running_queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Backend credential owned by a cluster
#[derive(Debug)]
pub struct ExecutionUser {
    name: String,
    password: String,
    limits: UserLimits,
}

impl ExecutionUser {
    pub fn new(name: &str, password: &str, limits: UserLimits) -> Self {
        Self {
            name: name.to_string(),
            password: password.to_string(),
            limits,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn limits(&self) -> &UserLimits {
        &self.limits
    }
}

/// Client-facing identity mapped onto one execution user of one cluster
#[derive(Debug)]
pub struct InitialUser {
    name: String,
    password: String,
    limits: UserLimits,
    to_cluster: String,
    to_user: String,
}

impl InitialUser {
    pub fn new(
        name: &str,
        password: &str,
        limits: UserLimits,
        to_cluster: &str,
        to_user: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            password: password.to_string(),
            limits,
            to_cluster: to_cluster.to_string(),
            to_user: to_user.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks the password presented by a client
    pub fn password_matches(&self, password: &str) -> bool {
        self.password == password
    }

    pub fn limits(&self) -> &UserLimits {
        &self.limits
    }

    pub fn to_cluster(&self) -> &str {
        &self.to_cluster
    }

    pub fn to_user(&self) -> &str {
        &self.to_user
    }
}
