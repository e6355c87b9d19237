use super::{ExecutionUser, Host};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Named group of interchangeable nodes and the execution users valid for them
///
/// A cluster belongs to one topology generation and is never mutated after
/// construction; only the per-host and per-user counters change.
#[derive(Debug)]
pub struct Cluster {
    name: String,
    hosts: Vec<Arc<Host>>,
    users: HashMap<String, Arc<ExecutionUser>>,
}

impl Cluster {
    pub fn new(
        name: &str,
        hosts: Vec<Arc<Host>>,
        users: HashMap<String, Arc<ExecutionUser>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            hosts,
            users,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn user(&self, name: &str) -> Option<&Arc<ExecutionUser>> {
        self.users.get(name)
    }

    pub fn users(&self) -> impl Iterator<Item = &Arc<ExecutionUser>> {
        self.users.values()
    }

    /// Returns the node with the fewest running queries
    ///
    /// An idle node wins immediately. Ties go to the node listed first.
    /// Selection does not reserve anything, two concurrent callers may
    /// pick the same node.
    pub fn get_host(&self) -> Option<Arc<Host>> {
        let mut idle: Option<&Arc<Host>> = None;
        let mut idle_running = usize::MAX;
        for host in &self.hosts {
            let running = host.running_queries();
            if running == 0 {
                return Some(Arc::clone(host));
            }
            if idle.is_none() || running < idle_running {
                idle = Some(host);
                idle_running = running;
            }
        }

        idle.cloned()
    }
}

/// Statement asking a node to abort matching queries
///
/// `query_id` is not usable here: distributed processing does not pass
/// it to remote servers.
pub fn kill_query_statement(condition: &str, elapsed: Duration) -> String {
    format!(
        "KILL QUERY WHERE {} AND elapsed >= {}",
        condition,
        elapsed.as_secs()
    )
}

/// Quotes a value as a string literal
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}
