use reqwest::Url;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One backend node
///
/// Tracks the number of queries currently proxied to it so the load
/// balancer can pick the least busy node of a cluster.
pub struct Host {
    addr: Url,
    running_queries: AtomicUsize,
}

impl Host {
    pub fn new(addr: Url) -> Self {
        Self {
            addr,
            running_queries: AtomicUsize::new(0),
        }
    }

    /// Scheme and address of the node
    pub fn addr(&self) -> &Url {
        &self.addr
    }

    /// `host:port` of the node, used as the metrics label
    pub fn label(&self) -> String {
        match (self.addr.host_str(), self.addr.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => self.addr.to_string(),
        }
    }

    pub fn running_queries(&self) -> usize {
        self.running_queries.load(Ordering::SeqCst)
    }

    pub(crate) fn inc(&self) {
        self.running_queries.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dec(&self) {
        let _ = self
            .running_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("addr", &self.addr.as_str())
            .field("running_queries", &self.running_queries())
            .finish()
    }
}
