use crate::core::{GatewayError, Identity, Result};
use crate::metrics::RequestLabels;
use crate::topology::{Cluster, ExecutionUser, Host, InitialUser};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Prefix of the `User-Agent` stamped on proxied requests
pub const USER_AGENT_PREFIX: &str = "ClickHouseProxy: ";

/// Per-request binding of initial user, execution user, cluster and node
///
/// Holds references into the topology generation that was active when the
/// request was resolved, so a reload never changes a scope mid-flight.
pub struct Scope {
    initial_user: Arc<InitialUser>,
    execution_user: Arc<ExecutionUser>,
    cluster: Arc<Cluster>,
    host: Arc<Host>,
    admitted: AtomicBool,
}

impl Scope {
    pub fn new(
        initial_user: Arc<InitialUser>,
        execution_user: Arc<ExecutionUser>,
        cluster: Arc<Cluster>,
        host: Arc<Host>,
    ) -> Self {
        Self {
            initial_user,
            execution_user,
            cluster,
            host,
            admitted: AtomicBool::new(false),
        }
    }

    pub fn initial_user(&self) -> &Arc<InitialUser> {
        &self.initial_user
    }

    pub fn execution_user(&self) -> &Arc<ExecutionUser> {
        &self.execution_user
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Tag the backend can match running queries against
    pub fn user_agent(&self) -> String {
        format!("{}{}", USER_AGENT_PREFIX, self.initial_user.name())
    }

    pub fn labels(&self) -> RequestLabels {
        RequestLabels::new(
            self.initial_user.name(),
            self.execution_user.name(),
            &self.host.label(),
        )
    }

    /// Execution-time limit of the given side of the scope
    pub fn max_execution_time(&self, identity: Identity) -> Duration {
        match identity {
            Identity::InitialUser => self.initial_user.limits().max_execution_time(),
            Identity::ExecutionUser => self.execution_user.limits().max_execution_time(),
        }
    }

    /// Reserves one slot for the initial user, the execution user and the node
    ///
    /// Either all three counters move or none does. Calling it again on an
    /// admitted scope is a no-op.
    pub fn inc(&self) -> Result<()> {
        if self.admitted.load(Ordering::SeqCst) {
            return Ok(());
        }

        let iu_limits = self.initial_user.limits();
        let eu_limits = self.execution_user.limits();

        let mut iu_running = iu_limits.lock();
        let mut eu_running = eu_limits.lock();

        if *iu_running >= iu_limits.max_concurrent_queries() {
            return Err(GatewayError::AdmissionRejected {
                identity: Identity::InitialUser,
                name: self.initial_user.name().to_string(),
                limit: iu_limits.max_concurrent_queries(),
            });
        }
        if *eu_running >= eu_limits.max_concurrent_queries() {
            return Err(GatewayError::AdmissionRejected {
                identity: Identity::ExecutionUser,
                name: self.execution_user.name().to_string(),
                limit: eu_limits.max_concurrent_queries(),
            });
        }

        *iu_running += 1;
        *eu_running += 1;
        self.host.inc();
        self.admitted.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Releases the slots taken by [`Scope::inc`]
    ///
    /// Only the first call after a successful `inc` has an effect.
    pub fn dec(&self) {
        if !self.admitted.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let mut iu_running = self.initial_user.limits().lock();
            let mut eu_running = self.execution_user.limits().lock();
            *iu_running = iu_running.saturating_sub(1);
            *eu_running = eu_running.saturating_sub(1);
        }
        self.host.dec();
    }

    /// Admits the scope and returns a guard that releases it on drop
    pub fn acquire(&self) -> Result<ScopeGuard<'_>> {
        self.inc()?;
        Ok(ScopeGuard { scope: self })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ Host {:?}; InitialUser {:?}; ExecutionUser {:?} ]",
            self.host.label(),
            self.initial_user.name(),
            self.execution_user.name()
        )
    }
}

/// RAII guard for an admitted scope
///
/// Releases the reserved slots when dropped, on every exit path.
pub struct ScopeGuard<'a> {
    scope: &'a Scope,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::UserLimits;
    use reqwest::Url;
    use std::collections::HashMap;

    struct Fixture {
        initial_user: Arc<InitialUser>,
        execution_user: Arc<ExecutionUser>,
        cluster: Arc<Cluster>,
        host: Arc<Host>,
    }

    impl Fixture {
        fn new(iu_max: u32, eu_max: u32) -> Self {
            let execution_user = Arc::new(ExecutionUser::new(
                "default",
                "",
                UserLimits::new(eu_max, Duration::from_secs(10)),
            ));
            let initial_user = Arc::new(InitialUser::new(
                "web",
                "secret",
                UserLimits::new(iu_max, Duration::from_secs(1)),
                "main",
                "default",
            ));
            let host = Arc::new(Host::new(Url::parse("http://node:8123").unwrap()));
            let mut users = HashMap::new();
            users.insert("default".to_string(), Arc::clone(&execution_user));
            let cluster = Arc::new(Cluster::new("main", vec![Arc::clone(&host)], users));
            Self {
                initial_user,
                execution_user,
                cluster,
                host,
            }
        }

        fn scope(&self) -> Scope {
            Scope::new(
                Arc::clone(&self.initial_user),
                Arc::clone(&self.execution_user),
                Arc::clone(&self.cluster),
                Arc::clone(&self.host),
            )
        }

        fn counters(&self) -> (u32, u32, usize) {
            (
                self.initial_user.limits().running_queries(),
                self.execution_user.limits().running_queries(),
                self.host.running_queries(),
            )
        }
    }

    #[test]
    fn test_inc_dec_moves_all_counters() {
        let fixture = Fixture::new(2, 5);
        let scope = fixture.scope();

        scope.inc().unwrap();
        assert_eq!(fixture.counters(), (1, 1, 1));

        scope.dec();
        assert_eq!(fixture.counters(), (0, 0, 0));
    }

    #[test]
    fn test_initial_user_limit_rejects_next_request() {
        let fixture = Fixture::new(2, 5);
        let first = fixture.scope();
        let second = fixture.scope();
        let third = fixture.scope();

        first.inc().unwrap();
        second.inc().unwrap();
        let err = third.inc().unwrap_err();
        match err {
            GatewayError::AdmissionRejected { identity, limit, .. } => {
                assert_eq!(identity, Identity::InitialUser);
                assert_eq!(limit, 2);
            }
            other => panic!("expected admission rejection, got {other:?}"),
        }
        assert_eq!(fixture.counters(), (2, 2, 2));

        first.dec();
        third.inc().unwrap();
        assert_eq!(fixture.counters(), (2, 2, 2));
    }

    #[test]
    fn test_execution_user_limit_leaves_counters_untouched() {
        let fixture = Fixture::new(10, 1);
        let first = fixture.scope();
        let second = fixture.scope();

        first.inc().unwrap();
        let err = second.inc().unwrap_err();
        assert!(err.to_string().contains("execution user \"default\""));
        assert_eq!(fixture.counters(), (1, 1, 1));
    }

    #[test]
    fn test_initial_users_share_execution_user_pool() {
        let fixture = Fixture::new(5, 2);
        let api = Arc::new(InitialUser::new(
            "api",
            "token",
            UserLimits::new(5, Duration::from_secs(1)),
            "main",
            "default",
        ));
        let api_scope = || {
            Scope::new(
                Arc::clone(&api),
                Arc::clone(&fixture.execution_user),
                Arc::clone(&fixture.cluster),
                Arc::clone(&fixture.host),
            )
        };

        let web_first = fixture.scope();
        let api_first = api_scope();
        web_first.inc().unwrap();
        api_first.inc().unwrap();
        assert_eq!(fixture.counters(), (1, 2, 2));
        assert_eq!(api.limits().running_queries(), 1);

        for rejected in [fixture.scope(), api_scope()] {
            match rejected.inc().unwrap_err() {
                GatewayError::AdmissionRejected {
                    identity,
                    name,
                    limit,
                } => {
                    assert_eq!(identity, Identity::ExecutionUser);
                    assert_eq!(name, "default");
                    assert_eq!(limit, 2);
                }
                other => panic!("expected admission rejection, got {other:?}"),
            }
        }
        assert_eq!(fixture.counters(), (1, 2, 2));
        assert_eq!(api.limits().running_queries(), 1);

        api_first.dec();
        let web_second = fixture.scope();
        web_second.inc().unwrap();
        assert_eq!(fixture.counters(), (2, 2, 2));
        assert_eq!(api.limits().running_queries(), 0);
    }

    #[test]
    fn test_dec_after_failed_inc_is_noop() {
        let fixture = Fixture::new(1, 5);
        let admitted = fixture.scope();
        let rejected = fixture.scope();

        admitted.inc().unwrap();
        assert!(rejected.inc().is_err());
        rejected.dec();
        assert_eq!(fixture.counters(), (1, 1, 1));

        admitted.dec();
        admitted.dec();
        assert_eq!(fixture.counters(), (0, 0, 0));
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let fixture = Fixture::new(0, 5);
        assert!(fixture.scope().inc().is_err());
        assert_eq!(fixture.counters(), (0, 0, 0));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let fixture = Fixture::new(1, 1);
        let scope = fixture.scope();
        {
            let _guard = scope.acquire().unwrap();
            assert_eq!(fixture.counters(), (1, 1, 1));
            assert!(fixture.scope().acquire().is_err());
        }
        assert_eq!(fixture.counters(), (0, 0, 0));
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_limit() {
        let fixture = Arc::new(Fixture::new(3, 100));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let fixture = Arc::clone(&fixture);
                std::thread::spawn(move || {
                    let mut admitted = 0;
                    for _ in 0..200 {
                        let scope = fixture.scope();
                        if let Ok(_guard) = scope.acquire() {
                            admitted += 1;
                            assert!(fixture.initial_user.limits().running_queries() <= 3);
                        }
                    }
                    admitted
                })
            })
            .collect();

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total > 0);
        assert_eq!(fixture.counters(), (0, 0, 0));
    }

    #[test]
    fn test_user_agent_and_display() {
        let fixture = Fixture::new(1, 1);
        let scope = fixture.scope();
        assert_eq!(scope.user_agent(), "ClickHouseProxy: web");
        assert_eq!(
            scope.to_string(),
            "[ Host \"node:8123\"; InitialUser \"web\"; ExecutionUser \"default\" ]"
        );
    }
}
