use crate::metrics::{CascadeMetrics, Outcome};
use lb_rename_core::{Cascade, CancellationToken, Error, Kind, LoadBalancer, LoadBalancerApi};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

/// Controls how failed cascades are retried.
#[derive(Clone, Debug)]
pub struct Backoff {
    /// The number of times a cascade is attempted before it is abandoned.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

/// The number of load balancers that ended in each outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub migrated: usize,
    pub current: usize,
    pub unmanaged: usize,
    pub failed: usize,
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

// === impl Summary ===

impl Summary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Migrated => self.migrated += 1,
            Outcome::Current => self.current += 1,
            Outcome::Unmanaged => self.unmanaged += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// Migrates every load balancer whose name carries a stale cluster name.
///
/// Load balancers are handled one at a time. A load balancer that cannot be
/// migrated is logged and counted; the remaining ones are still attempted
/// unless the token is cancelled.
pub async fn migrate_all<A>(
    cascade: &Cascade<A>,
    lbs: Vec<LoadBalancer>,
    cluster: &str,
    backoff: &Backoff,
    cancel: &CancellationToken,
    metrics: &CascadeMetrics,
) -> Summary
where
    A: LoadBalancerApi + Send + Sync,
{
    let mut summary = Summary::default();
    for lb in lbs {
        let outcome = if !cascade.prefixes().is_managed(Kind::LoadBalancer, &lb.name) {
            debug!(lb.id = %lb.id, lb.name = %lb.name, "Ignoring unmanaged load balancer");
            Outcome::Unmanaged
        } else if !cascade.prefixes().has_stale_cluster(&lb.name, cluster) {
            debug!(lb.id = %lb.id, lb.name = %lb.name, "Load balancer is current");
            Outcome::Current
        } else {
            match migrate_with_retry(cascade, &lb, cluster, backoff, cancel, metrics).await {
                Ok(lb) if cascade.prefixes().has_stale_cluster(&lb.name, cluster) => {
                    error!(lb.id = %lb.id, lb.name = %lb.name, "Load balancer still carries a stale cluster name");
                    Outcome::Failed
                }
                Ok(lb) => {
                    info!(lb.id = %lb.id, lb.name = %lb.name, "Migrated load balancer");
                    Outcome::Migrated
                }
                Err(error) => {
                    error!(lb.id = %lb.id, %error, "Failed to migrate load balancer");
                    Outcome::Failed
                }
            }
        };
        metrics.outcome(outcome);
        summary.record(outcome);

        if cancel.is_cancelled() {
            warn!("Cancelled; remaining load balancers were not considered");
            break;
        }
    }
    summary
}

/// Runs a cascade until it succeeds, fails permanently, or runs out of
/// attempts.
///
/// Every attempt starts from the load balancer as originally observed; the
/// cascade skips whatever an earlier attempt already renamed.
pub async fn migrate_with_retry<A>(
    cascade: &Cascade<A>,
    lb: &LoadBalancer,
    cluster: &str,
    backoff: &Backoff,
    cancel: &CancellationToken,
    metrics: &CascadeMetrics,
) -> Result<LoadBalancer, Error>
where
    A: LoadBalancerApi + Send + Sync,
{
    let max_attempts = backoff.max_attempts.max(1);
    let mut delay = backoff.initial_delay;
    let mut attempt = 1;
    loop {
        let error = match cascade.migrate(lb.clone(), cluster, cancel).await {
            Ok(lb) => return Ok(lb),
            Err(error) => error,
        };
        if error.is_permanent() || attempt >= max_attempts {
            return Err(error);
        }

        warn!(lb.id = %lb.id, %error, attempt, ?delay, "Cascade failed; retrying");
        metrics.retry();
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
        delay = (delay * 2).min(backoff.max_delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use lb_rename_core::{
        memory::{InMemory, ListenerNode, LoadBalancerNode, PoolNode, Snapshot},
        HealthMonitor, Listener, Pool, Prefixes, RenameOpts, UpdateOpts,
    };
    use pretty_assertions::assert_eq;
    use prometheus_client::registry::Registry;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Fails the first `failures` updates, then forwards everything.
    struct Flaky<A> {
        inner: A,
        failures: AtomicUsize,
    }

    impl<A> Flaky<A> {
        fn fail(&self) -> anyhow::Result<()> {
            match self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            {
                Ok(_) => Err(anyhow!("service unavailable")),
                Err(_) => Ok(()),
            }
        }
    }

    #[async_trait::async_trait]
    impl<A: LoadBalancerApi + Send + Sync> LoadBalancerApi for Flaky<A> {
        async fn list_listeners(&self, lb_id: &str) -> anyhow::Result<Vec<Listener>> {
            self.inner.list_listeners(lb_id).await
        }

        async fn list_pools(&self, lb_id: &str, listener_id: &str) -> anyhow::Result<Vec<Pool>> {
            self.inner.list_pools(lb_id, listener_id).await
        }

        async fn get_health_monitor(&self, monitor_id: &str) -> anyhow::Result<HealthMonitor> {
            self.inner.get_health_monitor(monitor_id).await
        }

        async fn update_health_monitor(
            &self,
            monitor_id: &str,
            opts: RenameOpts,
            lb_id: &str,
        ) -> anyhow::Result<()> {
            self.fail()?;
            self.inner
                .update_health_monitor(monitor_id, opts, lb_id)
                .await
        }

        async fn update_pool(
            &self,
            lb_id: &str,
            pool_id: &str,
            opts: RenameOpts,
        ) -> anyhow::Result<()> {
            self.fail()?;
            self.inner.update_pool(lb_id, pool_id, opts).await
        }

        async fn update_listener(
            &self,
            lb_id: &str,
            listener_id: &str,
            opts: UpdateOpts,
        ) -> anyhow::Result<()> {
            self.fail()?;
            self.inner.update_listener(lb_id, listener_id, opts).await
        }

        async fn update_load_balancer(
            &self,
            lb_id: &str,
            opts: UpdateOpts,
        ) -> anyhow::Result<LoadBalancer> {
            self.fail()?;
            self.inner.update_load_balancer(lb_id, opts).await
        }
    }

    /// Accepts load balancer updates but drops the new name.
    struct KeepsName<A>(A);

    #[async_trait::async_trait]
    impl<A: LoadBalancerApi + Send + Sync> LoadBalancerApi for KeepsName<A> {
        async fn list_listeners(&self, lb_id: &str) -> anyhow::Result<Vec<Listener>> {
            self.0.list_listeners(lb_id).await
        }

        async fn list_pools(&self, lb_id: &str, listener_id: &str) -> anyhow::Result<Vec<Pool>> {
            self.0.list_pools(lb_id, listener_id).await
        }

        async fn get_health_monitor(&self, monitor_id: &str) -> anyhow::Result<HealthMonitor> {
            self.0.get_health_monitor(monitor_id).await
        }

        async fn update_health_monitor(
            &self,
            monitor_id: &str,
            opts: RenameOpts,
            lb_id: &str,
        ) -> anyhow::Result<()> {
            self.0.update_health_monitor(monitor_id, opts, lb_id).await
        }

        async fn update_pool(
            &self,
            lb_id: &str,
            pool_id: &str,
            opts: RenameOpts,
        ) -> anyhow::Result<()> {
            self.0.update_pool(lb_id, pool_id, opts).await
        }

        async fn update_listener(
            &self,
            lb_id: &str,
            listener_id: &str,
            opts: UpdateOpts,
        ) -> anyhow::Result<()> {
            self.0.update_listener(lb_id, listener_id, opts).await
        }

        async fn update_load_balancer(
            &self,
            lb_id: &str,
            opts: UpdateOpts,
        ) -> anyhow::Result<LoadBalancer> {
            let opts = UpdateOpts { name: None, ..opts };
            self.0.update_load_balancer(lb_id, opts).await
        }
    }

    fn backoff(max_attempts: u32) -> Backoff {
        Backoff {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn metrics() -> CascadeMetrics {
        CascadeMetrics::register(&mut <Registry>::default())
    }

    fn lb_node(id: &str, name: &str, listeners: Vec<ListenerNode>) -> LoadBalancerNode {
        LoadBalancerNode {
            id: id.to_string(),
            name: name.to_string(),
            tags: vec![],
            listeners,
        }
    }

    fn listener_node(id: &str, name: &str, pools: Vec<PoolNode>) -> ListenerNode {
        ListenerNode {
            id: id.to_string(),
            name: name.to_string(),
            tags: vec![],
            pools,
        }
    }

    fn pool_node(id: &str, name: &str) -> PoolNode {
        PoolNode {
            id: id.to_string(),
            name: name.to_string(),
            health_monitor: None,
        }
    }

    fn stale_tree() -> Snapshot {
        Snapshot {
            load_balancers: vec![lb_node(
                "lb-1",
                "kube_service_c1_ns_svc",
                vec![listener_node(
                    "listener-0",
                    "listener_0_kube_service_c1_ns_svc",
                    vec![pool_node("pool-0", "pool_0_kube_service_c1_ns_svc")],
                )],
            )],
        }
    }

    fn root_name(store: &InMemory) -> String {
        store.load_balancers().remove(0).name
    }

    #[tokio::test]
    async fn retries_until_converged() {
        let store = Arc::new(InMemory::new(stale_tree()));
        let flaky = Flaky {
            inner: store.clone(),
            failures: AtomicUsize::new(2),
        };
        let cascade = Cascade::new(flaky, Prefixes::default());
        let lb = store.load_balancers().remove(0);

        let migrated = migrate_with_retry(
            &cascade,
            &lb,
            "c2",
            &backoff(3),
            &CancellationToken::new(),
            &metrics(),
        )
        .await
        .unwrap();

        assert_eq!(migrated.name, "kube_service_c2_ns_svc");
        let snapshot = store.snapshot();
        let listener = &snapshot.load_balancers[0].listeners[0];
        assert_eq!(listener.name, "listener_0_kube_service_c2_ns_svc");
        assert_eq!(listener.pools[0].name, "pool_0_kube_service_c2_ns_svc");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = Arc::new(InMemory::new(stale_tree()));
        let flaky = Flaky {
            inner: store.clone(),
            failures: AtomicUsize::new(5),
        };
        let cascade = Cascade::new(flaky, Prefixes::default());
        let lb = store.load_balancers().remove(0);

        let error = migrate_with_retry(
            &cascade,
            &lb,
            "c2",
            &backoff(3),
            &CancellationToken::new(),
            &metrics(),
        )
        .await
        .unwrap_err();

        assert_eq!(error.to_string(), "service unavailable");
        assert_eq!(store.snapshot(), stale_tree());
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let mut tree = stale_tree();
        tree.load_balancers[0].listeners[0]
            .pools
            .push(pool_node("pool-1", "pool_1_kube_service_c1_ns_svc"));
        let store = Arc::new(InMemory::new(tree));
        let cascade = Cascade::new(store.clone(), Prefixes::default());
        let lb = store.load_balancers().remove(0);

        let error = migrate_with_retry(
            &cascade,
            &lb,
            "c2",
            &backoff(3),
            &CancellationToken::new(),
            &metrics(),
        )
        .await
        .unwrap_err();

        assert!(matches!(error, Error::MultiplePools { count: 2, .. }));
        let list_pools = store
            .calls()
            .iter()
            .filter(|c| matches!(c, lb_rename_core::memory::Call::ListPools(_)))
            .count();
        assert_eq!(list_pools, 1);
    }

    #[tokio::test]
    async fn summarizes_outcomes() {
        let mut tree = stale_tree();
        tree.load_balancers
            .push(lb_node("lb-2", "kube_service_c2_ns_other", vec![]));
        tree.load_balancers.push(lb_node("lb-3", "handmade", vec![]));
        tree.load_balancers.push(lb_node(
            "lb-4",
            "kube_service_c1_ns_broken",
            vec![listener_node(
                "listener-4",
                "listener_0_kube_service_c1_ns_broken",
                vec![
                    pool_node("pool-4a", "pool_0_kube_service_c1_ns_broken"),
                    pool_node("pool-4b", "pool_1_kube_service_c1_ns_broken"),
                ],
            )],
        ));
        let store = Arc::new(InMemory::new(tree));
        let cascade = Cascade::new(store.clone(), Prefixes::default());

        let summary = migrate_all(
            &cascade,
            store.load_balancers(),
            "c2",
            &backoff(2),
            &CancellationToken::new(),
            &metrics(),
        )
        .await;

        assert_eq!(
            summary,
            Summary {
                migrated: 1,
                current: 1,
                unmanaged: 1,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn counts_stale_result_as_failed() {
        let store = Arc::new(InMemory::new(stale_tree()));
        let cascade = Cascade::new(KeepsName(store.clone()), Prefixes::default());

        let summary = migrate_all(
            &cascade,
            store.load_balancers(),
            "c2",
            &backoff(1),
            &CancellationToken::new(),
            &metrics(),
        )
        .await;

        assert_eq!(
            summary,
            Summary {
                failed: 1,
                ..Default::default()
            }
        );
        assert_eq!(root_name(&store), "kube_service_c1_ns_svc");
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let store = Arc::new(InMemory::new(stale_tree()));
        let cascade = Cascade::new(store.clone(), Prefixes::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = migrate_all(
            &cascade,
            store.load_balancers(),
            "c2",
            &backoff(3),
            &cancel,
            &metrics(),
        )
        .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(store.snapshot(), stale_tree());
    }
}
