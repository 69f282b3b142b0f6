use anyhow::Result;
use lb_rename_core::{
    HealthMonitor, Listener, LoadBalancer, LoadBalancerApi, Pool, RenameOpts, UpdateOpts,
};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counts load balancer API calls by operation.
#[derive(Clone, Debug)]
pub struct ApiMetrics {
    requests: Family<ApiLabels, Counter>,
    failures: Family<ApiLabels, Counter>,
}

/// Counts what became of each load balancer considered for migration.
#[derive(Clone, Debug)]
pub struct CascadeMetrics {
    outcomes: Family<OutcomeLabels, Counter>,
    retries: Counter,
}

/// A [`LoadBalancerApi`] that records an [`ApiMetrics`] observation for
/// every call made through it.
#[derive(Clone, Debug)]
pub struct Instrumented<A> {
    inner: A,
    metrics: ApiMetrics,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Migrated,
    Current,
    Unmanaged,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ApiLabels {
    op: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: &'static str,
}

// === impl ApiMetrics ===

impl ApiMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::default();
        reg.register(
            "requests",
            "Total number of load balancer API requests",
            requests.clone(),
        );

        let failures = Family::default();
        reg.register(
            "failures",
            "Total number of load balancer API requests that failed",
            failures.clone(),
        );

        Self { requests, failures }
    }

    fn observe<T>(&self, op: &'static str, res: &Result<T>) {
        let labels = ApiLabels { op };
        self.requests.get_or_create(&labels).inc();
        if res.is_err() {
            self.failures.get_or_create(&labels).inc();
        }
    }
}

// === impl CascadeMetrics ===

impl CascadeMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let outcomes = Family::default();
        reg.register(
            "load_balancers",
            "Total number of load balancers considered, by outcome",
            outcomes.clone(),
        );

        let retries = Counter::default();
        reg.register(
            "retries",
            "Total number of cascades retried after an API failure",
            retries.clone(),
        );

        Self { outcomes, retries }
    }

    pub(crate) fn outcome(&self, outcome: Outcome) {
        let labels = OutcomeLabels {
            outcome: outcome.as_str(),
        };
        self.outcomes.get_or_create(&labels).inc();
    }

    pub(crate) fn retry(&self) {
        self.retries.inc();
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Migrated => "migrated",
            Self::Current => "current",
            Self::Unmanaged => "unmanaged",
            Self::Failed => "failed",
        }
    }
}

// === impl Instrumented ===

impl<A> Instrumented<A> {
    pub fn new(inner: A, metrics: ApiMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait::async_trait]
impl<A: LoadBalancerApi + Send + Sync> LoadBalancerApi for Instrumented<A> {
    async fn list_listeners(&self, lb_id: &str) -> Result<Vec<Listener>> {
        let res = self.inner.list_listeners(lb_id).await;
        self.metrics.observe("list_listeners", &res);
        res
    }

    async fn list_pools(&self, lb_id: &str, listener_id: &str) -> Result<Vec<Pool>> {
        let res = self.inner.list_pools(lb_id, listener_id).await;
        self.metrics.observe("list_pools", &res);
        res
    }

    async fn get_health_monitor(&self, monitor_id: &str) -> Result<HealthMonitor> {
        let res = self.inner.get_health_monitor(monitor_id).await;
        self.metrics.observe("get_health_monitor", &res);
        res
    }

    async fn update_health_monitor(
        &self,
        monitor_id: &str,
        opts: RenameOpts,
        lb_id: &str,
    ) -> Result<()> {
        let res = self
            .inner
            .update_health_monitor(monitor_id, opts, lb_id)
            .await;
        self.metrics.observe("update_health_monitor", &res);
        res
    }

    async fn update_pool(&self, lb_id: &str, pool_id: &str, opts: RenameOpts) -> Result<()> {
        let res = self.inner.update_pool(lb_id, pool_id, opts).await;
        self.metrics.observe("update_pool", &res);
        res
    }

    async fn update_listener(
        &self,
        lb_id: &str,
        listener_id: &str,
        opts: UpdateOpts,
    ) -> Result<()> {
        let res = self.inner.update_listener(lb_id, listener_id, opts).await;
        self.metrics.observe("update_listener", &res);
        res
    }

    async fn update_load_balancer(&self, lb_id: &str, opts: UpdateOpts) -> Result<LoadBalancer> {
        let res = self.inner.update_load_balancer(lb_id, opts).await;
        self.metrics.observe("update_load_balancer", &res);
        res
    }
}
