use crate::resource::{HealthMonitor, Listener, LoadBalancer, Pool, RenameOpts, UpdateOpts};
use anyhow::Result;

/// Models the load balancer service a cascade reads from and renames through.
///
/// Calls scoped to a load balancer take its ID. Every update is a single
/// call; implementations must apply all of its fields together or not at all.
#[async_trait::async_trait]
pub trait LoadBalancerApi {
    async fn list_listeners(&self, lb_id: &str) -> Result<Vec<Listener>>;

    /// Lists every pool bound to the listener.
    async fn list_pools(&self, lb_id: &str, listener_id: &str) -> Result<Vec<Pool>>;

    async fn get_health_monitor(&self, monitor_id: &str) -> Result<HealthMonitor>;

    async fn update_health_monitor(
        &self,
        monitor_id: &str,
        opts: RenameOpts,
        lb_id: &str,
    ) -> Result<()>;

    async fn update_pool(&self, lb_id: &str, pool_id: &str, opts: RenameOpts) -> Result<()>;

    async fn update_listener(&self, lb_id: &str, listener_id: &str, opts: UpdateOpts)
        -> Result<()>;

    async fn update_load_balancer(&self, lb_id: &str, opts: UpdateOpts) -> Result<LoadBalancer>;
}

#[async_trait::async_trait]
impl<A: LoadBalancerApi + Send + Sync + ?Sized> LoadBalancerApi for std::sync::Arc<A> {
    async fn list_listeners(&self, lb_id: &str) -> Result<Vec<Listener>> {
        (**self).list_listeners(lb_id).await
    }

    async fn list_pools(&self, lb_id: &str, listener_id: &str) -> Result<Vec<Pool>> {
        (**self).list_pools(lb_id, listener_id).await
    }

    async fn get_health_monitor(&self, monitor_id: &str) -> Result<HealthMonitor> {
        (**self).get_health_monitor(monitor_id).await
    }

    async fn update_health_monitor(
        &self,
        monitor_id: &str,
        opts: RenameOpts,
        lb_id: &str,
    ) -> Result<()> {
        (**self).update_health_monitor(monitor_id, opts, lb_id).await
    }

    async fn update_pool(&self, lb_id: &str, pool_id: &str, opts: RenameOpts) -> Result<()> {
        (**self).update_pool(lb_id, pool_id, opts).await
    }

    async fn update_listener(
        &self,
        lb_id: &str,
        listener_id: &str,
        opts: UpdateOpts,
    ) -> Result<()> {
        (**self).update_listener(lb_id, listener_id, opts).await
    }

    async fn update_load_balancer(&self, lb_id: &str, opts: UpdateOpts) -> Result<LoadBalancer> {
        (**self).update_load_balancer(lb_id, opts).await
    }
}
