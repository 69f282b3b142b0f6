use crate::{
    api::LoadBalancerApi,
    resource::{HealthMonitor, Listener, LoadBalancer, Pool, RenameOpts, UpdateOpts},
};
use anyhow::{anyhow, bail, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// A serializable set of load balancer trees.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerNode>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub listeners: Vec<ListenerNode>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pools: Vec<PoolNode>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolNode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_monitor: Option<MonitorNode>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorNode {
    pub id: String,
    pub name: String,
}

/// An API call observed by [`InMemory`], with the ID of its subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    ListListeners(String),
    ListPools(String),
    GetHealthMonitor(String),
    UpdateHealthMonitor(String),
    UpdatePool(String),
    UpdateListener(String),
    UpdateLoadBalancer(String),
}

/// A [`LoadBalancerApi`] backed by a [`Snapshot`].
///
/// Every call is recorded in order, so the sequence of reads and updates a
/// cascade issued can be inspected afterwards.
#[derive(Debug, Default)]
pub struct InMemory {
    state: RwLock<Snapshot>,
    calls: Mutex<Vec<Call>>,
}

// === impl Call ===

impl Call {
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            Self::UpdateHealthMonitor(_)
                | Self::UpdatePool(_)
                | Self::UpdateListener(_)
                | Self::UpdateLoadBalancer(_)
        )
    }
}

// === impl InMemory ===

impl InMemory {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            calls: Mutex::default(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.state
            .read()
            .load_balancers
            .iter()
            .map(LoadBalancer::from)
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait::async_trait]
impl LoadBalancerApi for InMemory {
    async fn list_listeners(&self, lb_id: &str) -> Result<Vec<Listener>> {
        self.record(Call::ListListeners(lb_id.to_string()));
        let state = self.state.read();
        let lb = find_lb(&state, lb_id)?;
        Ok(lb.listeners.iter().map(Listener::from).collect())
    }

    async fn list_pools(&self, lb_id: &str, listener_id: &str) -> Result<Vec<Pool>> {
        self.record(Call::ListPools(listener_id.to_string()));
        let state = self.state.read();
        let listener = find_lb(&state, lb_id)?
            .listeners
            .iter()
            .find(|l| l.id == listener_id)
            .ok_or_else(|| anyhow!("listener {listener_id} not found"))?;
        Ok(listener.pools.iter().map(Pool::from).collect())
    }

    async fn get_health_monitor(&self, monitor_id: &str) -> Result<HealthMonitor> {
        self.record(Call::GetHealthMonitor(monitor_id.to_string()));
        let state = self.state.read();
        state
            .load_balancers
            .iter()
            .flat_map(|lb| &lb.listeners)
            .flat_map(|l| &l.pools)
            .filter_map(|p| p.health_monitor.as_ref())
            .find(|m| m.id == monitor_id)
            .map(HealthMonitor::from)
            .ok_or_else(|| anyhow!("health monitor {monitor_id} not found"))
    }

    async fn update_health_monitor(
        &self,
        monitor_id: &str,
        opts: RenameOpts,
        lb_id: &str,
    ) -> Result<()> {
        self.record(Call::UpdateHealthMonitor(monitor_id.to_string()));
        let mut state = self.state.write();
        let monitor = find_lb_mut(&mut state, lb_id)?
            .listeners
            .iter_mut()
            .flat_map(|l| &mut l.pools)
            .filter_map(|p| p.health_monitor.as_mut())
            .find(|m| m.id == monitor_id)
            .ok_or_else(|| anyhow!("health monitor {monitor_id} not found"))?;
        if let Some(name) = opts.name {
            monitor.name = name;
        }
        Ok(())
    }

    async fn update_pool(&self, lb_id: &str, pool_id: &str, opts: RenameOpts) -> Result<()> {
        self.record(Call::UpdatePool(pool_id.to_string()));
        let mut state = self.state.write();
        let pool = find_lb_mut(&mut state, lb_id)?
            .listeners
            .iter_mut()
            .flat_map(|l| &mut l.pools)
            .find(|p| p.id == pool_id)
            .ok_or_else(|| anyhow!("pool {pool_id} not found"))?;
        if let Some(name) = opts.name {
            pool.name = name;
        }
        Ok(())
    }

    async fn update_listener(
        &self,
        lb_id: &str,
        listener_id: &str,
        opts: UpdateOpts,
    ) -> Result<()> {
        self.record(Call::UpdateListener(listener_id.to_string()));
        let mut state = self.state.write();
        let listener = find_lb_mut(&mut state, lb_id)?
            .listeners
            .iter_mut()
            .find(|l| l.id == listener_id)
            .ok_or_else(|| anyhow!("listener {listener_id} not found"))?;
        if let Some(name) = opts.name {
            listener.name = name;
        }
        if let Some(tags) = opts.tags {
            listener.tags = tags;
        }
        Ok(())
    }

    async fn update_load_balancer(&self, lb_id: &str, opts: UpdateOpts) -> Result<LoadBalancer> {
        self.record(Call::UpdateLoadBalancer(lb_id.to_string()));
        let mut state = self.state.write();
        let lb = find_lb_mut(&mut state, lb_id)?;
        if let Some(name) = opts.name {
            lb.name = name;
        }
        if let Some(tags) = opts.tags {
            lb.tags = tags;
        }
        Ok(LoadBalancer::from(&*lb))
    }
}

fn find_lb<'s>(state: &'s Snapshot, lb_id: &str) -> Result<&'s LoadBalancerNode> {
    match state.load_balancers.iter().find(|lb| lb.id == lb_id) {
        Some(lb) => Ok(lb),
        None => bail!("load balancer {lb_id} not found"),
    }
}

fn find_lb_mut<'s>(state: &'s mut Snapshot, lb_id: &str) -> Result<&'s mut LoadBalancerNode> {
    match state.load_balancers.iter_mut().find(|lb| lb.id == lb_id) {
        Some(lb) => Ok(lb),
        None => bail!("load balancer {lb_id} not found"),
    }
}

// === conversions ===

impl From<&LoadBalancerNode> for LoadBalancer {
    fn from(node: &LoadBalancerNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            tags: node.tags.clone(),
        }
    }
}

impl From<&ListenerNode> for Listener {
    fn from(node: &ListenerNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            tags: node.tags.clone(),
        }
    }
}

impl From<&PoolNode> for Pool {
    fn from(node: &PoolNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            monitor_id: node.health_monitor.as_ref().map(|m| m.id.clone()),
        }
    }
}

impl From<&MonitorNode> for HealthMonitor {
    fn from(node: &MonitorNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
        }
    }
}
