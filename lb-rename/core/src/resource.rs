/// A load balancer, the root of a resource tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
}

/// A protocol/port endpoint of a load balancer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listener {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
}

/// The backend members behind a listener.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pool {
    pub id: String,
    pub name: String,

    /// Set when a health monitor is attached to the pool.
    pub monitor_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthMonitor {
    pub id: String,
    pub name: String,
}

/// A partial update of a pool or health monitor. Unset fields are left as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenameOpts {
    pub name: Option<String>,
}

/// A partial update of a listener or load balancer. Unset fields are left
/// as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateOpts {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
}
