use crate::{
    api::LoadBalancerApi,
    name::{rewrite, Kind, Prefixes, StructuredName},
    resource::{Listener, LoadBalancer, RenameOpts, UpdateOpts},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Migrates load balancer trees to a new cluster identity.
///
/// Children are renamed bottom-up (health monitor, pool, listener) and the
/// load balancer is renamed last. Its name is the only progress marker: an
/// interrupted cascade is resumed by calling [`Cascade::migrate`] again with
/// the same load balancer, which finds the already-renamed children current
/// and skips them.
#[derive(Clone, Debug)]
pub struct Cascade<A> {
    api: A,
    prefixes: Prefixes,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A call to the load balancer API failed. The cascade stops at the
    /// first failure and leaves whatever it already renamed in place.
    #[error(transparent)]
    Api(#[from] anyhow::Error),

    #[error("listener {listener} has {count} pools; expected at most one")]
    MultiplePools { listener: String, count: usize },

    /// A managed name decodes, but rewriting it does not yield a name that
    /// decodes to the new cluster. Nothing above the resource is renamed.
    #[error("{kind} {id} cannot be renamed: {name:?} does not rewrite cleanly")]
    Rewrite {
        kind: Kind,
        id: String,
        name: String,
    },

    #[error("cascade cancelled")]
    Cancelled,
}

/// A value the cascade may rewrite: a resource name of some kind, or a tag.
#[derive(Copy, Clone, Debug)]
enum Value {
    Name(Kind),
    Tag,
}

// === impl Error ===

impl Error {
    /// Returns true if calling `migrate` again cannot succeed without some
    /// outside change.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::MultiplePools { .. } | Self::Rewrite { .. } | Self::Cancelled
        )
    }
}

// === impl Cascade ===

impl<A> Cascade<A> {
    pub fn new(api: A, prefixes: Prefixes) -> Self {
        Self { api, prefixes }
    }

    pub fn prefixes(&self) -> &Prefixes {
        &self.prefixes
    }
}

impl<A: LoadBalancerApi + Send + Sync> Cascade<A> {
    /// Renames the load balancer and every managed resource beneath it to
    /// `cluster`, returning the load balancer as last persisted.
    ///
    /// Unmanaged load balancers are returned unchanged. The token is checked
    /// before every API call so that cancellation never lands inside a single
    /// update.
    #[instrument(skip(self, lb, cancel), fields(lb.id = %lb.id))]
    pub async fn migrate(
        &self,
        lb: LoadBalancer,
        cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<LoadBalancer, Error> {
        if !self.prefixes.is_managed(Kind::LoadBalancer, &lb.name) {
            debug!(lb.name = %lb.name, "Skipping unmanaged load balancer");
            return Ok(lb);
        }

        let name = self.rename(Kind::LoadBalancer, &lb.id, &lb.name, cluster)?;

        ready(cancel)?;
        for listener in self.api.list_listeners(&lb.id).await? {
            self.migrate_listener(&lb.id, listener, cluster, cancel)
                .await?;
        }

        let tags = self.retag(&lb.tags, cluster);
        if name.is_none() && tags.is_none() {
            debug!(lb.name = %lb.name, "Load balancer is current");
            return Ok(lb);
        }

        ready(cancel)?;
        let LoadBalancer {
            id,
            name: old_name,
            tags: old_tags,
        } = lb;
        let opts = UpdateOpts {
            name: Some(name.unwrap_or_else(|| old_name.clone())),
            tags: Some(tags.unwrap_or(old_tags)),
        };
        let lb = self.api.update_load_balancer(&id, opts).await?;
        info!(from = %old_name, to = %lb.name, "Renamed load balancer");
        Ok(lb)
    }

    async fn migrate_listener(
        &self,
        lb_id: &str,
        listener: Listener,
        cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if !self.prefixes.is_managed(Kind::Listener, &listener.name) {
            debug!(listener.id = %listener.id, listener.name = %listener.name, "Skipping unmanaged listener");
            return Ok(());
        }

        // An undecodable name may hide a stale identity, so only a listener
        // known to be current is skipped. Its name is then left as is.
        let name = match self.decode(Value::Name(Kind::Listener), &listener.name) {
            Some(current) if current.cluster == cluster => {
                debug!(listener.id = %listener.id, "Listener is current");
                return Ok(());
            }
            Some(_) => self.rename(Kind::Listener, &listener.id, &listener.name, cluster)?,
            None => {
                debug!(listener.id = %listener.id, listener.name = %listener.name, "Listener name is not decodable");
                None
            }
        };

        self.migrate_pool(lb_id, &listener.id, cluster, cancel)
            .await?;

        // The name and tags are written together so the listener is never
        // observed half-migrated.
        let tags = self.retag(&listener.tags, cluster);
        if name.is_none() && tags.is_none() {
            return Ok(());
        }

        ready(cancel)?;
        let Listener {
            id,
            name: old_name,
            tags: old_tags,
        } = listener;
        let new_name = name.unwrap_or_else(|| old_name.clone());
        let opts = UpdateOpts {
            name: Some(new_name.clone()),
            tags: Some(tags.unwrap_or(old_tags)),
        };
        self.api.update_listener(lb_id, &id, opts).await?;
        info!(listener.id = %id, from = %old_name, to = %new_name, "Renamed listener");
        Ok(())
    }

    /// Renames the listener's pool and its health monitor, monitor first.
    async fn migrate_pool(
        &self,
        lb_id: &str,
        listener_id: &str,
        cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        ready(cancel)?;
        let mut pools = self.api.list_pools(lb_id, listener_id).await?;
        if pools.len() > 1 {
            return Err(Error::MultiplePools {
                listener: listener_id.to_string(),
                count: pools.len(),
            });
        }
        let Some(pool) = pools.pop() else {
            debug!(listener.id = %listener_id, "Listener has no pool");
            return Ok(());
        };

        if self.decode(Value::Name(Kind::Pool), &pool.name).is_none() {
            debug!(pool.id = %pool.id, pool.name = %pool.name, "Skipping unmanaged pool");
            return Ok(());
        }
        let pool_name = self.rename(Kind::Pool, &pool.id, &pool.name, cluster)?;

        // The monitor is checked on its own, even when the pool is current.
        if let Some(monitor_id) = pool.monitor_id.as_deref() {
            ready(cancel)?;
            let monitor = self.api.get_health_monitor(monitor_id).await?;
            if let Some(name) = self.rename(Kind::Monitor, &monitor.id, &monitor.name, cluster)? {
                ready(cancel)?;
                let opts = RenameOpts {
                    name: Some(name.clone()),
                };
                self.api
                    .update_health_monitor(&monitor.id, opts, lb_id)
                    .await?;
                info!(monitor.id = %monitor.id, from = %monitor.name, to = %name, "Renamed health monitor");
            }
        }

        if let Some(name) = pool_name {
            ready(cancel)?;
            let opts = RenameOpts {
                name: Some(name.clone()),
            };
            self.api.update_pool(lb_id, &pool.id, opts).await?;
            info!(pool.id = %pool.id, from = %pool.name, to = %name, "Renamed pool");
        }

        Ok(())
    }
}

impl<A> Cascade<A> {
    fn decode(&self, value: Value, raw: &str) -> Option<StructuredName> {
        match value {
            Value::Name(kind) if self.prefixes.is_managed(kind, raw) => {
                self.prefixes.decompose(kind, raw)
            }
            Value::Name(_) => None,
            Value::Tag => self.prefixes.decompose_tag(raw),
        }
    }

    /// Returns the name rewritten to `cluster`, or `None` if it is not
    /// decodable or already current.
    ///
    /// A decodable name whose rewrite does not verify is an error: renaming
    /// its ancestors would mark the tree migrated with this resource stale.
    fn rename(
        &self,
        kind: Kind,
        id: &str,
        raw: &str,
        cluster: &str,
    ) -> Result<Option<String>, Error> {
        self.verified_rewrite(Value::Name(kind), raw, cluster)
            .map_err(|renamed| {
                warn!(%kind, %id, %raw, %renamed, "Rewritten name does not decode to the new cluster");
                Error::Rewrite {
                    kind,
                    id: id.to_string(),
                    name: raw.to_string(),
                }
            })
    }

    /// Rewrites a value to `cluster`. `Ok(None)` means the value is not
    /// decodable or already current.
    ///
    /// The rewrite replaces the first occurrence of the old identity, which
    /// is not necessarily the decoded one. A result that does not decode back
    /// to the same namespace and name under `cluster` is returned as the
    /// error.
    fn verified_rewrite(
        &self,
        value: Value,
        raw: &str,
        cluster: &str,
    ) -> Result<Option<String>, String> {
        let Some(current) = self.decode(value, raw) else {
            return Ok(None);
        };
        if current.cluster == cluster {
            return Ok(None);
        }

        let renamed = rewrite(&current.cluster, cluster, raw);
        let expected = StructuredName {
            cluster: cluster.to_string(),
            ..current
        };
        if self.decode(value, &renamed).as_ref() != Some(&expected) {
            return Err(renamed);
        }

        Ok(Some(renamed))
    }

    /// Rewrites every decodable, stale tag. Returns `None` if no tag changed.
    fn retag(&self, tags: &[String], cluster: &str) -> Option<Vec<String>> {
        let mut changed = false;
        let tags = tags
            .iter()
            .map(|tag| match self.verified_rewrite(Value::Tag, tag, cluster) {
                Ok(Some(renamed)) => {
                    changed = true;
                    renamed
                }
                Ok(None) => tag.clone(),
                Err(renamed) => {
                    warn!(%tag, %renamed, "Rewritten tag does not decode to the new cluster; leaving it unchanged");
                    tag.clone()
                }
            })
            .collect();
        changed.then_some(tags)
    }
}

fn ready(cancel: &CancellationToken) -> Result<(), Error> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
