use crate::{
    metrics::{ApiMetrics, CascadeMetrics, Instrumented},
    reconcile::{self, Backoff},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use lb_rename_core::{
    memory::{InMemory, Snapshot},
    name, Cascade, CancellationToken, Prefixes,
};
use prometheus_client::registry::Registry;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[clap(
    name = "lb-rename",
    about = "Migrates load balancer trees to a new cluster name"
)]
pub struct Args {
    #[clap(long, default_value = "lb_rename=info,warn", env = "LB_RENAME_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// The cluster name every managed resource should carry.
    #[clap(long, env = "LB_RENAME_CLUSTER_NAME")]
    cluster_name: String,

    /// A JSON snapshot of the load balancer trees to migrate.
    #[clap(long)]
    snapshot: PathBuf,

    /// Where to write the migrated snapshot. Defaults to stdout.
    #[clap(long)]
    output: Option<PathBuf>,

    #[clap(flatten)]
    prefixes: PrefixArgs,

    /// Cancels any cascade still running after this long.
    #[clap(long, default_value = "60000")]
    timeout_ms: u64,

    #[clap(long, default_value = "5")]
    max_attempts: u32,

    #[clap(long, default_value = "100")]
    initial_backoff_ms: u64,

    #[clap(long, default_value = "5000")]
    max_backoff_ms: u64,

    /// Writes metrics in the Prometheus text format to this file on exit.
    #[clap(long)]
    metrics_file: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::Args)]
struct PrefixArgs {
    /// Prefix of load balancer names; also follows the index in every
    /// listener, pool and monitor name.
    #[clap(long, default_value = name::DEFAULT_SERVICE_PREFIX, env = "LB_RENAME_SERVICE_PREFIX")]
    service_prefix: String,

    #[clap(long, default_value = name::DEFAULT_LISTENER_PREFIX, env = "LB_RENAME_LISTENER_PREFIX")]
    listener_prefix: String,

    #[clap(long, default_value = name::DEFAULT_POOL_PREFIX, env = "LB_RENAME_POOL_PREFIX")]
    pool_prefix: String,

    #[clap(long, default_value = name::DEFAULT_MONITOR_PREFIX, env = "LB_RENAME_MONITOR_PREFIX")]
    monitor_prefix: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            cluster_name,
            snapshot,
            output,
            prefixes,
            timeout_ms,
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            metrics_file,
        } = self;

        log_format
            .try_init(log_level)
            .expect("must configure logging");

        if cluster_name.is_empty() {
            bail!("--cluster-name must not be empty");
        }

        let snapshot = read_snapshot(&snapshot).await?;
        let store = Arc::new(InMemory::new(snapshot));

        let mut prom = <Registry>::default();
        let api_metrics = ApiMetrics::register(prom.sub_registry_with_prefix("api"));
        let cascade_metrics = CascadeMetrics::register(prom.sub_registry_with_prefix("cascade"));

        let cascade = Cascade::new(
            Instrumented::new(store.clone(), api_metrics),
            Prefixes::from(prefixes),
        );
        let backoff = Backoff {
            max_attempts,
            initial_delay: Duration::from_millis(initial_backoff_ms),
            max_delay: Duration::from_millis(max_backoff_ms),
        };

        let cancel = CancellationToken::new();
        let watchdog = tokio::spawn(cancel_on_shutdown(
            cancel.clone(),
            Duration::from_millis(timeout_ms),
        ));

        info!(cluster = %cluster_name, "Migrating load balancers");
        let summary = reconcile::migrate_all(
            &cascade,
            store.load_balancers(),
            &cluster_name,
            &backoff,
            &cancel,
            &cascade_metrics,
        )
        .await;
        watchdog.abort();
        info!(
            migrated = summary.migrated,
            current = summary.current,
            unmanaged = summary.unmanaged,
            failed = summary.failed,
            "Finished"
        );

        write_snapshot(output, &store.snapshot()).await?;

        if let Some(path) = metrics_file {
            let mut text = String::new();
            prometheus_client::encoding::text::encode(&mut text, &prom)?;
            tokio::fs::write(&path, text)
                .await
                .with_context(|| format!("writing metrics to {}", path.display()))?;
        }

        if summary.failed > 0 {
            bail!("{} load balancers were not migrated", summary.failed);
        }
        Ok(())
    }
}

impl From<PrefixArgs> for Prefixes {
    fn from(args: PrefixArgs) -> Self {
        Self {
            service: args.service_prefix,
            listener: args.listener_prefix,
            pool: args.pool_prefix,
            monitor: args.monitor_prefix,
        }
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

async fn write_snapshot(output: Option<PathBuf>, snapshot: &Snapshot) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(snapshot)?;
    json.push(b'\n');
    match output {
        Some(path) => tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing {}", path.display())),
        None => std::io::stdout()
            .lock()
            .write_all(&json)
            .context("writing snapshot to stdout"),
    }
}

/// Cancels the token on SIGINT or once the timeout elapses.
async fn cancel_on_shutdown(cancel: CancellationToken, timeout: Duration) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => warn!("Received interrupt; cancelling"),
            Err(error) => warn!(%error, "Failed to listen for interrupts; cancelling"),
        },
        _ = tokio::time::sleep(timeout) => warn!(?timeout, "Timed out; cancelling"),
    }
    cancel.cancel();
}
