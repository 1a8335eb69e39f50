//! Daemon assembly: constructs the shared stores and starts every
//! worker in dependency order.
//!
//! Startup order matters in one place: `reset_running` must run before
//! the first executor tick, so jobs orphaned by a previous process get
//! requeued instead of staying `running` forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use nimbus_exec::{Registry, Runner, setup_executors};
use nimbus_kv::{KvStore, MessageQueue};
use nimbus_logstream::{
    ClusterAdapter, LogLine, LogSink, LogWorker, StaticCluster, setup_log_control,
    setup_log_worker,
};
use nimbus_model::ZoneCapability;
use nimbus_reconcile::{
    DnsLookupError, TxtResolver, setup_custom_domain_confirmer, setup_deletion_confirmers,
    setup_gpu_lease_synchronizer, setup_metrics_updater, setup_repair_schedulers,
    setup_stale_resource_cleaner,
};
use nimbus_store::Database;

use crate::config::FabricConfig;

const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// TXT resolution backed by the shared key-value store: records live
/// under `dns:txt:<name>`, either a bare string or a JSON array of
/// strings. Single-node installations seed these keys by hand; a real
/// resolver replaces this behind the same trait.
struct KvTxtResolver {
    kv: KvStore,
}

impl TxtResolver for KvTxtResolver {
    fn lookup_txt(&self, name: &str) -> Result<Option<Vec<String>>, DnsLookupError> {
        let Some(raw) = self.kv.get(&format!("dns:txt:{name}")) else {
            return Ok(None);
        };
        let records = serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|_| vec![raw]);
        Ok(Some(records))
    }
}

/// Forwards streamed pod logs to the tracing pipeline.
struct TracingSink;

impl LogSink for TracingSink {
    fn on_log(&self, pod: &str, line: &LogLine) {
        info!(target: "podlogs", pod, source = %line.source, "{}", line.line);
    }
}

/// Runs the daemon until `ctrl-c`.
pub async fn run(config: FabricConfig) -> anyhow::Result<()> {
    let db = Database::default();
    let kv = KvStore::new();
    let queue = MessageQueue::new();
    let token = CancellationToken::new();

    let requeued = db.jobs.reset_running();
    if requeued > 0 {
        info!(count = requeued, "requeued jobs from previous run");
    }

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    handles.push(kv.spawn_sweeper(SWEEP_INTERVAL, token.clone()));

    handles.extend(setup_repair_schedulers(&db, &config.timers, &token));
    handles.extend(setup_deletion_confirmers(&db, &config.timers, &token));
    handles.push(setup_stale_resource_cleaner(
        &db,
        config.zones.clone(),
        config.lifetimes.clone(),
        &config.timers,
        &token,
    ));
    handles.push(setup_metrics_updater(&db, &kv, &config.timers, &token));
    handles.push(setup_gpu_lease_synchronizer(&db, &config.timers, &token));

    let resolver: Arc<dyn TxtResolver> = Arc::new(KvTxtResolver { kv: kv.clone() });
    handles.push(setup_custom_domain_confirmer(
        &db,
        resolver,
        config.custom_domain_txt_subdomain.clone(),
        &config.timers,
        &token,
    ));

    let registry = Arc::new(Registry::standard());
    let runner = Runner::new(db.clone(), registry);
    handles.extend(setup_executors(&db, &runner, &config.timers, &token));

    let cluster: Arc<dyn ClusterAdapter> = Arc::new(StaticCluster::new());
    let sink: Arc<dyn LogSink> = Arc::new(TracingSink);
    let hostname = config.resolved_hostname();
    for zone in config
        .zones
        .iter()
        .filter(|z| z.enabled && z.has_capability(ZoneCapability::Deployment))
    {
        handles.extend(setup_log_control(
            &kv,
            &queue,
            Arc::clone(&cluster),
            &zone.name,
            &config.timers,
            db.worker_status.clone(),
            &token,
        )?);
        let worker = LogWorker::new(
            kv.clone(),
            Arc::clone(&cluster),
            Arc::clone(&sink),
            zone.name.clone(),
            hostname.clone(),
            &config.timers,
            &token,
        );
        handles.push(setup_log_worker(&queue, worker, &token));
    }

    info!(
        zones = config.zones.len(),
        workers = handles.len(),
        host = %hostname,
        "nimbusd started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    token.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    info!("all workers stopped");
    Ok(())
}
