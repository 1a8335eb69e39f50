//! # nimbus-worker
//!
//! Worker supervisors for the Nimbus control plane.
//!
//! Two supervisor forms exist:
//!
//! - [`spawn_periodic`]: runs a work function at a fixed interval,
//!   sleeping with exponential backoff after consecutive failures and
//!   resetting on the first success
//! - [`spawn_streaming`]: runs a long-lived future once; when it
//!   returns, the failure is reported but the worker is not restarted
//!   (streaming workers rely on lease ownership for redundancy, so a
//!   peer picks up the work)
//!
//! Both forms heartbeat `running` to the worker-status registry every
//! second, purge stale registry entries every five minutes, and report
//! `stopped` on cancellation. Worker loops never take the process down:
//! panics in periodic work are caught, logged and retried after the
//! backoff sleep.

#![forbid(unsafe_code)]

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nimbus_store::WorkerStatusRepo;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const PURGE_INTERVAL: Duration = Duration::from_secs(300);
const MAX_ERROR_SLEEP: Duration = Duration::from_secs(3600);

/// An interval whose first tick fires after one full `period`, not
/// immediately. Missed ticks are skipped.
#[must_use]
pub fn delayed_interval(period: Duration) -> tokio::time::Interval {
    let mut tick =
        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick
}

/// Spawns a periodic worker named `name`.
///
/// Every `interval` the work function runs once; it is never invoked
/// concurrently with itself. On error the loop sleeps an extra backoff
/// delay that starts at `interval` and doubles on each consecutive
/// failure (capped at one hour), resetting to `interval` on the first
/// success. The loop exits when `token` is cancelled and reports
/// `stopped`.
pub fn spawn_periodic<F, E>(
    name: &str,
    interval: Duration,
    statuses: WorkerStatusRepo,
    token: CancellationToken,
    mut work: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Result<(), E> + Send + 'static,
    E: std::fmt::Display + Send,
{
    let name = name.to_string();
    tokio::spawn(async move {
        let mut heartbeat = delayed_interval(HEARTBEAT_INTERVAL);
        let mut purge = delayed_interval(PURGE_INTERVAL);
        let mut tick = delayed_interval(interval);
        let mut error_sleep = interval;

        info!(worker = %name, ?interval, "periodic worker started");
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    statuses.report_stopped(&name);
                    info!(worker = %name, "periodic worker stopped");
                    return;
                }
                _ = heartbeat.tick() => statuses.report_running(&name),
                _ = purge.tick() => {
                    let purged = statuses.purge_stale();
                    if purged > 0 {
                        info!(worker = %name, purged, "purged stale worker statuses");
                    }
                }
                _ = tick.tick() => {
                    match std::panic::catch_unwind(AssertUnwindSafe(&mut work)) {
                        Ok(Ok(())) => error_sleep = interval,
                        Ok(Err(e)) => {
                            warn!(
                                worker = %name,
                                error = %e,
                                backoff = ?error_sleep,
                                "worker tick failed, sleeping before next tick"
                            );
                            tokio::select! {
                                () = token.cancelled() => {
                                    statuses.report_stopped(&name);
                                    return;
                                }
                                () = tokio::time::sleep(error_sleep) => {}
                            }
                            error_sleep = (error_sleep * 2).min(MAX_ERROR_SLEEP);
                        }
                        Err(_) => {
                            error!(
                                worker = %name,
                                backoff = ?error_sleep,
                                "worker tick panicked, sleeping before next tick"
                            );
                            tokio::select! {
                                () = token.cancelled() => {
                                    statuses.report_stopped(&name);
                                    return;
                                }
                                () = tokio::time::sleep(error_sleep) => {}
                            }
                            error_sleep = (error_sleep * 2).min(MAX_ERROR_SLEEP);
                        }
                    }
                }
            }
        }
    })
}

/// Spawns a streaming worker named `name` around a long-lived future.
///
/// The future is polled once to completion; it is expected to subscribe
/// or long-poll internally. When it returns, the outcome is logged and
/// the worker reports `stopped` without restarting: an operator (or a
/// peer process holding the relevant lease) takes over.
pub fn spawn_streaming<Fut, E>(
    name: &str,
    statuses: WorkerStatusRepo,
    token: CancellationToken,
    work: Fut,
) -> JoinHandle<()>
where
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display,
{
    let name = name.to_string();
    tokio::spawn(async move {
        let mut heartbeat = delayed_interval(HEARTBEAT_INTERVAL);
        let mut purge = delayed_interval(PURGE_INTERVAL);
        tokio::pin!(work);

        info!(worker = %name, "streaming worker started");
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    statuses.report_stopped(&name);
                    info!(worker = %name, "streaming worker stopped");
                    return;
                }
                _ = heartbeat.tick() => statuses.report_running(&name),
                _ = purge.tick() => {
                    statuses.purge_stale();
                }
                result = &mut work => {
                    match result {
                        Ok(()) => info!(worker = %name, "streaming worker finished"),
                        Err(e) => error!(worker = %name, error = %e, "streaming worker failed"),
                    }
                    statuses.report_stopped(&name);
                    return;
                }
            }
        }
    })
}
