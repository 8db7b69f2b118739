use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

/// Runs a named job at a fixed interval until shutdown. One iteration's
/// failure is logged and isolated; the loop itself never dies. Shutdown is
/// only observed between iterations, so the current sweep always finishes.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    info!(
        event_name = "jobs.started",
        job = name,
        interval_secs = interval.as_secs(),
        "periodic job started"
    );

    loop {
        if let Err(job_error) = task().await {
            error!(
                event_name = "jobs.iteration_failed",
                job = name,
                error = %job_error,
                "job iteration failed; loop continues"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                // A dropped sender means the process is going down too.
                if changed.is_err() || *shutdown.borrow() {
                    info!(event_name = "jobs.stopped", job = name, "periodic job stopped");
                    return;
                }
            }
        }
    }
}
