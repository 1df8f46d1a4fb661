use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SentinelConfig;
use crate::correlator::correlate;
use crate::detector::detect_anomalies;
use crate::error::SentinelError;
use crate::incident_manager::IncidentManager;
use crate::observability::ObservabilityClient;
use crate::store::IncidentStore;

/// How long an in-flight tick may keep running after a shutdown request.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// The wired-up detection-to-incident pipeline. All per-tick state flows
/// through the stages; only the store is shared.
pub struct Pipeline {
    pub obs: ObservabilityClient,
    pub manager: IncidentManager,
    pub store: Arc<IncidentStore>,
    pub cfg: SentinelConfig,
}

impl Pipeline {
    /// One full tick: detect, correlate, then group/dedup/create/notify.
    /// Returns the number of incidents created. A backend outage aborts the
    /// tick; the next one is scheduled normally.
    pub async fn run_tick(&self) -> Result<usize, SentinelError> {
        let now = Utc::now();
        let anomalies = detect_anomalies(&self.obs, &self.cfg, now).await?;
        self.store.set_recent_anomalies(anomalies.clone());
        if anomalies.is_empty() {
            return Ok(0);
        }
        let events = correlate(&self.obs, &anomalies, &self.cfg.correlation).await;
        let created = self
            .manager
            .process(&self.obs, anomalies, events, now)
            .await;
        Ok(created)
    }
}

/// Run the pipeline loop until shutdown. Spawn this from `main`.
pub fn spawn_pipeline(
    pipeline: Pipeline,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_pipeline(pipeline, shutdown))
}

pub async fn run_pipeline(pipeline: Pipeline, shutdown: watch::Receiver<bool>) {
    let interval_secs = pipeline.cfg.polling.interval_seconds;
    tracing::info!("pipeline: started ({interval_secs}s tick)");
    let pipeline = &pipeline;
    drive_ticks(interval_secs, shutdown, move || async move {
        match pipeline.run_tick().await {
            Ok(0) => tracing::debug!("pipeline: tick complete, no incidents"),
            Ok(n) => tracing::info!("pipeline: tick complete, {n} incident(s) created"),
            Err(e) => tracing::error!("pipeline: tick aborted: {e}"),
        }
    })
    .await;
    tracing::info!("pipeline: stopped");
}

/// The scheduling core: fire `tick_fn` every `interval_secs`, measured
/// tick-start to tick-start. Single-flight: firings that come due while a
/// tick is still running are skipped, not queued. On shutdown the in-flight
/// tick gets a bounded grace period.
pub(crate) async fn drive_ticks<F, Fut>(
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    mut tick_fn: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let period = Duration::from_secs(interval_secs);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let started = Instant::now();
                let tick = tick_fn();
                tokio::pin!(tick);
                tokio::select! {
                    _ = &mut tick => {}
                    _ = shutdown.changed() => {
                        tracing::info!("pipeline: shutdown requested, finishing in-flight tick");
                        if tokio::time::timeout(SHUTDOWN_DEADLINE, &mut tick).await.is_err() {
                            tracing::warn!(
                                "pipeline: in-flight tick exceeded the {}s shutdown deadline, abandoning",
                                SHUTDOWN_DEADLINE.as_secs()
                            );
                        }
                        return;
                    }
                }
                let elapsed = started.elapsed();
                if elapsed > period {
                    tracing::warn!(
                        "pipeline: tick took {:.1}s, longer than the {interval_secs}s interval; missed firing(s) skipped",
                        elapsed.as_secs_f64()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn overrunning_tick_skips_the_missed_firing() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(95)).await;
            let _ = tx.send(true);
        });

        let counter = ticks.clone();
        drive_ticks(30, rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // Each tick runs for two scheduling periods.
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        })
        .await;
        stopper.await.unwrap();

        // Firings at t=0 and t=60 run; the t=30 firing is skipped, never
        // queued. Without single-flight this would reach 4 by t=95.
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop_between_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            let _ = tx.send(true);
        });

        let counter = ticks.clone();
        drive_ticks(30, rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        stopper.await.unwrap();

        // Fired at t=0 and t=30; the shutdown at t=45 lands before t=60.
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_is_measured_start_to_start() {
        let fired_at = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (tx, rx) = watch::channel(false);
        let epoch = Instant::now();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(70)).await;
            let _ = tx.send(true);
        });

        let log = fired_at.clone();
        drive_ticks(30, rx, move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(epoch.elapsed().as_secs());
                // Work shorter than the period must not stretch the cadence.
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        })
        .await;
        stopper.await.unwrap();

        assert_eq!(*fired_at.lock().unwrap(), vec![0, 30, 60]);
    }
}
