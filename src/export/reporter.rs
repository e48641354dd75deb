use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::channel::ExportSender;
use crate::error::Result;
use crate::stats::Registry;

/// Background task that pushes a snapshot of every subscribed view onto
/// the export channel once per period.
///
/// Dropping the reporter aborts the task; [`Reporter::shutdown`] stops it
/// after the tick in progress.
pub struct Reporter {
    registry: Arc<Registry>,
    sender: ExportSender,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Must be called from within a tokio runtime.
    pub fn spawn(registry: Arc<Registry>, sender: ExportSender, period: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run(
            Arc::clone(&registry),
            sender.clone(),
            period,
            stop_rx,
        ));
        tracing::info!(period_ms = period.as_millis() as u64, "view reporter started");

        Self {
            registry,
            sender,
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Exports one snapshot of `view` right away, subscribed or not.
    pub fn force_collect(&self, view: &str) -> Result<()> {
        let data = self.registry.retrieve_data(view)?;
        self.sender.send(data);
        Ok(())
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            // The task may already be gone
            let _ = handle.await;
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    registry: Arc<Registry>,
    sender: ExportSender,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for data in registry.collect_subscribed_at(Utc::now()) {
                    sender.send(data);
                }
            }
            _ = &mut stop => break,
        }
    }
    tracing::info!("view reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::channel;
    use crate::stats::{Aggregation, View, Window};
    use crate::tags::TagMap;

    fn registry_with_view() -> (Arc<Registry>, crate::stats::MeasureInt64) {
        let reg = Arc::new(Registry::new());
        let m = reg.new_measure_int64("jobs", "jobs run", "1").unwrap();
        reg.register_view(View::new(
            "jobs_total",
            "",
            &m,
            Aggregation::count(),
            Window::cumulative(),
            vec![],
        ))
        .unwrap();
        (reg, m)
    }

    #[tokio::test(start_paused = true)]
    async fn exports_subscribed_views_each_period() {
        let (reg, m) = registry_with_view();
        reg.subscribe("jobs_total").unwrap();
        reg.record(&TagMap::new(), &[m.m(1)]);

        let (tx, mut rx) = channel(16);
        let reporter = Reporter::spawn(Arc::clone(&reg), tx, Duration::from_secs(10));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.view, "jobs_total");
        assert_eq!(first.rows[0].data.as_count().unwrap().value, 1);

        reg.record(&TagMap::new(), &[m.m(1)]);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.rows[0].data.as_count().unwrap().value, 2);

        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn force_collect_ignores_subscription() {
        let (reg, _) = registry_with_view();
        let (tx, mut rx) = channel(4);
        let reporter = Reporter::spawn(Arc::clone(&reg), tx, Duration::from_secs(3600));

        reporter.force_collect("jobs_total").unwrap();
        assert_eq!(rx.try_recv().unwrap().view, "jobs_total");
        assert!(reporter.force_collect("missing").is_err());
        reporter.shutdown().await;
    }

    #[tokio::test]
    async fn channel_closes_after_shutdown() {
        let (reg, _) = registry_with_view();
        let (tx, mut rx) = channel(4);
        let reporter = Reporter::spawn(reg, tx, Duration::from_secs(3600));
        reporter.shutdown().await;
        assert!(rx.recv().await.is_none());
    }
}
