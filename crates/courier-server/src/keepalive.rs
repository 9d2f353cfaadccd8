//! Process-wide keep-alive timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;

/// A single recurring timer that sends a keep-alive frame to every connection.
pub struct KeepAliveScheduler {
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    started: AtomicBool,
}

impl KeepAliveScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval: interval.max(Duration::from_millis(1)),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Spawn the timer task, bound to `cancel`.
    ///
    /// Returns `None` if the timer was already started; a second timer is
    /// never spawned.
    pub fn start(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let dispatcher = self.dispatcher.clone();
        let period = self.interval;
        info!(interval_secs = period.as_secs_f64(), "keep-alive started");

        Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = dispatcher.keep_alive();
                    }
                    () = cancel.cancelled() => {
                        debug!("keep-alive stopped");
                        return;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionRegistry, Frame};
    use courier_core::EventEnvelope;
    use serde_json::json;

    fn setup(period: Duration) -> (Arc<ConnectionRegistry>, Arc<Dispatcher>, KeepAliveScheduler) {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let scheduler = KeepAliveScheduler::new(dispatcher.clone(), period);
        (registry, dispatcher, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn sends_keepalive_on_schedule_without_events() {
        let (registry, _dispatcher, scheduler) = setup(Duration::from_secs(15));
        let (_a, mut rx_a) = registry.open().unwrap();
        let (_b, mut rx_b) = registry.open().unwrap();
        let cancel = CancellationToken::new();
        let start = time::Instant::now();
        let _handle = scheduler.start(cancel.clone()).unwrap();

        let frame = rx_a.recv().await.unwrap();
        assert_eq!(frame, Frame::KeepAlive);
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert_eq!(rx_b.recv().await.unwrap(), Frame::KeepAlive);

        let frame = rx_a.recv().await.unwrap();
        assert_eq!(frame, Frame::KeepAlive);
        assert!(start.elapsed() >= Duration::from_secs(30));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn no_frame_before_first_period() {
        let (registry, _dispatcher, scheduler) = setup(Duration::from_secs(15));
        let (_a, mut rx) = registry.open().unwrap();
        let cancel = CancellationToken::new();
        let _handle = scheduler.start(cancel.clone()).unwrap();

        time::sleep(Duration::from_secs(14)).await;
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_interleaves_with_events() {
        let (registry, dispatcher, scheduler) = setup(Duration::from_secs(10));
        let (_a, mut rx) = registry.open().unwrap();
        let cancel = CancellationToken::new();
        let _handle = scheduler.start(cancel.clone()).unwrap();

        let _ = dispatcher.broadcast(&EventEnvelope::typed("NEW_EMAIL", json!({})));
        assert!(matches!(rx.recv().await.unwrap(), Frame::Event(_)));
        assert_eq!(rx.recv().await.unwrap(), Frame::KeepAlive);
        cancel.cancel();
    }

    #[tokio::test]
    async fn start_twice_returns_none() {
        let (_registry, _dispatcher, scheduler) = setup(Duration::from_secs(15));
        let cancel = CancellationToken::new();
        let first = scheduler.start(cancel.clone());
        assert!(first.is_some());
        assert!(scheduler.start(cancel.clone()).is_none());
        assert!(scheduler.is_started());
        cancel.cancel();
        first.unwrap().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_timer() {
        let (registry, _dispatcher, scheduler) = setup(Duration::from_secs(5));
        let (_a, mut rx) = registry.open().unwrap();
        let cancel = CancellationToken::new();
        let handle = scheduler.start(cancel.clone()).unwrap();

        cancel.cancel();
        handle.await.unwrap();
        time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn prunes_closed_connections_on_tick() {
        let (registry, _dispatcher, scheduler) = setup(Duration::from_secs(5));
        let (_a, rx) = registry.open().unwrap();
        drop(rx);
        let cancel = CancellationToken::new();
        let _handle = scheduler.start(cancel.clone()).unwrap();

        time::sleep(Duration::from_secs(6)).await;
        assert!(registry.is_empty());
        cancel.cancel();
    }
}
