//! Best-effort fan-out of event envelopes to every registered connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use courier_core::EventEnvelope;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::registry::{ConnectionRegistry, Frame, SendOutcome};

/// Aggregate outcome of one fan-out pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    /// Connections whose queue was full; the frame was skipped for them.
    pub dropped: usize,
    /// Closed connections removed during this pass.
    pub pruned: usize,
}

/// Writes events and keep-alives to every connection in the registry.
///
/// A closed sink is removed from the registry in the same pass. A full sink
/// loses that one frame and stays registered. Neither surfaces to the caller.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    /// Serialises whole passes so every connection sees the same order.
    fanout: Mutex<()>,
    events_broadcast: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            fanout: Mutex::new(()),
            events_broadcast: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serialize once and send to every connection.
    pub fn broadcast(&self, envelope: &EventEnvelope) -> FanoutReport {
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize event envelope");
                return FanoutReport::default();
            }
        };
        let report = self.fan_out(&Frame::Event(Arc::from(json)));
        let _ = self.events_broadcast.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_type = envelope.kind().unwrap_or("untyped"),
            recipients = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "event broadcast"
        );
        report
    }

    /// Send a keep-alive frame to every connection.
    pub fn keep_alive(&self) -> FanoutReport {
        let report = self.fan_out(&Frame::KeepAlive);
        trace!(
            recipients = report.delivered,
            pruned = report.pruned,
            "keep-alive sent"
        );
        report
    }

    /// Number of `broadcast` calls since startup.
    pub fn events_broadcast(&self) -> u64 {
        self.events_broadcast.load(Ordering::Relaxed)
    }

    fn fan_out(&self, frame: &Frame) -> FanoutReport {
        let _guard = self.fanout.lock();
        let mut report = FanoutReport::default();
        for connection in self.registry.snapshot() {
            match connection.send(frame.clone()) {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::Full => report.dropped += 1,
                SendOutcome::Closed => {
                    if self.registry.remove(connection.id()) {
                        report.pruned += 1;
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup(capacity: usize) -> (Arc<ConnectionRegistry>, Dispatcher) {
        let registry = Arc::new(ConnectionRegistry::new(capacity));
        let dispatcher = Dispatcher::new(registry.clone());
        (registry, dispatcher)
    }

    fn event_text(frame: Frame) -> String {
        match frame {
            Frame::Event(data) => data.to_string(),
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let (registry, dispatcher) = setup(8);
        let mut receivers: Vec<mpsc::Receiver<Frame>> =
            (0..5).map(|_| registry.open().unwrap().1).collect();

        let report = dispatcher.broadcast(&EventEnvelope::typed("NEW_EMAIL", json!({"subject": "hi"})));

        assert_eq!(report.delivered, 5);
        for rx in &mut receivers {
            let text = event_text(rx.try_recv().unwrap());
            assert_eq!(text, r#"{"type":"NEW_EMAIL","data":{"subject":"hi"}}"#);
        }
    }

    #[test]
    fn broadcast_with_no_connections_is_ok() {
        let (_registry, dispatcher) = setup(8);
        let report = dispatcher.broadcast(&EventEnvelope::passthrough(json!({"x": 1})));
        assert_eq!(report, FanoutReport::default());
        assert_eq!(dispatcher.events_broadcast(), 1);
    }

    #[test]
    fn closed_connection_does_not_block_others_and_is_pruned() {
        let (registry, dispatcher) = setup(8);
        let (_a, mut rx_a) = registry.open().unwrap();
        let (dead, rx_dead) = registry.open().unwrap();
        let (_c, mut rx_c) = registry.open().unwrap();
        drop(rx_dead);

        let report = dispatcher.broadcast(&EventEnvelope::typed("NEW_EMAIL", json!({})));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned, 1);
        assert!(!registry.contains(dead.id()));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn full_connection_keeps_registration() {
        let (registry, dispatcher) = setup(1);
        let (slow, _rx_slow) = registry.open().unwrap();
        let (_fast, mut rx_fast) = registry.open().unwrap();

        let _ = dispatcher.broadcast(&EventEnvelope::typed("A", json!(1)));
        let _ = rx_fast.try_recv().unwrap();
        let report = dispatcher.broadcast(&EventEnvelope::typed("B", json!(2)));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert!(registry.contains(slow.id()));
        assert_eq!(slow.drop_count(), 1);
        assert!(event_text(rx_fast.try_recv().unwrap()).contains("\"B\""));
    }

    #[test]
    fn sequential_broadcasts_arrive_in_order() {
        let (registry, dispatcher) = setup(8);
        let (_a, mut rx_a) = registry.open().unwrap();
        let (_b, mut rx_b) = registry.open().unwrap();

        for kind in ["e1", "e2", "e3"] {
            let _ = dispatcher.broadcast(&EventEnvelope::typed(kind, json!(null)));
        }

        for rx in [&mut rx_a, &mut rx_b] {
            let order: Vec<String> = (0..3)
                .map(|_| {
                    let v: serde_json::Value =
                        serde_json::from_str(&event_text(rx.try_recv().unwrap())).unwrap();
                    v["type"].as_str().unwrap().to_string()
                })
                .collect();
            assert_eq!(order, ["e1", "e2", "e3"]);
        }
    }

    #[test]
    fn concurrent_broadcasts_share_one_order() {
        let (registry, dispatcher) = setup(1024);
        let dispatcher = Arc::new(dispatcher);
        let mut receivers: Vec<_> = (0..4).map(|_| registry.open().unwrap().1).collect();

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let d = dispatcher.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let _ = d.broadcast(&EventEnvelope::typed(format!("t{t}-{i}"), json!(null)));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let sequences: Vec<Vec<String>> = receivers
            .iter_mut()
            .map(|rx| {
                let mut seq = Vec::new();
                while let Ok(frame) = rx.try_recv() {
                    seq.push(event_text(frame));
                }
                seq
            })
            .collect();
        assert_eq!(sequences[0].len(), 200);
        for seq in &sequences[1..] {
            assert_eq!(seq, &sequences[0]);
        }
    }

    #[test]
    fn disconnected_before_broadcast_touches_nothing() {
        let (registry, dispatcher) = setup(8);
        let (conn, _rx) = registry.open().unwrap();
        let _ = registry.remove(conn.id());

        let report = dispatcher.broadcast(&EventEnvelope::typed("NEW_EMAIL", json!({})));
        assert_eq!(report, FanoutReport::default());
        assert!(!registry.remove(conn.id()));
    }

    #[test]
    fn keep_alive_sends_comment_frame_and_prunes() {
        let (registry, dispatcher) = setup(8);
        let (_a, mut rx_a) = registry.open().unwrap();
        let (_b, rx_b) = registry.open().unwrap();
        drop(rx_b);

        let report = dispatcher.keep_alive();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(rx_a.try_recv().unwrap(), Frame::KeepAlive);
        assert_eq!(dispatcher.events_broadcast(), 0);
    }
}
