//! Progress Broadcasting
//!
//! A publish/subscribe registry keyed by run identifier. Worker threads
//! publish serialized [`ProgressEvent`]s; observers register callbacks or
//! channel subscriptions for the runs they watch.
//!
//! Delivery is synchronous, in registration order, at most once, with no
//! buffering for late joiners. A callback that panics is isolated: the
//! panic is logged and the remaining callbacks still receive the message.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

use crate::pipeline::StepInfo;

/// Callback receiving serialized progress messages.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Executed/running partition of a flattened plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Steps already started
    pub executed: Vec<StepInfo>,
    /// Steps not yet started
    pub running: Vec<StepInfo>,
}

impl ProgressSnapshot {
    /// Splits `plan` at `cursor`, clamped to the plan length.
    pub fn at(plan: &[StepInfo], cursor: usize) -> Self {
        let (executed, running) = plan.split_at(cursor.min(plan.len()));
        Self {
            executed: executed.to_vec(),
            running: running.to_vec(),
        }
    }
}

/// Message delivered to progress observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Published before each step or iteration starts
    Progress(ProgressSnapshot),
    /// The run finished successfully
    Completed { run_id: String },
    /// The run stopped at an error
    Failed {
        run_id: String,
        step: Option<String>,
        error: String,
    },
}

impl ProgressEvent {
    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of progress observers per run.
#[derive(Default)]
pub struct ProgressBroadcaster {
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, ProgressCallback)>>>,
    next_id: AtomicU64,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for a run.
    pub fn subscribe<F>(&self, run_id: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.lock()
            .entry(run_id.to_string())
            .or_default()
            .push((id, Arc::new(callback)));

        info!("Subscribed to run {}", run_id);
        id
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, run_id: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();

        let Some(callbacks) = subscribers.get_mut(run_id) else {
            return false;
        };

        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        let removed = callbacks.len() != before;

        if callbacks.is_empty() {
            subscribers.remove(run_id);
        }

        if removed {
            info!("Unsubscribed from run {}", run_id);
        }
        removed
    }

    /// Delivers a message to every callback registered for the run.
    ///
    /// Returns the number of callbacks that completed without panicking.
    /// The registry lock is released before any callback runs, so callbacks
    /// may subscribe or unsubscribe.
    pub fn publish(&self, run_id: &str, message: &str) -> usize {
        let callbacks: Vec<ProgressCallback> = match self.lock().get(run_id) {
            Some(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Progress observer for run {} panicked; skipped", run_id),
            }
        }
        delivered
    }

    /// Serializes and publishes an event.
    pub fn publish_event(&self, run_id: &str, event: &ProgressEvent) -> usize {
        match serde_json::to_string(event) {
            Ok(message) => self.publish(run_id, &message),
            Err(e) => {
                error!("Failed to serialize progress event for run {}: {}", run_id, e);
                0
            }
        }
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.lock().get(run_id).map_or(0, Vec::len)
    }

    /// Subscribes through an unbounded channel, for observers running on an
    /// async runtime. Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe_channel(self: &Arc<Self>, run_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.subscribe(run_id, move |message| {
            let _ = sender.send(message.to_string());
        });

        Subscription {
            broadcaster: Arc::clone(self),
            run_id: run_id.to_string(),
            id,
            receiver,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<(SubscriptionId, ProgressCallback)>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Channel-backed subscription to one run.
pub struct Subscription {
    broadcaster: Arc<ProgressBroadcaster>,
    run_id: String,
    id: SubscriptionId,
    receiver: UnboundedReceiver<String>,
}

impl Subscription {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Returns a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        match self.receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.run_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn plan(names: &[&str]) -> Vec<StepInfo> {
        names
            .iter()
            .map(|n| StepInfo::new(*n, format!("{} desc", n)))
            .collect()
    }

    fn recorder(broadcaster: &ProgressBroadcaster, run_id: &str) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        broadcaster.subscribe(run_id, move |m| sink.lock().unwrap().push(m.to_string()));
        seen
    }

    #[test]
    fn test_snapshot_partition() {
        let plan = plan(&["a", "b", "c"]);
        for cursor in 0..=5 {
            let snapshot = ProgressSnapshot::at(&plan, cursor);
            assert_eq!(snapshot.executed.len() + snapshot.running.len(), 3);
            assert_eq!(snapshot.executed.as_slice(), &plan[..snapshot.executed.len()]);
        }
    }

    #[test]
    fn test_snapshot_serialization_shape() {
        let event = ProgressEvent::Progress(ProgressSnapshot::at(&plan(&["a", "b"]), 1));
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "progress");
        assert_eq!(json["executed"][0]["name"], "a");
        assert_eq!(json["executed"][0]["description"], "a desc");
        assert_eq!(json["running"][0]["name"], "b");
    }

    #[test]
    fn test_terminal_events() {
        let completed = ProgressEvent::Completed { run_id: "r".into() };
        assert!(completed.is_terminal());
        assert!(!ProgressEvent::Progress(ProgressSnapshot::at(&[], 0)).is_terminal());

        let json = serde_json::to_value(&completed).unwrap();
        assert_eq!(json["type"], "completed");
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let broadcaster = ProgressBroadcaster::new();
        assert_eq!(broadcaster.publish("r1", "hello"), 0);

        let late = recorder(&broadcaster, "r1");
        assert!(late.lock().unwrap().is_empty());
    }

    #[test]
    fn test_publish_in_registration_order() {
        let broadcaster = ProgressBroadcaster::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            broadcaster.subscribe("r1", move |_| order.lock().unwrap().push(label));
        }

        assert_eq!(broadcaster.publish("r1", "m"), 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_runs_isolated() {
        let broadcaster = ProgressBroadcaster::new();
        let one = recorder(&broadcaster, "one");
        let two = recorder(&broadcaster, "two");

        broadcaster.publish("one", "for one");

        assert_eq!(*one.lock().unwrap(), vec!["for one".to_string()]);
        assert!(two.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let broadcaster = ProgressBroadcaster::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let id = broadcaster.subscribe("r1", move |_| *counter.lock().unwrap() += 1);

        assert!(broadcaster.unsubscribe("r1", id));
        assert!(!broadcaster.unsubscribe("r1", id));
        assert_eq!(broadcaster.subscriber_count("r1"), 0);

        broadcaster.publish("r1", "m");
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn test_panicking_observer_isolated() {
        let broadcaster = ProgressBroadcaster::new();
        broadcaster.subscribe("r1", |_| panic!("observer failure"));
        let healthy = recorder(&broadcaster, "r1");

        assert_eq!(broadcaster.publish("r1", "m"), 1);
        assert_eq!(*healthy.lock().unwrap(), vec!["m".to_string()]);
        assert_eq!(broadcaster.publish("r1", "n"), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&broadcaster);
        let inner_slot = Arc::clone(&slot);
        let id = broadcaster.subscribe("r1", move |_| {
            if let Some(id) = *inner_slot.lock().unwrap() {
                inner.unsubscribe("r1", id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(broadcaster.publish("r1", "m"), 1);
        assert_eq!(broadcaster.subscriber_count("r1"), 0);
    }

    #[test]
    fn test_concurrent_subscribe_and_publish() {
        let broadcaster = Arc::new(ProgressBroadcaster::new());

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let broadcaster = Arc::clone(&broadcaster);
                thread::spawn(move || {
                    let run_id = format!("run-{}", i % 2);
                    let id = broadcaster.subscribe(&run_id, |_| {});
                    broadcaster.publish(&run_id, "tick");
                    broadcaster.unsubscribe(&run_id, id);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(broadcaster.subscriber_count("run-0"), 0);
        assert_eq!(broadcaster.subscriber_count("run-1"), 0);
    }

    #[test]
    fn test_channel_subscription_unsubscribes_on_drop() {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let mut subscription = broadcaster.subscribe_channel("r1");
        assert_eq!(subscription.run_id(), "r1");

        broadcaster.publish("r1", "queued");
        assert_eq!(subscription.try_recv().as_deref(), Some("queued"));
        assert!(subscription.try_recv().is_none());

        drop(subscription);
        assert_eq!(broadcaster.subscriber_count("r1"), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription_from_worker_thread() {
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let mut subscription = broadcaster.subscribe_channel("r1");

        let publisher = Arc::clone(&broadcaster);
        thread::spawn(move || {
            publisher.publish_event("r1", &ProgressEvent::Completed { run_id: "r1".into() });
        });

        let message = subscription.recv().await.unwrap();
        let event: ProgressEvent = serde_json::from_str(&message).unwrap();
        assert!(event.is_terminal());
    }
}
