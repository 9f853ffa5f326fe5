//! Change events and observer notification.
//!
//! The root store emits one batch of [`ChangeEvent`]s per committed
//! transaction. A single dedicated notifier thread delivers batches in
//! commit order to callback observers and channel subscribers. Commits that
//! wait for notification (`commit_and_wait`) block on an ack from the
//! notifier; deferred commits (`commit`) enqueue and return.

use crate::entity::EntityId;
use crate::types::{SequenceNumber, TypeName};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Kind of committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The entity was created.
    Created,
    /// The entity's payload was replaced.
    Updated,
    /// The entity was deleted.
    Deleted,
}

/// A single committed change, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Sequence number of the commit that produced this event.
    pub sequence: SequenceNumber,
    /// Type of the affected entity.
    pub type_name: TypeName,
    /// Identity of the affected entity.
    pub entity_id: EntityId,
    /// Kind of change.
    pub kind: ChangeKind,
    /// New payload for creations and updates, `None` for deletions.
    pub payload: Option<Vec<u8>>,
}

impl ChangeEvent {
    /// Creates a creation event.
    #[must_use]
    pub fn created(
        sequence: SequenceNumber,
        type_name: TypeName,
        entity_id: EntityId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            type_name,
            entity_id,
            kind: ChangeKind::Created,
            payload: Some(payload),
        }
    }

    /// Creates an update event.
    #[must_use]
    pub fn updated(
        sequence: SequenceNumber,
        type_name: TypeName,
        entity_id: EntityId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sequence,
            type_name,
            entity_id,
            kind: ChangeKind::Updated,
            payload: Some(payload),
        }
    }

    /// Creates a deletion event.
    #[must_use]
    pub fn deleted(sequence: SequenceNumber, type_name: TypeName, entity_id: EntityId) -> Self {
        Self {
            sequence,
            type_name,
            entity_id,
            kind: ChangeKind::Deleted,
            payload: None,
        }
    }
}

/// How a commit interacts with observer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotifyMode {
    /// Block until every observer has processed the batch.
    Wait,
    /// Enqueue the batch and return; observers run afterwards.
    Deferred,
}

type ObserverFn = dyn Fn(&[ChangeEvent]) + Send + Sync;

struct NotifyJob {
    events: Vec<ChangeEvent>,
    ack: Option<Sender<()>>,
}

/// Observer registry plus the dedicated delivery thread.
pub(crate) struct Notifier {
    jobs: Option<Sender<NotifyJob>>,
    observers: Arc<RwLock<Vec<Box<ObserverFn>>>>,
    subscribers: Arc<RwLock<Vec<Sender<ChangeEvent>>>>,
    worker: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Spawns the notifier thread.
    pub(crate) fn spawn() -> Self {
        let (jobs, job_rx) = mpsc::channel::<NotifyJob>();
        let observers: Arc<RwLock<Vec<Box<ObserverFn>>>> = Arc::new(RwLock::new(Vec::new()));
        let subscribers: Arc<RwLock<Vec<Sender<ChangeEvent>>>> = Arc::new(RwLock::new(Vec::new()));

        let worker_observers = Arc::clone(&observers);
        let worker_subscribers = Arc::clone(&subscribers);
        let worker = thread::Builder::new()
            .name("scopedb-notify".to_string())
            .spawn(move || run_notifier(job_rx, &worker_observers, &worker_subscribers))
            .expect("failed to spawn notifier thread");

        Self {
            jobs: Some(jobs),
            observers,
            subscribers,
            worker: Some(worker),
        }
    }

    /// Registers a callback observer.
    ///
    /// Observers receive each commit's events as one batch, in commit order,
    /// on the notifier thread.
    pub(crate) fn observe(&self, observer: impl Fn(&[ChangeEvent]) + Send + Sync + 'static) {
        self.observers.write().push(Box::new(observer));
    }

    /// Subscribes to the event stream.
    ///
    /// Disconnected subscribers are pruned on the next delivery.
    pub(crate) fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Returns the number of registered callback observers.
    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns the number of live channel subscribers.
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Enqueues one commit's events for delivery.
    ///
    /// Returns the ack receiver for `Wait` dispatches; the caller blocks on
    /// it after releasing any store locks. Queue order is delivery order, so
    /// callers enqueue while the commit is still serialized.
    pub(crate) fn enqueue(
        &self,
        events: Vec<ChangeEvent>,
        mode: NotifyMode,
    ) -> Option<Receiver<()>> {
        if events.is_empty() {
            return None;
        }
        let jobs = self.jobs.as_ref()?;
        match mode {
            NotifyMode::Deferred => {
                let _ = jobs.send(NotifyJob { events, ack: None });
                None
            }
            NotifyMode::Wait => {
                let (ack_tx, ack_rx) = mpsc::channel();
                jobs.send(NotifyJob {
                    events,
                    ack: Some(ack_tx),
                })
                .ok()
                .map(|()| ack_rx)
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain remaining batches and exit.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_notifier(
    jobs: Receiver<NotifyJob>,
    observers: &RwLock<Vec<Box<ObserverFn>>>,
    subscribers: &RwLock<Vec<Sender<ChangeEvent>>>,
) {
    while let Ok(job) = jobs.recv() {
        {
            let observers = observers.read();
            for observer in observers.iter() {
                observer(&job.events);
            }
        }
        {
            let mut subscribers = subscribers.write();
            subscribers.retain(|tx| job.events.iter().all(|event| tx.send(event.clone()).is_ok()));
        }
        if let Some(ack) = job.ack {
            let _ = ack.send(());
        }
    }
}
