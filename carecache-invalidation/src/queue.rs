//! Bounded background queue feeding the dispatcher.
//!
//! Write paths submit events and return; a fixed pool of workers drains the
//! queue into [`InvalidationDispatcher::handle_event`].

use crate::dispatcher::InvalidationDispatcher;
use crate::error::{InvalidationError, InvalidationResult};
use crate::event::InvalidationEvent;
use carecache_log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// What `submit` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullPolicy {
    /// Wait for a free slot.
    #[default]
    Block,
    /// Discard the oldest queued event to make room.
    DropOldest,
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued events
    pub capacity: usize,

    /// Number of worker tasks
    pub workers: usize,

    /// Behaviour when full
    pub full_policy: FullPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 2,
            full_policy: FullPolicy::Block,
        }
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Events waiting for a worker.
    pub queued: usize,
    pub processed: u64,
    /// Events discarded under [`FullPolicy::DropOldest`].
    pub dropped: u64,
}

struct State {
    events: VecDeque<InvalidationEvent>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    policy: FullPolicy,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    /// Enqueue if there is room (or room can be made); hand the event back
    /// otherwise.
    fn push(&self, event: InvalidationEvent) -> Result<(), Pushed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Pushed::Closed);
        }
        if state.events.len() >= self.capacity {
            match self.policy {
                FullPolicy::Block => return Err(Pushed::Full(event)),
                FullPolicy::DropOldest => {
                    if let Some(oldest) = state.events.pop_front() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("invalidation queue full, dropped {}", oldest.event_type);
                    }
                }
            }
        }
        state.events.push_back(event);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }
}

enum Pushed {
    Closed,
    Full(InvalidationEvent),
}

/// Bounded invalidation queue with a worker pool.
pub struct InvalidationQueue {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl InvalidationQueue {
    /// Start the workers. Must be called inside a Tokio runtime.
    pub fn start(dispatcher: Arc<InvalidationDispatcher>, config: QueueConfig) -> Self {
        let capacity = config.capacity.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
            policy: config.full_policy,
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let workers = config.workers.max(1);
        let handles = (0..workers)
            .map(|id| tokio::spawn(run_worker(id, shared.clone(), dispatcher.clone())))
            .collect();

        info!(
            "invalidation queue started: capacity {}, {} workers, {:?} when full",
            capacity, workers, config.full_policy
        );

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    /// Queue `event`, waiting for room under [`FullPolicy::Block`].
    pub async fn submit(&self, event: InvalidationEvent) -> InvalidationResult<()> {
        let mut event = event;
        loop {
            let mut room = pin!(self.shared.not_full.notified());
            room.as_mut().enable();

            match self.shared.push(event) {
                Ok(()) => return Ok(()),
                Err(Pushed::Closed) => return Err(InvalidationError::QueueClosed),
                Err(Pushed::Full(returned)) => event = returned,
            }
            room.await;
        }
    }

    /// Queue `event` without waiting.
    ///
    /// Under [`FullPolicy::Block`] a full queue is [`InvalidationError::QueueFull`].
    pub fn try_submit(&self, event: InvalidationEvent) -> InvalidationResult<()> {
        self.shared.push(event).map_err(|pushed| match pushed {
            Pushed::Closed => InvalidationError::QueueClosed,
            Pushed::Full(_) => InvalidationError::QueueFull,
        })
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.shared.state.lock().events.len(),
            processed: self.shared.processed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Stop accepting events, let the workers drain what is queued, and wait
    /// for them to exit.
    pub async fn shutdown(&self) {
        self.shared.state.lock().closed = true;
        self.shared.not_empty.notify_waiters();
        self.shared.not_full.notify_waiters();

        let handles = std::mem::take(&mut *self.handles.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("invalidation worker ended abnormally: {}", e);
            }
        }
        info!(
            "invalidation queue stopped after {} events",
            self.shared.processed.load(Ordering::Relaxed)
        );
    }
}

impl Drop for InvalidationQueue {
    fn drop(&mut self) {
        // Idle workers exit once the queue is closed and empty.
        self.shared.state.lock().closed = true;
        self.shared.not_empty.notify_waiters();
    }
}

async fn run_worker(id: usize, shared: Arc<Shared>, dispatcher: Arc<InvalidationDispatcher>) {
    debug!("invalidation worker {} started", id);
    loop {
        let mut ready = pin!(shared.not_empty.notified());
        ready.as_mut().enable();

        let next = {
            let mut state = shared.state.lock();
            match state.events.pop_front() {
                Some(event) => Some(event),
                None if state.closed => break,
                None => None,
            }
        };

        match next {
            Some(event) => {
                shared.not_full.notify_one();
                dispatcher.handle_event(&event).await;
                shared.processed.fetch_add(1, Ordering::Relaxed);
            }
            None => ready.await,
        }
    }
    debug!("invalidation worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::rule::{InvalidationRule, RuleRegistry};
    use carecache_store::{CacheStore, SetOptions};

    fn dispatcher() -> Arc<InvalidationDispatcher> {
        let rules = RuleRegistry::new();
        rules
            .add_rule(InvalidationRule::new("user.updated").pattern("saas:user:{entityId}"))
            .unwrap();
        Arc::new(InvalidationDispatcher::new(
            Arc::new(CacheStore::in_memory()),
            Arc::new(rules),
        ))
    }

    fn user_event(id: usize) -> InvalidationEvent {
        InvalidationEvent::new(EventType::UserUpdated).with_entity_id(id.to_string())
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let dispatcher = dispatcher();
        for i in 0..20 {
            dispatcher
                .store()
                .set(&format!("saas:user:{}", i), &i, SetOptions::new())
                .await;
        }

        let queue = InvalidationQueue::start(dispatcher.clone(), QueueConfig::default());
        for i in 0..20 {
            queue.submit(user_event(i)).await.unwrap();
        }
        queue.shutdown().await;

        let stats = queue.stats();
        assert_eq!(stats.processed, 20);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.dropped, 0);
        assert!(!dispatcher.store().exists("saas:user:7").await);
        assert_eq!(dispatcher.invalidation_stats().successful_invalidations, 20);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = InvalidationQueue::start(dispatcher(), QueueConfig::default());
        queue.shutdown().await;

        assert!(queue.is_closed());
        assert!(matches!(
            queue.submit(user_event(1)).await,
            Err(InvalidationError::QueueClosed)
        ));
        assert!(matches!(
            queue.try_submit(user_event(1)),
            Err(InvalidationError::QueueClosed)
        ));
    }

    // Current-thread runtime: workers cannot run until the test yields, so
    // the queue fills deterministically.
    #[tokio::test]
    async fn test_drop_oldest_counts_discards() {
        let config = QueueConfig {
            capacity: 3,
            workers: 1,
            full_policy: FullPolicy::DropOldest,
        };
        let queue = InvalidationQueue::start(dispatcher(), config);

        for i in 0..5 {
            queue.try_submit(user_event(i)).unwrap();
        }
        let stats = queue.stats();
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.dropped, 2);

        queue.shutdown().await;
        assert_eq!(queue.stats().processed, 3);
    }

    #[tokio::test]
    async fn test_block_policy_rejects_try_submit_when_full() {
        let config = QueueConfig {
            capacity: 2,
            workers: 1,
            full_policy: FullPolicy::Block,
        };
        let queue = InvalidationQueue::start(dispatcher(), config);

        queue.try_submit(user_event(1)).unwrap();
        queue.try_submit(user_event(2)).unwrap();
        assert!(matches!(
            queue.try_submit(user_event(3)),
            Err(InvalidationError::QueueFull)
        ));

        // A blocking submit waits for the worker to free a slot.
        queue.submit(user_event(3)).await.unwrap();
        queue.shutdown().await;
        assert_eq!(queue.stats().processed, 3);
    }
}
