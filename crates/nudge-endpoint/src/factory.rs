//! Background producer turning an endpoint's raw feed into buffered events.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use nudge_store::{CachedStack, DocumentStore};
use tracing::{debug, error, info, warn};

use crate::{Event, EventSource, EventsError, EventsResult, KnownEvents};

/// Prefix of the delivered-events ledger name; the endpoint key is appended.
pub const DELIVERED_LEDGER_NAME_PREFIX: &str = "delivered_events";

const DEFAULT_CHECK_EVERY_MS: u64 = 10_000;
const DEFAULT_BUFFER_LIMIT: usize = 10_000;
const DEFAULT_DELIVERED_LEDGER_LENGTH: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsFactoryConfig {
    pub check_every: Duration,
    /// Maximum number of buffered events; further events are rejected until
    /// the consumer drains the buffer.
    pub buffer_limit: usize,
    /// Bound of the delivered ledger, `None` for unbounded.
    pub delivered_ledger_length: Option<usize>,
}

impl Default for EventsFactoryConfig {
    fn default() -> Self {
        Self {
            check_every: Duration::from_millis(DEFAULT_CHECK_EVERY_MS),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            delivered_ledger_length: Some(DEFAULT_DELIVERED_LEDGER_LENGTH),
        }
    }
}

impl EventsFactoryConfig {
    fn check_every_ms(&self) -> u64 {
        u64::try_from(self.check_every.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Name of the delivered ledger used by the factory of `endpoint`.
pub fn delivered_ledger_name(endpoint: &str) -> String {
    format!("{DELIVERED_LEDGER_NAME_PREFIX}:{endpoint}")
}

/// Buffered events plus the hashes most recently handed to the consumer.
/// Both live under one lock so a hash is always in one of them until the
/// ledger read of the next collection sees it.
#[derive(Default)]
struct EventQueue {
    pending: VecDeque<Event>,
    pulled: VecDeque<String>,
}

impl EventQueue {
    fn remember_pulled(&mut self, hash: String, limit: usize) {
        if self.pulled.contains(&hash) {
            return;
        }
        self.pulled.push_back(hash);
        while self.pulled.len() > limit {
            self.pulled.pop_front();
        }
    }
}

pub struct EventsFactory {
    source: Arc<dyn EventSource>,
    delivered: CachedStack,
    queue: Mutex<EventQueue>,
    config: EventsFactoryConfig,
    running: AtomicBool,
    exit_reason: Mutex<Option<String>>,
}

impl std::fmt::Debug for EventsFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventsFactory")
            .field("endpoint", &self.source.endpoint_key())
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl EventsFactory {
    pub async fn open(
        source: Arc<dyn EventSource>,
        store: Arc<dyn DocumentStore>,
        config: EventsFactoryConfig,
    ) -> EventsResult<Self> {
        let delivered = CachedStack::open(
            store,
            delivered_ledger_name(source.endpoint_key()),
            config.delivered_ledger_length,
        )
        .await?;
        Ok(Self {
            source,
            delivered,
            queue: Mutex::new(EventQueue::default()),
            config,
            running: AtomicBool::new(false),
            exit_reason: Mutex::new(None),
        })
    }

    pub fn endpoint_key(&self) -> &str {
        self.source.endpoint_key()
    }

    pub fn config(&self) -> &EventsFactoryConfig {
        &self.config
    }

    pub fn delivered(&self) -> &CachedStack {
        &self.delivered
    }

    pub fn buffered_len(&self) -> usize {
        self.lock_queue().pending.len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, EventQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pulled_limit(&self) -> usize {
        self.config
            .delivered_ledger_length
            .unwrap_or(DEFAULT_DELIVERED_LEDGER_LENGTH)
            .max(1)
    }

    /// Hashes currently buffered plus every hash in the delivered ledger.
    pub async fn known_events(&self) -> EventsResult<KnownEvents> {
        let buffered = self
            .lock_queue()
            .pending
            .iter()
            .map(Event::hash)
            .collect::<Vec<_>>();
        let delivered = self.delivered.items().await?;
        Ok(KnownEvents::new(buffered, delivered))
    }

    /// Builds fresh events and enqueues those not already buffered or
    /// delivered. Returns how many were enqueued.
    pub async fn collect_new_events(&self) -> EventsResult<usize> {
        let known = self.known_events().await?;
        let events = self
            .source
            .build_events(&known)
            .await
            .map_err(EventsError::Source)?;
        let observed = events.len();

        // Events pulled while the source was building are no longer buffered
        // and may not be in `known` yet; `queue.pulled` covers them.
        let mut queue = self.lock_queue();
        let mut skip = queue
            .pending
            .iter()
            .map(Event::hash)
            .chain(queue.pulled.iter().cloned())
            .collect::<HashSet<_>>();
        let mut enqueued = 0_usize;
        let mut rejected = 0_usize;
        for event in events {
            let hash = event.hash();
            if known.is_delivered(&hash) || skip.contains(&hash) {
                continue;
            }
            if queue.pending.len() >= self.config.buffer_limit {
                rejected += 1;
                continue;
            }
            debug!(endpoint = %self.endpoint_key(), event = %hash, name = %event.name(), "event buffered");
            skip.insert(hash);
            queue.pending.push_back(event);
            enqueued += 1;
        }
        drop(queue);

        if rejected > 0 {
            warn!(
                endpoint = %self.endpoint_key(),
                rejected,
                buffer_limit = self.config.buffer_limit,
                "event buffer full, rejected events will be observed again"
            );
        }
        debug!(endpoint = %self.endpoint_key(), observed, enqueued, "events collected");
        Ok(enqueued)
    }

    /// Pops the oldest buffered event and records it as delivered.
    pub async fn pull_event(&self) -> EventsResult<Option<Event>> {
        let limit = self.pulled_limit();
        let (event, hash) = {
            let mut queue = self.lock_queue();
            let Some(event) = queue.pending.pop_front() else {
                return Ok(None);
            };
            let hash = event.hash();
            queue.remember_pulled(hash.clone(), limit);
            (event, hash)
        };
        if let Err(error) = self.delivered.push(&hash).await {
            let mut queue = self.lock_queue();
            queue.pulled.retain(|pulled| pulled != &hash);
            queue.pending.push_front(event);
            return Err(error.into());
        }
        Ok(Some(event))
    }

    /// Puts a pulled event back at the head of the buffer so the next drain
    /// handles it first. Its hash stays in the delivered ledger.
    pub fn requeue(&self, event: Event) {
        debug!(endpoint = %self.endpoint_key(), event = %event.hash(), "event requeued");
        self.lock_queue().pending.push_front(event);
    }

    /// Spawns the producer loop. Returns false when it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self
            .exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        info!(
            endpoint = %self.endpoint_key(),
            check_every_ms = self.config.check_every_ms(),
            "events factory started"
        );
        let guard = RunningGuard(Arc::clone(self));
        tokio::spawn(async move {
            let reason = match guard.0.run_loop().await {
                Ok(()) => "events loop exited".to_string(),
                Err(error) => error.to_string(),
            };
            error!(endpoint = %guard.0.endpoint_key(), reason = %reason, "events factory stopped");
            guard.record_exit(reason);
        });
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Why the producer loop ended, if it has.
    pub fn exit_reason(&self) -> Option<String> {
        self.exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run_loop(&self) -> EventsResult<()> {
        let mut interval = tokio::time::interval(self.config.check_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.collect_new_events().await {
                Ok(_) => {}
                Err(EventsError::Store(error)) => return Err(EventsError::Store(error)),
                Err(error) => {
                    warn!(endpoint = %self.endpoint_key(), error = %error, "events cycle aborted");
                }
            }
        }
    }
}

/// Clears the running flag when the producer task ends, including by panic.
struct RunningGuard(Arc<EventsFactory>);

impl RunningGuard {
    fn record_exit(&self, reason: String) {
        *self
            .0
            .exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.record_exit("events loop panicked".to_string());
        }
        self.0.running.store(false, Ordering::Release);
    }
}
