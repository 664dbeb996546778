//! # Message bus
//!
//! In-process publish/subscribe between the mower services.
//!
//! - Handlers are async and run in registration order, each awaited before the next.
//! - Delivery on one topic is FIFO: a per-topic dispatch lock is held across the fan-out of one
//!   event. A handler must therefore not publish on the topic it is handling.
//! - Persistent publications are stored before delivery and can be replayed, in timestamp order,
//!   by a bus built later over the same store.
//!
//! - Detached publications are stamped when they are made and delivered, in that order, by a
//!   single dispatcher task owned by the bus.
//!
//! Replay and concurrent live publications on the same topic are not ordered with respect to each
//! other.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod persistence;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use async_trait::async_trait;
use comms_if::bus::{BusEventError, MessageBusEvent, Payload, PersistenceTier};
use log::{debug, error, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub use persistence::{ArchiveStore, MemoryStore, PersistenceError, PersistenceLayer};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A subscriber to a bus topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: MessageBusEvent);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct MessageBus {
    source_service: String,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    dispatch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    persistence: Option<Arc<dyn PersistenceLayer>>,

    /// Queue of the detached dispatcher, created on the first detached publication
    detached: Mutex<Option<UnboundedSender<MessageBusEvent>>>,
}

/// Adapter letting an async closure act as an [`EventHandler`].
struct FnHandler<F>(F);

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid event: {0}")]
    Event(#[from] BusEventError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(MessageBusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, event: MessageBusEvent) {
        (self.0)(event).await
    }
}

impl MessageBus {
    /// Create a bus. Events published through it carry `source_service`.
    pub fn new(source_service: &str, persistence: Option<Arc<dyn PersistenceLayer>>) -> Self {
        Self {
            source_service: source_service.to_string(),
            handlers: RwLock::new(HashMap::new()),
            dispatch_locks: Mutex::new(HashMap::new()),
            persistence,
            detached: Mutex::new(None),
        }
    }

    /// Register a handler on a topic, after any already registered.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);

        debug!("New subscriber on {}", topic);
    }

    /// Register an async closure as a handler.
    pub fn subscribe_fn<F, Fut>(&self, topic: &str, handler: F)
    where
        F: Fn(MessageBusEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(topic, Arc::new(FnHandler(handler)));
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map(|h| h.len()).unwrap_or(0)
    }

    /// Publish a payload on a topic.
    ///
    /// Persistent publications use the critical tier and are stored before delivery, others are
    /// best effort. Topics reserved for critical traffic are rejected when not persistent.
    ///
    /// Returns the event that was delivered.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Payload,
        persistent: bool,
    ) -> Result<MessageBusEvent, BusError> {
        let event = MessageBusEvent::new(
            topic,
            util::time::now_us(),
            payload,
            &self.source_service,
            PersistenceTier::from_persistent(persistent),
        )?
        .with_message_id(uuid::Uuid::new_v4().to_string());

        self.publish_event(event).await
    }

    /// Publish an already built event.
    pub async fn publish_event(&self, event: MessageBusEvent) -> Result<MessageBusEvent, BusError> {
        event.validate()?;

        // Persist first so a crash during delivery cannot lose a critical event
        if event.persistence_tier() == PersistenceTier::Critical {
            self.persist(&event)?;
        }

        self.dispatch(&event).await;

        Ok(event)
    }

    /// Publish from a synchronous context.
    ///
    /// The event is built, and so timestamped, before this returns. Delivery happens on the bus's
    /// dispatcher task, in the order the detached publications were made. Failures are logged.
    /// Without a tokio runtime the event is dropped with a warning.
    pub fn publish_detached(self: &Arc<Self>, topic: &str, payload: Payload, persistent: bool) {
        let event = match MessageBusEvent::new(
            topic,
            util::time::now_us(),
            payload,
            &self.source_service,
            PersistenceTier::from_persistent(persistent),
        ) {
            Ok(e) => e.with_message_id(uuid::Uuid::new_v4().to_string()),
            Err(e) => {
                error!("Could not publish on {}: {}", topic, e);
                return;
            }
        };

        // Sending under the lock keeps the queue order equal to the call order
        let mut detached = self.detached.lock();

        if let Some(tx) = detached.as_ref() {
            match tx.send(event) {
                Ok(()) => return,
                // The runtime that owned the dispatcher has gone, start another one
                Err(mpsc::error::SendError(e)) => return self.start_dispatcher(&mut detached, e),
            }
        }

        self.start_dispatcher(&mut detached, event);
    }

    /// Spawn the detached dispatcher on the current runtime and queue its first event.
    fn start_dispatcher(
        self: &Arc<Self>,
        slot: &mut Option<UnboundedSender<MessageBusEvent>>,
        first: MessageBusEvent,
    ) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("No runtime to publish {} on, event dropped", first.topic());
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(first).is_err() {
            return;
        }

        handle.spawn(run_dispatcher(Arc::downgrade(self), rx));
        *slot = Some(tx);
        debug!("Detached dispatcher started");
    }

    /// Re-deliver the stored events of a topic to the current subscribers, oldest first.
    ///
    /// Returns the number of events delivered.
    pub async fn replay_persistent(&self, topic: &str) -> Result<usize, BusError> {
        let store = match &self.persistence {
            Some(s) => s.clone(),
            None => return Ok(0),
        };

        let mut records = store.load(topic)?;
        records.sort_by_key(|r| r.timestamp_us);

        let count = records.len();
        for record in records {
            let event = MessageBusEvent::new(
                topic,
                record.timestamp_us,
                record.payload,
                &self.source_service,
                PersistenceTier::Critical,
            )?;
            self.dispatch(&event).await;
        }

        debug!("Replayed {} events on {}", count, topic);
        Ok(count)
    }

    fn persist(&self, event: &MessageBusEvent) -> Result<(), BusError> {
        match &self.persistence {
            Some(store) => {
                store.save(event.topic(), event.timestamp_us, &event.payload)?;
                Ok(())
            }
            None => {
                warn!(
                    "Critical event on {} published without a persistence layer",
                    event.topic()
                );
                Ok(())
            }
        }
    }

    async fn dispatch(&self, event: &MessageBusEvent) {
        let topic_lock = self
            .dispatch_locks
            .lock()
            .entry(event.topic().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _ordered = topic_lock.lock().await;

        let handlers = match self.handlers.read().get(event.topic()) {
            Some(h) => h.clone(),
            None => {
                trace!("No subscribers on {}", event.topic());
                return;
            }
        };

        for handler in handlers {
            handler.handle(event.clone()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Deliver queued detached events one at a time until the bus is dropped.
async fn run_dispatcher(bus: Weak<MessageBus>, mut rx: UnboundedReceiver<MessageBusEvent>) {
    while let Some(event) = rx.recv().await {
        let bus = match bus.upgrade() {
            Some(b) => b,
            None => break,
        };

        let topic = event.topic().to_string();
        if let Err(e) = bus.publish_event(event).await {
            error!("Could not publish on {}: {}", topic, e);
        }
    }

    trace!("Detached dispatcher exited");
}
