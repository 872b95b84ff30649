//! Topic-based publish/subscribe
//!
//! [`MessageBus`] fans each published [`Message`] out to every handler
//! subscribed to its [`Topic`]. Publishing only enqueues; a single dispatcher
//! thread delivers messages in publish order. A handler that panics is
//! counted and skipped, the remaining handlers still run.
//!
//! # Shutdown
//!
//! [`MessageBus::stop`] drops the queue sender and joins the dispatcher,
//! which delivers everything already queued before it exits. Publishing on a
//! stopped bus returns `false`.
//!
//! # Example
//!
//! ```
//! use reservoir_rs::messaging::{MessageBus, Topic};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let bus = MessageBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! bus.subscribe(Topic::SystemStatus, move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! bus.start().unwrap();
//! assert!(bus.publish(Topic::SystemStatus, "online", "demo"));
//! bus.stop();
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! ```

use crate::error::{ReservoirError, Result};
use crate::pool::panic_message;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

/// Channels a [`Message`] can be published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "sensor.water.level")]
    SensorWaterLevel,
    #[serde(rename = "sensor.temperature")]
    SensorTemperature,
    #[serde(rename = "sensor.flow.rate")]
    SensorFlowRate,
    #[serde(rename = "sensor.water.quality")]
    SensorWaterQuality,
    #[serde(rename = "alert.water.high")]
    AlertHighWater,
    #[serde(rename = "alert.water.low")]
    AlertLowWater,
    #[serde(rename = "alert.device.fault")]
    AlertDeviceFault,
    #[serde(rename = "system.heartbeat")]
    SystemHeartbeat,
    #[serde(rename = "system.status")]
    SystemStatus,
    #[serde(rename = "system.control")]
    SystemControl,
}

impl Topic {
    /// Every topic
    pub const ALL: [Topic; 10] = [
        Topic::SensorWaterLevel,
        Topic::SensorTemperature,
        Topic::SensorFlowRate,
        Topic::SensorWaterQuality,
        Topic::AlertHighWater,
        Topic::AlertLowWater,
        Topic::AlertDeviceFault,
        Topic::SystemHeartbeat,
        Topic::SystemStatus,
        Topic::SystemControl,
    ];

    /// Dotted wire name, e.g. `alert.water.high`
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SensorWaterLevel => "sensor.water.level",
            Topic::SensorTemperature => "sensor.temperature",
            Topic::SensorFlowRate => "sensor.flow.rate",
            Topic::SensorWaterQuality => "sensor.water.quality",
            Topic::AlertHighWater => "alert.water.high",
            Topic::AlertLowWater => "alert.water.low",
            Topic::AlertDeviceFault => "alert.device.fault",
            Topic::SystemHeartbeat => "system.heartbeat",
            Topic::SystemStatus => "system.status",
            Topic::SystemControl => "system.control",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ReservoirError;

    fn from_str(s: &str) -> Result<Self> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ReservoirError::Validation(format!("unknown topic {:?}", s)))
    }
}

/// One published message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: Topic,
    pub content: String,
    /// Who published it (a sensor id, `pipeline`, ...)
    pub sender_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(topic: Topic, content: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            topic,
            content: content.into(),
            sender_id: sender_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Subscriber callback
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Snapshot of bus activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages accepted by publish
    pub published: u64,
    /// Messages taken off the queue by the dispatcher
    pub consumed: u64,
    /// Consumed messages with no subscriber
    pub unrouted: u64,
    /// Handler calls that panicked
    pub handler_failures: u64,
    /// Messages waiting for dispatch
    pub queued: usize,
    /// Topics with at least one subscriber
    pub topics: usize,
}

#[derive(Default)]
struct BusShared {
    subscribers: RwLock<HashMap<Topic, Vec<MessageHandler>>>,
    published: AtomicU64,
    consumed: AtomicU64,
    unrouted: AtomicU64,
    handler_failures: AtomicU64,
}

impl BusShared {
    fn handlers(&self, topic: Topic) -> Vec<MessageHandler> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
            .unwrap_or_default()
    }

    fn dispatch(&self, message: &Message) {
        // Handlers run outside the lock so they may publish or subscribe
        let handlers = self.handlers(message.topic);
        if handlers.is_empty() {
            self.unrouted.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("No subscriber for {}", message.topic);
        }

        for handler in handlers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                self.handler_failures.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    "Handler for {} panicked: {}",
                    message.topic,
                    panic_message(payload.as_ref())
                );
            }
        }
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-process topic bus with one dispatcher thread
pub struct MessageBus {
    shared: Arc<BusShared>,
    sender: Mutex<Option<Sender<Message>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Create a stopped bus
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared::default()),
            sender: Mutex::new(None),
            dispatcher: Mutex::new(None),
        }
    }

    /// Spawn the dispatcher thread. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut sender = lock(&self.sender);
        if sender.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded::<Message>();
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("message-bus".to_string())
            .spawn(move || dispatch_loop(rx, shared))?;

        *sender = Some(tx);
        *lock(&self.dispatcher) = Some(handle);
        tracing::info!("Message bus started");
        Ok(())
    }

    /// Deliver everything queued, then stop the dispatcher. Idempotent.
    pub fn stop(&self) {
        let Some(sender) = lock(&self.sender).take() else {
            return;
        };
        drop(sender);

        if let Some(handle) = lock(&self.dispatcher).take() {
            if handle.join().is_err() {
                tracing::error!("Message bus dispatcher panicked");
            }
        }
        tracing::info!("Message bus stopped");
    }

    /// True between [`start`](Self::start) and [`stop`](Self::stop)
    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Publish `content` on `topic`; false if the bus is not running
    pub fn publish(
        &self,
        topic: Topic,
        content: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> bool {
        self.publish_message(Message::new(topic, content, sender_id))
    }

    /// Publish a prepared message; false if the bus is not running
    pub fn publish_message(&self, message: Message) -> bool {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        self.shared.published.fetch_add(1, Ordering::SeqCst);
        if sender.send(message).is_err() {
            self.shared.published.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Add a handler for `topic`; returns the topic's subscriber count
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> usize
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut subscribers = self
            .shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let handlers = subscribers.entry(topic).or_default();
        handlers.push(Arc::new(handler));
        tracing::debug!("Subscribed to {} ({} handlers)", topic, handlers.len());
        handlers.len()
    }

    /// Drop every handler of `topic`; false if it had none
    pub fn unsubscribe(&self, topic: Topic) -> bool {
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&topic)
            .is_some()
    }

    /// Number of handlers on `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.shared.handlers(topic).len()
    }

    /// Snapshot of the bus counters
    pub fn stats(&self) -> BusStats {
        let consumed = self.shared.consumed.load(Ordering::SeqCst);
        BusStats {
            consumed,
            published: self.shared.published.load(Ordering::SeqCst),
            unrouted: self.shared.unrouted.load(Ordering::SeqCst),
            handler_failures: self.shared.handler_failures.load(Ordering::SeqCst),
            queued: lock(&self.sender).as_ref().map(|s| s.len()).unwrap_or(0),
            topics: self
                .shared
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

fn dispatch_loop(receiver: Receiver<Message>, shared: Arc<BusShared>) {
    // Keeps delivering after the sender is dropped until the queue is empty
    while let Ok(message) = receiver.recv() {
        shared.dispatch(&message);
    }
}
