//! Notifications delivered to the host UI layer
//!
//! The core never calls back into the UI directly. Every asynchronous
//! outcome is pushed as an `(event name, JSON payload)` pair into a
//! [`NotificationSink`]; delivery is fire-and-forget.

use crate::offline::engine::EngineError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single event for the host UI layer
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub name: String,
    pub payload: Value,
}

impl Notification {
    pub fn new(name: &str, payload: Value) -> Self {
        Self {
            name: name.to_string(),
            payload,
        }
    }

    /// Builds a notification from any serializable payload
    pub fn from_payload<P: Serialize>(name: &str, payload: &P) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            log::error!("failed to serialize '{}' payload: {}", name, e);
            Value::Null
        });
        Self::new(name, payload)
    }
}

/// Receiver of bridge notifications
pub trait NotificationSink: Send + Sync {
    /// Deliver an event. Must not block the caller.
    fn emit(&self, name: &str, payload: Value);
}

/// Sink that forwards notifications into a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<Notification>,
}

impl ChannelSink {
    /// Creates a sink and the receiving end for the host to drain
    pub fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, name: &str, payload: Value) {
        if self.tx.send(Notification::new(name, payload)).is_err() {
            log::debug!("notification '{}' dropped: receiver is gone", name);
        }
    }
}

/// Sink that only writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn emit(&self, name: &str, payload: Value) {
        log::info!("{}: {}", name, payload);
    }
}

/// Emits a typed payload through a sink
pub(crate) fn emit<P: Serialize>(sink: &dyn NotificationSink, name: &str, payload: &P) {
    let notification = Notification::from_payload(name, payload);
    sink.emit(&notification.name, notification.payload);
}

// --- payloads --------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackCreatedPayload {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackProgressPayload {
    pub uuid: String,
    pub name: String,
    /// Percentage in [0, 100]
    pub progress: f64,
    /// Whether `progress` is based on an exact required-resource count
    pub determinate: bool,
    pub is_complete: bool,
    pub completed_resource_count: u64,
    pub required_resource_count: i64,
    pub completed_resource_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackErrorPayload {
    pub uuid: String,
    pub reason: String,
    pub message: String,
}

impl PackErrorPayload {
    pub fn from_engine(uuid: &str, error: &EngineError) -> Self {
        Self {
            uuid: uuid.to_string(),
            reason: error.reason.to_string(),
            message: error.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLimitPayload {
    pub uuid: String,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacksLoadedPayload {
    pub packs: Vec<PackEntryPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackEntryPayload {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackDeletedPayload {
    pub uuid: String,
}
