//! Priority-ordered message transform pipeline
//!
//! Transform layers (encryption, filtering, formatting) sit between the
//! protocol layer and message listeners. Each layer sees the output of the
//! layer before it and may rewrite or drop the event. Layers run in
//! ascending priority; layers sharing a priority run in registration order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Priority used by [`TransformPipeline::add_layer`]
pub const DEFAULT_TRANSFORM_PRIORITY: i32 = 1;

/// An instant message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    /// MIME type of `content`
    pub content_type: String,
    pub subject: Option<String>,
}

impl Message {
    /// Plain text message with a fresh id
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            content_type: "text/plain".to_string(),
            subject: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Same message with different content
    pub fn rewritten(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self.clone()
        }
    }
}

/// A message arrived from `from`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceived {
    pub message: Message,
    pub from: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageReceived {
    pub fn new(message: Message, from: impl Into<String>) -> Self {
        Self {
            message,
            from: from.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A message was (or is about to be) delivered to `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDelivered {
    pub message: Message,
    pub to: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageDelivered {
    pub fn new(message: Message, to: impl Into<String>) -> Self {
        Self {
            message,
            to: to.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Why a message could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryFailure {
    OfflineMessagesUnsupported,
    NetworkFailure,
    ProviderNotRegistered,
    InternalError,
    Unknown,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryFailure::OfflineMessagesUnsupported => "offline messages not supported",
            DeliveryFailure::NetworkFailure => "network failure",
            DeliveryFailure::ProviderNotRegistered => "provider not registered",
            DeliveryFailure::InternalError => "internal error",
            DeliveryFailure::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// A message could not be delivered to `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDeliveryFailed {
    pub message: Message,
    pub to: String,
    pub failure: DeliveryFailure,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageDeliveryFailed {
    pub fn new(message: Message, to: impl Into<String>, failure: DeliveryFailure) -> Self {
        Self {
            message,
            to: to.into(),
            failure,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// One stage of the pipeline
///
/// Every hook passes its input through unchanged by default. Returning
/// `None` (or an empty `Vec` for pending deliveries) drops the event and
/// stops the chain for it.
pub trait TransformLayer: Send + Sync {
    fn message_received(&self, event: MessageReceived) -> Option<MessageReceived> {
        Some(event)
    }

    /// Outgoing message about to be sent; may expand into several messages
    fn message_delivery_pending(&self, event: MessageDelivered) -> Vec<MessageDelivered> {
        vec![event]
    }

    fn message_delivered(&self, event: MessageDelivered) -> Option<MessageDelivered> {
        Some(event)
    }

    fn message_delivery_failed(&self, event: MessageDeliveryFailed) -> Option<MessageDeliveryFailed> {
        Some(event)
    }
}

/// Shared handle to a transform layer
pub type LayerRef = Arc<dyn TransformLayer>;

type Buckets = BTreeMap<i32, Vec<LayerRef>>;

/// Ordered, mutable chain of transform layers
pub struct TransformPipeline {
    layers: RwLock<Buckets>,
    default_priority: i32,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::with_default_priority(DEFAULT_TRANSFORM_PRIORITY)
    }

    /// Pipeline whose [`add_layer`](Self::add_layer) uses `priority`
    pub fn with_default_priority(priority: i32) -> Self {
        Self {
            layers: RwLock::new(BTreeMap::new()),
            default_priority: priority,
        }
    }

    pub fn default_priority(&self) -> i32 {
        self.default_priority
    }

    /// Register `layer` at the default priority
    pub fn add_layer(&self, layer: LayerRef) -> bool {
        self.add_layer_with_priority(layer, self.default_priority)
    }

    /// Register `layer` at `priority`
    ///
    /// Returns `false` if the same layer is already registered at any
    /// priority.
    pub fn add_layer_with_priority(&self, layer: LayerRef, priority: i32) -> bool {
        let mut buckets = self.layers.write();
        if Self::position(&buckets, &layer).is_some() {
            return false;
        }
        buckets.entry(priority).or_default().push(layer);
        debug!(priority, "Transform layer added");
        true
    }

    /// Unregister `layer` from whichever priority holds it
    pub fn remove_layer(&self, layer: &LayerRef) -> bool {
        let mut buckets = self.layers.write();
        let Some((priority, index)) = Self::position(&buckets, layer) else {
            return false;
        };
        if let Some(bucket) = buckets.get_mut(&priority) {
            bucket.remove(index);
            if bucket.is_empty() {
                buckets.remove(&priority);
            }
        }
        debug!(priority, "Transform layer removed");
        true
    }

    /// Whether `layer` is registered at any priority
    pub fn contains_layer(&self, layer: &LayerRef) -> bool {
        Self::position(&self.layers.read(), layer).is_some()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.read().is_empty()
    }

    fn position(buckets: &Buckets, layer: &LayerRef) -> Option<(i32, usize)> {
        buckets.iter().find_map(|(priority, bucket)| {
            bucket
                .iter()
                .position(|l| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(layer)))
                .map(|index| (*priority, index))
        })
    }

    // Traversal runs on a copy so layers may be added or removed meanwhile
    fn chain(&self) -> Vec<LayerRef> {
        self.layers.read().values().flatten().cloned().collect()
    }

    /// Run an incoming message through every layer
    ///
    /// `None` means a layer suppressed it.
    pub fn transform_received(&self, event: MessageReceived) -> Option<MessageReceived> {
        self.chain()
            .iter()
            .try_fold(event, |event, layer| layer.message_received(event))
    }

    pub fn transform_delivered(&self, event: MessageDelivered) -> Option<MessageDelivered> {
        self.chain()
            .iter()
            .try_fold(event, |event, layer| layer.message_delivered(event))
    }

    pub fn transform_delivery_failed(&self, event: MessageDeliveryFailed) -> Option<MessageDeliveryFailed> {
        self.chain()
            .iter()
            .try_fold(event, |event, layer| layer.message_delivery_failed(event))
    }

    /// Run an outgoing message through every layer
    ///
    /// Each layer is applied to every event produced by the previous one, so
    /// the result may hold zero, one or many messages to send.
    pub fn transform_delivery_pending(&self, event: MessageDelivered) -> Vec<MessageDelivered> {
        let mut current = vec![event];
        for layer in self.chain() {
            if current.is_empty() {
                break;
            }
            current = current
                .into_iter()
                .flat_map(|event| layer.message_delivery_pending(event))
                .collect();
        }
        current
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layers = self.layers.read();
        let counts: Vec<(i32, usize)> = layers.iter().map(|(p, b)| (*p, b.len())).collect();
        f.debug_struct("TransformPipeline")
            .field("default_priority", &self.default_priority)
            .field("layers", &counts)
            .finish()
    }
}
