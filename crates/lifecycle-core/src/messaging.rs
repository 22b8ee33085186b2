//! Message event dispatch through the transform pipeline

use std::sync::Arc;

use tracing::debug;

use crate::events::{BroadcastOutcome, EventBroadcaster, ListenerRef};
use crate::transform::{MessageDelivered, MessageDeliveryFailed, MessageReceived, TransformPipeline};

/// Message event delivered to listeners after transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Received(MessageReceived),
    Delivered(MessageDelivered),
    DeliveryFailed(MessageDeliveryFailed),
}

impl MessageEvent {
    /// Address of the other party
    pub fn peer(&self) -> &str {
        match self {
            MessageEvent::Received(e) => &e.from,
            MessageEvent::Delivered(e) => &e.to,
            MessageEvent::DeliveryFailed(e) => &e.to,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            MessageEvent::Received(e) => &e.message.content,
            MessageEvent::Delivered(e) => &e.message.content,
            MessageEvent::DeliveryFailed(e) => &e.message.content,
        }
    }
}

/// Fans transformed message events out to listeners
///
/// Events suppressed by a transform layer reach no listener.
#[derive(Debug)]
pub struct MessageDispatcher {
    pipeline: Arc<TransformPipeline>,
    listeners: EventBroadcaster<MessageEvent>,
}

impl MessageDispatcher {
    pub fn new(pipeline: Arc<TransformPipeline>) -> Self {
        Self {
            pipeline,
            listeners: EventBroadcaster::new("messages"),
        }
    }

    pub fn pipeline(&self) -> &Arc<TransformPipeline> {
        &self.pipeline
    }

    pub fn subscribe(&self, listener: ListenerRef<MessageEvent>) -> bool {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, listener: &ListenerRef<MessageEvent>) -> bool {
        self.listeners.unsubscribe(listener)
    }

    pub fn listeners(&self) -> &EventBroadcaster<MessageEvent> {
        &self.listeners
    }

    /// Transform and publish an incoming message
    ///
    /// Returns `None` if a layer suppressed it.
    pub fn message_received(&self, event: MessageReceived) -> Option<BroadcastOutcome> {
        let event = self.pipeline.transform_received(event)?;
        Some(self.dispatch(MessageEvent::Received(event)))
    }

    pub fn message_delivered(&self, event: MessageDelivered) -> Option<BroadcastOutcome> {
        let event = self.pipeline.transform_delivered(event)?;
        Some(self.dispatch(MessageEvent::Delivered(event)))
    }

    pub fn message_delivery_failed(&self, event: MessageDeliveryFailed) -> Option<BroadcastOutcome> {
        let event = self.pipeline.transform_delivery_failed(event)?;
        Some(self.dispatch(MessageEvent::DeliveryFailed(event)))
    }

    /// Transform an outgoing message before it is sent
    ///
    /// Nothing is published; the caller sends whatever comes back.
    pub fn delivery_pending(&self, event: MessageDelivered) -> Vec<MessageDelivered> {
        let events = self.pipeline.transform_delivery_pending(event);
        debug!(count = events.len(), "Outgoing message transformed");
        events
    }

    fn dispatch(&self, event: MessageEvent) -> BroadcastOutcome {
        debug!(peer = event.peer(), listeners = self.listeners.listener_count(), "Dispatching message event");
        self.listeners.broadcast(&event)
    }
}
