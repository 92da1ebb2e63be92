//! Publish/subscribe event bus for Haven
//!
//! The bus is the hub's message broker: state changes, service calls, and
//! integration events all travel through it. Subscribers pick a single event
//! type or match everything; payloads are JSON with an optional typed layer
//! on top.

use dashmap::DashMap;
use haven_core::{Context, Event, EventData, EventType};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Broadcast capacity per event type; slow subscribers see `Lagged`.
const CHANNEL_CAPACITY: usize = 1024;

/// The hub's event broker.
///
/// Firing is fire-and-forget: an event with no subscribers is dropped
/// silently. Every event is also mirrored to match-all subscribers.
pub struct EventBus {
    /// One broadcast channel per concrete event type
    channels: DashMap<EventType, broadcast::Sender<Event>>,
    /// Channel receiving a copy of every event
    match_all: broadcast::Sender<Event>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all, _) = broadcast::channel(capacity);
        Self {
            channels: DashMap::new(),
            match_all,
            capacity,
        }
    }

    /// Subscribe to one event type.
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<Event> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "subscribing");

        if event_type.is_match_all() {
            return self.match_all.subscribe();
        }

        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to one event type with payload deserialization.
    pub fn subscribe_typed<T>(&self) -> TypedReceiver<T>
    where
        T: EventData + serde::de::DeserializeOwned,
    {
        TypedReceiver {
            rx: self.subscribe(T::event_type()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Subscribe to every event on the bus.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.match_all.subscribe()
    }

    /// Deliver an event to its type channel and to match-all subscribers.
    pub fn fire(&self, event: Event) {
        debug!(event_type = %event.event_type, "firing event");

        if let Some(tx) = self.channels.get(&event.event_type) {
            // A send error only means nobody is listening right now.
            let _ = tx.send(event.clone());
        }
        let _ = self.match_all.send(event);
    }

    /// Serialize a typed payload and fire it under its event type.
    pub fn fire_typed<T>(&self, data: T, context: Context)
    where
        T: EventData + serde::Serialize,
    {
        let payload = serde_json::to_value(&data).unwrap_or_default();
        self.fire(Event::new(T::event_type(), payload, context));
    }

    /// Number of event types with at least one past subscription.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver wrapper that deserializes payloads into `T`.
///
/// Events whose payload does not deserialize as `T` are skipped rather than
/// surfaced as errors; a foreign payload on a shared event type is not the
/// subscriber's problem.
pub struct TypedReceiver<T> {
    rx: broadcast::Receiver<Event>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedReceiver<T> {
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            match serde_json::from_value::<T>(event.data) {
                Ok(data) => {
                    return Ok(Event {
                        event_type: event.event_type,
                        data,
                        origin: event.origin,
                        time_fired: event.time_fired,
                        context: event.context,
                    })
                }
                Err(_) => continue,
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;
