//! Broadcast channel for lifecycle events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The dispatcher
//! publishes every [`LifecycleEvent`] it fires so in-process consumers can
//! observe the event stream without going through webhooks; the operator
//! API relays each league's share of it as server-sent events.

use futures_util::Stream;
use futures_util::stream;
use tokio::sync::broadcast;

use super::{LeagueId, LifecycleEvent};

/// Broadcast bus for [`LifecycleEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full the oldest events are dropped for lagging
/// receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Subscribes to the events of one league as a stream.
    ///
    /// Events missed by a lagging receiver are logged and skipped. The
    /// stream ends when the bus is dropped.
    pub fn league_events(
        &self,
        league_id: LeagueId,
    ) -> impl Stream<Item = LifecycleEvent> + Send + use<> {
        stream::unfold(
            (self.sender.subscribe(), league_id),
            |(mut rx, league_id)| async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if event.league_id == league_id => {
                            return Some((event, (rx, league_id)));
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(league_id = %league_id, skipped = n, "event subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        )
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
