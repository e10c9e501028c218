//! Event Ingestion Strategies
//!
//! The transport integration can deliver inbound events by long-polling or by
//! pushing them from its own webhook receiver. Both reduce to one interface
//! the run loop consumes; `[chat] ingestion` in the config picks the mode, so
//! the two deployment styles are not forked code paths.

use super::traits::{ChatEvent, ChatResult, ChatTransport};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// A stream of inbound chat events, batched
#[async_trait]
pub trait EventSource: Send {
    /// Await the next batch of events. May return an empty batch.
    async fn next_batch(&mut self) -> ChatResult<Vec<ChatEvent>>;
}

/// Polls the transport on a fixed interval
pub struct PollingSource<T: ChatTransport> {
    transport: T,
    interval: tokio::time::Interval,
}

impl<T: ChatTransport> PollingSource<T> {
    pub fn new(transport: T, every: Duration) -> Self {
        Self {
            transport,
            interval: tokio::time::interval(every),
        }
    }
}

#[async_trait]
impl<T: ChatTransport> EventSource for PollingSource<T> {
    async fn next_batch(&mut self) -> ChatResult<Vec<ChatEvent>> {
        self.interval.tick().await;
        self.transport.poll_events().await
    }
}

/// Receives events pushed by an external integration
pub struct PushSource {
    rx: mpsc::Receiver<ChatEvent>,
}

impl PushSource {
    /// Returns the sender half for the integration and the source itself
    pub fn channel(buffer: usize) -> (mpsc::Sender<ChatEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for PushSource {
    async fn next_batch(&mut self) -> ChatResult<Vec<ChatEvent>> {
        match self.rx.recv().await {
            Some(first) => {
                // Coalesce whatever else is already queued into one batch.
                let mut batch = vec![first];
                while let Ok(event) = self.rx.try_recv() {
                    batch.push(event);
                }
                Ok(batch)
            }
            None => {
                // Sender dropped: no more events will ever arrive. Park so
                // the run loop keeps serving webhooks until shutdown.
                warn!("event channel closed, no further chat events");
                futures::future::pending().await
            }
        }
    }
}
