//! Ordered event sources

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{LedgerEvent, RawLedgerEvent};
use crate::error::{Result, WatchError};

/// Delivers ledger events in (block, log index) order.
/// `Ok(None)` means the stream has ended.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<LedgerEvent>>;
}

/// Sending half of a [`ChannelEventSource`]
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<RawLedgerEvent>,
}

impl EventSender {
    pub async fn send(&self, event: RawLedgerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| WatchError::Internal("event source closed".to_string()))
    }
}

/// Event source fed through a bounded tokio channel
pub struct ChannelEventSource {
    rx: mpsc::Receiver<RawLedgerEvent>,
}

impl ChannelEventSource {
    pub fn channel(capacity: usize) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventSender { tx }, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Result<Option<LedgerEvent>> {
        match self.rx.recv().await {
            Some(raw) => LedgerEvent::from_raw(raw).map(Some),
            None => Ok(None),
        }
    }
}

/// In-memory replay of an already collected event log
#[derive(Debug, Default)]
pub struct ReplaySource {
    events: VecDeque<LedgerEvent>,
}

impl ReplaySource {
    pub fn from_events(events: impl IntoIterator<Item = LedgerEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn from_raw(events: impl IntoIterator<Item = RawLedgerEvent>) -> Result<Self> {
        let events = events
            .into_iter()
            .map(LedgerEvent::from_raw)
            .collect::<Result<VecDeque<_>>>()?;
        Ok(Self { events })
    }

    /// One JSON `{name, args, position}` record per line; blank lines skipped
    pub fn from_json_lines(text: &str) -> Result<Self> {
        let mut raw = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            raw.push(serde_json::from_str::<RawLedgerEvent>(line)?);
        }
        debug!("Loaded {} events for replay", raw.len());
        Self::from_raw(raw)
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn next_event(&mut self) -> Result<Option<LedgerEvent>> {
        Ok(self.events.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventName, EventPosition};
    use serde_json::json;

    #[tokio::test]
    async fn test_replay_from_json_lines() {
        let text = r#"
{"name":"PricesPublished","args":{"votingRoundId":1},"position":{"block":1,"logIndex":0}}

{"name":"NotOurs","args":{},"position":{"block":1,"logIndex":1}}
"#;
        let mut source = ReplaySource::from_json_lines(text).unwrap();
        assert_eq!(source.remaining(), 2);

        let first = source.next_event().await.unwrap().unwrap();
        assert_eq!(first.name(), Some(EventName::PricesPublished));
        let second = source.next_event().await.unwrap().unwrap();
        assert_eq!(second.name(), None);
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_source_ends_when_senders_drop() {
        let (tx, mut source) = ChannelEventSource::channel(4);
        tx.send(RawLedgerEvent {
            name: "PricesPublished".into(),
            args: json!({"votingRoundId": 5}),
            position: EventPosition::new(2, 0),
        })
        .await
        .unwrap();
        drop(tx);

        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.position, EventPosition::new(2, 0));
        assert!(source.next_event().await.unwrap().is_none());
    }
}
