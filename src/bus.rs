//! Event Bus - typed publish/subscribe for ledger and synthetic events
//!
//! Handlers for a topic run in registration order. A failing handler is
//! logged and skipped; the remaining handlers still receive the event.

use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{EventName, LedgerEvent};
use crate::error::Result;

/// Events derived by the reconciler rather than emitted by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntheticEvent {
    /// Current and trusted price snapshots were refreshed
    PricesChanged,
}

impl fmt::Display for SyntheticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntheticEvent::PricesChanged => write!(f, "PricesChanged"),
        }
    }
}

/// Subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Ledger(EventName),
    Synthetic(SyntheticEvent),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Ledger(name) => write!(f, "ledger:{}", name.as_str()),
            Topic::Synthetic(event) => write!(f, "synthetic:{}", event),
        }
    }
}

/// What travels on the bus
#[derive(Debug, Clone)]
pub enum Notification {
    Ledger(Arc<LedgerEvent>),
    Synthetic(SyntheticEvent),
}

impl Notification {
    /// `None` for unrecognized ledger events, which nobody can subscribe to
    pub fn topic(&self) -> Option<Topic> {
        match self {
            Notification::Ledger(event) => event.name().map(Topic::Ledger),
            Notification::Synthetic(event) => Some(Topic::Synthetic(*event)),
        }
    }

    pub fn ledger_event(&self) -> Option<&LedgerEvent> {
        match self {
            Notification::Ledger(event) => Some(&**event),
            Notification::Synthetic(_) => None,
        }
    }

    pub fn agent_vault(&self) -> Option<Address> {
        self.ledger_event().and_then(LedgerEvent::agent_vault)
    }
}

/// Argument filter applied on top of the topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Any,
    AgentVault(Address),
}

impl EventFilter {
    fn matches(&self, notification: &Notification) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::AgentVault(vault) => notification.agent_vault() == Some(*vault),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, notification: &Notification) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    filter: EventFilter,
    handler: Arc<dyn EventHandler>,
}

/// Bus statistics
#[derive(Debug, Default, Clone)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_errors: u64,
    pub by_topic: HashMap<String, u64>,
}

pub struct EventBus {
    /// Kept in registration order
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: AtomicU64,
    stats: Arc<RwLock<BusStats>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            stats: Arc::new(RwLock::new(BusStats::default())),
        }
    }

    pub async fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe_filtered(topic, EventFilter::Any, handler).await
    }

    pub async fn subscribe_filtered(
        &self,
        topic: Topic,
        filter: EventFilter,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        info!("Subscribing {} to {} ({:?})", handler.name(), topic, filter);
        self.subscriptions.write().await.push(Subscription {
            id,
            topic,
            filter,
            handler,
        });
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Deliver to every matching handler in registration order.
    ///
    /// Returns how many handlers accepted the notification.
    pub async fn publish(&self, notification: Notification) -> usize {
        let Some(topic) = notification.topic() else {
            return 0;
        };

        // Handlers may subscribe or publish themselves; never hold the lock
        // while they run.
        let targets: Vec<Arc<dyn EventHandler>> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.topic == topic && s.filter.matches(&notification))
            .map(|s| s.handler.clone())
            .collect();

        debug!("Publishing {} to {} handlers", topic, targets.len());

        let mut delivered = 0;
        let mut failed = 0;
        for handler in targets {
            match handler.handle(&notification).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    warn!("Handler {} failed on {}: {}", handler.name(), topic, e);
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.published += 1;
        stats.delivered += delivered as u64;
        stats.handler_errors += failed;
        *stats.by_topic.entry(topic.to_string()).or_insert(0) += 1;

        delivered
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    pub async fn stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }
}
