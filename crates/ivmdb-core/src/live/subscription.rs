//! Subscriptions to result change batches.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ivmdb_proto::ChangeMessage;

use crate::error::{Error, Result};

/// One committed change to a live result: every result key that changed,
/// as an insert, update or delete.
pub type ChangeBatch = Vec<ChangeMessage>;

/// A registered subscriber and its undelivered batches.
#[derive(Debug, Default)]
pub struct SubscriptionEntry {
    /// Subscription id.
    pub id: u64,
    /// Batches published but not yet drained.
    pub pending: Vec<ChangeBatch>,
    /// Number of batches delivered so far.
    pub batches_delivered: u64,
}

/// Registry of subscribers to one live query.
///
/// Publishing copies the batch into every subscriber's queue; subscribers
/// pull with [`SubscriptionHub::drain_events`].
pub struct SubscriptionHub {
    subscriptions: DashMap<u64, SubscriptionEntry>,
    next_subscription_id: AtomicU64,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber and return its id.
    pub fn subscribe(&self) -> u64 {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                id,
                ..Default::default()
            },
        );
        tracing::debug!(subscription_id = id, "subscription created");
        id
    }

    /// Remove a subscriber, dropping anything it has not drained.
    pub fn unsubscribe(&self, id: u64) -> Result<()> {
        let (_, entry) = self
            .subscriptions
            .remove(&id)
            .ok_or(Error::SubscriptionNotFound(id))?;
        tracing::debug!(
            subscription_id = id,
            batches_delivered = entry.batches_delivered,
            dropped = entry.pending.len(),
            "subscription removed"
        );
        Ok(())
    }

    /// Queue a batch for every subscriber. Empty batches are not published.
    pub fn publish(&self, batch: &[ChangeMessage]) {
        if batch.is_empty() {
            return;
        }
        for mut entry in self.subscriptions.iter_mut() {
            entry.pending.push(batch.to_vec());
        }
        tracing::trace!(
            changes = batch.len(),
            subscribers = self.subscriptions.len(),
            "published change batch"
        );
    }

    /// Take every batch queued for a subscriber, oldest first.
    pub fn drain_events(&self, id: u64) -> Result<Vec<ChangeBatch>> {
        let mut entry = self
            .subscriptions
            .get_mut(&id)
            .ok_or(Error::SubscriptionNotFound(id))?;
        let batches = std::mem::take(&mut entry.pending);
        entry.batches_delivered += batches.len() as u64;
        Ok(batches)
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_drain() {
        let hub = SubscriptionHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_ne!(a, b);
        assert_eq!(hub.subscription_count(), 2);

        hub.publish(&[ChangeMessage::insert(1, 10)]);
        hub.publish(&[]);

        let batches = hub.drain_events(a).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].key, 1.into());
        assert!(hub.drain_events(a).unwrap().is_empty());
        assert_eq!(hub.drain_events(b).unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = SubscriptionHub::new();
        let id = hub.subscribe();
        hub.unsubscribe(id).unwrap();
        assert!(matches!(hub.unsubscribe(id), Err(Error::SubscriptionNotFound(i)) if i == id));
        assert!(hub.drain_events(id).is_err());
    }

    #[test]
    fn test_late_subscriber_misses_earlier_batches() {
        let hub = SubscriptionHub::new();
        hub.publish(&[ChangeMessage::insert(1, 10)]);
        let id = hub.subscribe();
        assert!(hub.drain_events(id).unwrap().is_empty());
    }
}
