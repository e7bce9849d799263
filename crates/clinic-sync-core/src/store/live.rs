//! Live query subscriptions.
//!
//! A subscription is a query closure plus the tables it reads. After every committed write the
//! store re-runs each subscription touching a written table and sends the fresh snapshot down
//! that subscriber's channel. Nothing is cached between subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::db::{Database, DbResult, Table};

/// Identifies one subscription for [`super::Store::unobserve`].
pub type SubscriptionId = u64;

type Refresh = Box<dyn FnMut(&Database) -> bool + Send>;

struct Subscription {
    tables: Vec<Table>,
    refresh: Refresh,
}

#[derive(Default)]
pub(crate) struct LiveRegistry {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
}

impl LiveRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `query` once for the initial snapshot, then register it for `tables`.
    ///
    /// The caller holds the database lock so no write lands between the two steps.
    pub(crate) fn register<T, F>(
        &self,
        db: &Database,
        tables: &[Table],
        mut query: F,
    ) -> DbResult<(SubscriptionId, UnboundedReceiver<T>)>
    where
        T: Send + 'static,
        F: FnMut(&Database) -> DbResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, so the initial send cannot fail
        let _ = tx.send(query(db)?);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let refresh: Refresh = Box::new(move |db| emit(&tx, &mut query, db, id));
        self.lock().insert(
            id,
            Subscription {
                tables: tables.to_vec(),
                refresh,
            },
        );
        debug!(subscription = id, ?tables, "registered live query");
        Ok((id, rx))
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(subscription = id, "removed live query");
        }
        removed
    }

    /// Re-run every subscription reading one of `written`; drop those whose receiver is gone.
    pub(crate) fn notify(&self, db: &Database, written: &[Table]) {
        let mut subscriptions = self.lock();
        subscriptions.retain(|_, sub| {
            if sub.tables.iter().any(|t| written.contains(t)) {
                (sub.refresh)(db)
            } else {
                true
            }
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Send a fresh snapshot. Returns `false` once the subscriber has gone away.
fn emit<T>(
    tx: &UnboundedSender<T>,
    query: &mut impl FnMut(&Database) -> DbResult<T>,
    db: &Database,
    id: SubscriptionId,
) -> bool {
    if tx.is_closed() {
        return false;
    }
    match query(db) {
        Ok(snapshot) => tx.send(snapshot).is_ok(),
        Err(e) => {
            // Keep the subscription; the next write gets another chance
            warn!(subscription = id, error = %e, "live query failed");
            true
        }
    }
}

/// Handle to a live query. Dropping it ends the subscription.
pub struct LiveQuery<T> {
    id: SubscriptionId,
    rx: UnboundedReceiver<T>,
    registry: Weak<LiveRegistry>,
}

impl<T> LiveQuery<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        rx: UnboundedReceiver<T>,
        registry: Weak<LiveRegistry>,
    ) -> Self {
        Self { id, rx, registry }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next snapshot. `None` once the subscription has been removed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv); must not be called from async code.
    pub fn blocking_recv(&mut self) -> Option<T> {
        self.rx.blocking_recv()
    }

    /// Next queued snapshot, if one is ready.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(snapshot) => Some(snapshot),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain queued snapshots and keep only the newest.
    pub fn latest(&mut self) -> Option<T> {
        let mut latest = None;
        while let Some(snapshot) = self.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use std::sync::Arc;

    fn registry() -> (Arc<LiveRegistry>, Database) {
        (
            Arc::new(LiveRegistry::default()),
            Database::open_in_memory().unwrap(),
        )
    }

    #[test]
    fn test_only_matching_tables_refresh() {
        let (registry, db) = registry();
        let (_, mut rx) = registry
            .register(&db, &[Table::Patient], |_| Ok(1))
            .unwrap();
        assert_eq!(rx.try_recv().ok(), Some(1));

        registry.notify(&db, &[Table::Appointment]);
        assert!(rx.try_recv().is_err());

        registry.notify(&db, &[Table::Appointment, Table::Patient]);
        assert_eq!(rx.try_recv().ok(), Some(1));
    }

    #[test]
    fn test_closed_receiver_is_pruned() {
        let (registry, db) = registry();
        let (_, rx) = registry
            .register(&db, &[Table::Patient], |_| Ok(()))
            .unwrap();
        assert_eq!(registry.len(), 1);

        drop(rx);
        registry.notify(&db, &[Table::Patient]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_failing_query_keeps_subscription() {
        let (registry, db) = registry();
        let mut calls = 0;
        let (_, mut rx) = registry
            .register(&db, &[Table::Patient], move |_| {
                calls += 1;
                if calls == 2 {
                    Err(DbError::Constraint("transient".into()))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();

        registry.notify(&db, &[Table::Patient]);
        registry.notify(&db, &[Table::Patient]);

        assert_eq!(registry.len(), 1);
        assert_eq!(rx.try_recv().ok(), Some(1));
        assert_eq!(rx.try_recv().ok(), Some(3));
    }

    #[test]
    fn test_dropping_handle_unsubscribes() {
        let (registry, db) = registry();
        let (id, rx) = registry
            .register(&db, &[Table::Patient], |_| Ok(()))
            .unwrap();
        let live = LiveQuery::new(id, rx, Arc::downgrade(&registry));

        drop(live);
        assert_eq!(registry.len(), 0);
    }
}
