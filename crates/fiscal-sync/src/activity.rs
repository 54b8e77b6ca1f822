//! # Activity Log
//!
//! Bounded, operator-facing event log with push notification.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Activity Log                                   │
//! │                                                                         │
//! │   InvoiceStore ─┐                                                       │
//! │   SyncEngine ───┼──► append(severity, message, invoice_id)              │
//! │   FileWatcher ──┘           │                                           │
//! │                             ├──► ring buffer (capacity, oldest evicted) │
//! │                             ├──► broadcast channel  ──► subscribe()     │
//! │                             ├──► callbacks          ──► subscribe_fn()  │
//! │                             └──► tracing (mirrored at matching level)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry ids are monotonic for the lifetime of the process and are assigned
//! under the same lock that orders the buffer, so buffer order is id order. A slow
//! broadcast subscriber lags and skips entries; it never blocks `append`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info};

use fiscal_core::{ActivityEntry, Severity};

type Callback = Box<dyn Fn(&ActivityEntry) + Send + Sync>;

/// Identifies a callback registered with [`ActivityLog::subscribe_fn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    entries: VecDeque<ActivityEntry>,
    callbacks: HashMap<u64, Callback>,
    next_entry_id: u64,
}

/// Bounded activity log shared by every component.
pub struct ActivityLog {
    capacity: usize,
    inner: Mutex<Inner>,
    tx: broadcast::Sender<ActivityEntry>,
    next_subscription_id: AtomicU64,
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl ActivityLog {
    /// Creates a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity.max(16));

        ActivityLog {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                callbacks: HashMap::new(),
                next_entry_id: 1,
            }),
            tx,
            next_subscription_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking callback must not take the log down with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Appends an entry and notifies every subscriber.
    pub fn append(
        &self,
        severity: Severity,
        message: impl Into<String>,
        invoice_id: Option<&str>,
    ) -> ActivityEntry {
        let mut inner = self.lock();
        let entry = ActivityEntry {
            id: inner.next_entry_id,
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            invoice_id: invoice_id.map(str::to_string),
        };
        inner.next_entry_id += 1;

        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry.clone());

        for callback in inner.callbacks.values() {
            callback(&entry);
        }

        // Sent under the lock so receivers observe ids in order. No receivers is fine.
        let _ = self.tx.send(entry.clone());
        drop(inner);

        match severity {
            Severity::Error => error!(
                activity_id = entry.id,
                invoice_id = ?entry.invoice_id,
                "{}",
                entry.message
            ),
            Severity::Info | Severity::Success => info!(
                activity_id = entry.id,
                severity = %severity,
                invoice_id = ?entry.invoice_id,
                "{}",
                entry.message
            ),
        }

        entry
    }

    pub fn info(&self, message: impl Into<String>, invoice_id: Option<&str>) -> ActivityEntry {
        self.append(Severity::Info, message, invoice_id)
    }

    pub fn success(&self, message: impl Into<String>, invoice_id: Option<&str>) -> ActivityEntry {
        self.append(Severity::Success, message, invoice_id)
    }

    pub fn error(&self, message: impl Into<String>, invoice_id: Option<&str>) -> ActivityEntry {
        self.append(Severity::Error, message, invoice_id)
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Returns a receiver for entries appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEntry> {
        self.tx.subscribe()
    }

    /// Registers a callback invoked synchronously for every new entry.
    ///
    /// The callback runs while the log is locked and must not append.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ActivityEntry) + Send + Sync + 'static,
    {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.lock().callbacks.insert(id, Box::new(callback));
        SubscriptionId(id)
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().callbacks.remove(&id.0).is_some()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns up to `limit` entries, newest first.
    pub fn snapshot(&self, limit: usize) -> Vec<ActivityEntry> {
        self.lock().entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_is_newest_first_and_bounded() {
        let log = ActivityLog::new(3);
        for n in 1..=5 {
            log.info(format!("entry {}", n), None);
        }

        let messages: Vec<String> = log.snapshot(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 5", "entry 4", "entry 3"]);
        assert_eq!(log.snapshot(1).len(), 1);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let log = ActivityLog::new(2);
        let a = log.info("a", None);
        let b = log.error("b", Some("inv-1"));
        let c = log.success("c", None);

        assert!(a.id < b.id && b.id < c.id);
        assert_eq!(b.severity, Severity::Error);
        assert_eq!(b.invoice_id.as_deref(), Some("inv-1"));
    }

    #[test]
    fn test_callback_subscription() {
        let log = ActivityLog::new(10);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = log.subscribe_fn(move |entry| {
            sink.lock().unwrap().push(entry.message.clone());
        });

        log.info("first", None);
        assert!(log.unsubscribe(id));
        log.info("second", None);
        assert!(!log.unsubscribe(id));

        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_subscription() {
        let log = ActivityLog::new(10);
        let mut rx = log.subscribe();

        log.success("Fiscal day opened", None);

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "Fiscal day opened");
        assert_eq!(entry.severity, Severity::Success);
    }

    #[test]
    fn test_concurrent_appends_keep_buffer_in_id_order() {
        let log = Arc::new(ActivityLog::new(2_000));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        log.subscribe_fn(move |entry| sink.lock().unwrap().push(entry.id));

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for n in 0..200 {
                        log.info(format!("writer {} entry {}", t, n), None);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let ids: Vec<u64> = log.snapshot(2_000).into_iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 1_600);
        assert!(ids.windows(2).all(|w| w[0] == w[1] + 1), "buffer out of id order");
        assert_eq!(ids.last(), Some(&1));

        let delivered = delivered.lock().unwrap();
        assert!(delivered.windows(2).all(|w| w[0] < w[1]), "callbacks out of id order");
    }
}
