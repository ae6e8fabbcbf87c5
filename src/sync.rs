//! Real-time change notification for session records.
//!
//! Each session gets its own broadcast channel, created on first subscribe
//! and removed when its last subscriber goes away. Notifications only name
//! the field that changed; consumers re-read the record on every event
//! rather than trusting payload ordering across fields.
//!
//! Delivery is at-least-once from the consumer's point of view: a lagging
//! subscriber is told so, and should fall back to a point-in-time read.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::SyncError;
use crate::models::{SessionRecord, StandardId};

const CHANNEL_CAPACITY: usize = 64;

/// Which part of the record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "standard", rename_all = "snake_case")]
pub enum RecordField {
    Summary(StandardId),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionChange {
    pub session_id: String,
    pub field: RecordField,
    /// Hub-wide arrival order.
    pub seq: u64,
}

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<String, broadcast::Sender<SessionChange>>>,
    seq: AtomicU64,
}

impl HubInner {
    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<SessionChange>>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-session notification channels.
#[derive(Clone, Default)]
pub struct SessionHub {
    inner: Arc<HubInner>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let rx = {
            let mut channels = self.inner.channels();
            channels
                .entry(session_id.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };
        debug!(session_id, "Subscriber registered");
        Subscription {
            rx,
            _guard: ReleaseGuard {
                hub: self.clone(),
                session_id: session_id.to_string(),
            },
        }
    }

    /// Notify subscribers of `session_id`. Publishing with no subscribers is fine.
    pub fn publish(&self, session_id: &str, field: RecordField) -> SessionChange {
        let change = SessionChange {
            session_id: session_id.to_string(),
            field,
            seq: self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1,
        };
        let channels = self.inner.channels();
        if let Some(tx) = channels.get(session_id) {
            // Only fails when every receiver is gone; their guards clean up.
            let delivered = tx.send(change.clone()).unwrap_or(0);
            debug!(session_id, seq = change.seq, delivered, "Published session change");
        }
        change
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.inner
            .channels()
            .get(session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of sessions with a live channel.
    pub fn channel_count(&self) -> usize {
        self.inner.channels().len()
    }

    fn release(&self, session_id: &str) {
        let mut channels = self.inner.channels();
        if channels
            .get(session_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(session_id);
            debug!(session_id, "Released session channel");
        }
    }
}

/// Removes the session channel once no receivers remain.
struct ReleaseGuard {
    hub: SessionHub,
    session_id: String,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.hub.release(&self.session_id);
    }
}

/// A registration for one session. Dropping it unregisters.
pub struct Subscription {
    // Field order matters: the receiver must drop before the guard runs.
    rx: broadcast::Receiver<SessionChange>,
    _guard: ReleaseGuard,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<SessionChange, SyncError> {
        match self.rx.recv().await {
            Ok(change) => Ok(change),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(SyncError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(SyncError::Closed),
        }
    }

    pub fn into_stream(self) -> SubscriptionStream {
        let Subscription { rx, _guard } = self;
        let inner = BroadcastStream::new(rx).map(|item| {
            item.map_err(|BroadcastStreamRecvError::Lagged(n)| SyncError::Lagged(n))
        });
        SubscriptionStream {
            inner: Box::pin(inner),
            _guard,
        }
    }
}

pub struct SubscriptionStream {
    inner: Pin<Box<dyn Stream<Item = Result<SessionChange, SyncError>> + Send>>,
    _guard: ReleaseGuard,
}

impl Stream for SubscriptionStream {
    type Item = Result<SessionChange, SyncError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Consumer-side copy of a record. Fields are overwritten in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordView {
    record: Option<SessionRecord>,
}

impl RecordView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    /// Apply a freshly read record. Returns false when nothing changed, so a
    /// repeated delivery is a no-op.
    pub fn apply(&mut self, incoming: Option<SessionRecord>) -> bool {
        let Some(record) = incoming else {
            return self.record.take().is_some();
        };
        let Some(current) = self.record.as_mut() else {
            self.record = Some(record);
            return true;
        };

        let mut changed = false;
        if current.session_id != record.session_id || current.created_at != record.created_at {
            current.session_id = record.session_id.clone();
            current.created_at = record.created_at;
            changed = true;
        }
        for standard in StandardId::ALL {
            let value = record.summary(standard);
            if value.is_some() && current.summary(standard) != value {
                *current.summary_mut(standard) = value.map(str::to_string);
                changed = true;
            }
        }
        changed
    }
}

/// Background watcher. Aborts its task when dropped.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Call `on_change` with the latest record whenever the session's record changes.
///
/// The record is re-read from `db` on every notification. After a lag the
/// watcher does the same point-in-time read, so nothing is lost for long.
pub fn watch<F>(hub: &SessionHub, db: Database, session_id: &str, mut on_change: F) -> WatchHandle
where
    F: FnMut(Option<SessionRecord>) + Send + 'static,
{
    let mut subscription = hub.subscribe(session_id);
    let session_id = session_id.to_string();

    let task = tokio::spawn(async move {
        let mut view = RecordView::new();
        loop {
            match subscription.recv().await {
                Ok(_) => {}
                Err(SyncError::Lagged(missed)) => {
                    warn!(session_id = %session_id, missed, "Watcher lagged, re-reading record");
                }
                Err(SyncError::Closed) => break,
            }
            match db.get_record(&session_id) {
                Ok(record) => {
                    if view.apply(record) {
                        on_change(view.record().cloned());
                    }
                }
                Err(e) => warn!(session_id = %session_id, "Failed to read record: {:#}", e),
            }
        }
    });

    WatchHandle { task }
}
