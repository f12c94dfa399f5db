//! Subscription registry: subscriber → subscription record.
//!
//! Subscribe and unsubscribe are delayed. Each call schedules a task that,
//! once its delay elapses, performs one read-modify-write of the record under
//! the registry lock. Because every fire is atomic with respect to every
//! other fire, concurrent subscribes for one subscriber converge: the first
//! fire stamps the time and later fires reuse that stamp.
//!
//! A record holds exactly one timestamp. Every operation replaces the record
//! wholesale, so subscribing discards any `unsubscribed_at` and vice versa.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use presence_core::ConnectionId;
use presence_core::time::now_millis;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::RegistryError;

/// State held per subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionRecord {
    /// Subscribed since the given epoch milliseconds.
    Active {
        /// When the subscription started.
        subscribed_at: i64,
    },
    /// Unsubscribed since the given epoch milliseconds.
    Inactive {
        /// When the subscription ended.
        unsubscribed_at: i64,
    },
}

impl SubscriptionRecord {
    fn is_active(self) -> bool {
        matches!(self, Self::Active { subscribed_at } if subscribed_at > 0)
    }
}

#[derive(Clone, Copy, Debug)]
enum Transition {
    Subscribe,
    Unsubscribe,
}

struct RegistryState {
    records: HashMap<ConnectionId, SubscriptionRecord>,
    /// Per-subscriber cancellation for still-pending operations.
    pending: HashMap<ConnectionId, CancellationToken>,
    root: CancellationToken,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    subscribe_delay: Duration,
    unsubscribe_delay: Duration,
}

/// Per-server subscription registry. Cloning shares the same mapping.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry with the given operation delays.
    pub fn new(subscribe_delay: Duration, unsubscribe_delay: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    records: HashMap::new(),
                    pending: HashMap::new(),
                    root: CancellationToken::new(),
                }),
                subscribe_delay,
                unsubscribe_delay,
            }),
        }
    }

    /// Schedule a subscribe for `subscriber`.
    ///
    /// Resolves to the existing `subscribed_at` if the subscriber is already
    /// active, otherwise to the time the delay elapsed. Must be called from
    /// within a tokio runtime.
    pub fn subscribe(&self, subscriber: ConnectionId) -> PendingUpdate {
        self.schedule(subscriber, Transition::Subscribe, self.inner.subscribe_delay)
    }

    /// Schedule an unsubscribe for `subscriber`. Symmetric with [`Self::subscribe`].
    pub fn unsubscribe(&self, subscriber: ConnectionId) -> PendingUpdate {
        self.schedule(subscriber, Transition::Unsubscribe, self.inner.unsubscribe_delay)
    }

    /// Number of subscribers currently holding an active record.
    pub fn subscribers_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .records
            .values()
            .filter(|record| record.is_active())
            .count()
    }

    /// Current record for `subscriber`, if any.
    pub fn record(&self, subscriber: &ConnectionId) -> Option<SubscriptionRecord> {
        self.inner.state.lock().records.get(subscriber).copied()
    }

    /// Remove `subscriber`'s record and cancel its pending operations.
    pub fn clear(&self, subscriber: &ConnectionId) {
        let mut state = self.inner.state.lock();
        let _ = state.records.remove(subscriber);
        if let Some(token) = state.pending.remove(subscriber) {
            token.cancel();
        }
    }

    /// Remove every record.
    pub fn clear_all(&self) {
        self.inner.state.lock().records.clear();
    }

    /// Cancel every pending operation. Later operations are unaffected.
    pub fn cancel_pending(&self) {
        let mut state = self.inner.state.lock();
        state.root.cancel();
        state.root = CancellationToken::new();
        state.pending.clear();
    }

    fn schedule(
        &self,
        subscriber: ConnectionId,
        transition: Transition,
        delay: Duration,
    ) -> PendingUpdate {
        let token = {
            let mut state = self.inner.state.lock();
            let root = state.root.clone();
            state
                .pending
                .entry(subscriber.clone())
                .or_insert_with(|| root.child_token())
                .clone()
        };
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(subscriber = %subscriber, ?transition, "registry operation cancelled");
                    Err(RegistryError::Cancelled)
                }
                () = tokio::time::sleep(delay) => inner.apply(&subscriber, transition, &token),
            }
        });

        PendingUpdate { handle }
    }
}

impl RegistryInner {
    /// The read-modify-write step. Runs under one lock acquisition.
    ///
    /// `clear` and `cancel_pending` cancel while holding the lock, so the
    /// token is rechecked here: a fire that lost that race writes nothing.
    fn apply(
        &self,
        subscriber: &ConnectionId,
        transition: Transition,
        token: &CancellationToken,
    ) -> Result<i64, RegistryError> {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            debug!(subscriber = %subscriber, ?transition, "registry operation cancelled after firing");
            return Err(RegistryError::Cancelled);
        }
        let current = state.records.get(subscriber).copied();
        let (at, record) = match transition {
            Transition::Subscribe => {
                let at = match current {
                    Some(SubscriptionRecord::Active { subscribed_at }) if subscribed_at > 0 => {
                        subscribed_at
                    }
                    _ => now_millis(),
                };
                (at, SubscriptionRecord::Active { subscribed_at: at })
            }
            Transition::Unsubscribe => {
                let at = match current {
                    Some(SubscriptionRecord::Inactive { unsubscribed_at }) if unsubscribed_at > 0 => {
                        unsubscribed_at
                    }
                    _ => now_millis(),
                };
                (at, SubscriptionRecord::Inactive { unsubscribed_at: at })
            }
        };
        let _ = state.records.insert(subscriber.clone(), record);
        Ok(at)
    }
}

/// Handle to a scheduled registry operation.
///
/// The operation runs whether or not the handle is awaited; awaiting yields
/// its timestamp.
#[must_use = "the timestamp is only observable by awaiting the handle"]
pub struct PendingUpdate {
    handle: JoinHandle<Result<i64, RegistryError>>,
}

impl Future for PendingUpdate {
    type Output = Result<i64, RegistryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(RegistryError::Aborted(err.to_string())),
        })
    }
}
