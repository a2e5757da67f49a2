//! Single-flight credential refresh.
//!
//! [`RefreshCoordinator`] guarantees that at most one refresh call is
//! outstanding at any time. The first caller to observe an expired
//! credential while the coordinator is idle becomes the leader and runs the
//! refresh; everyone arriving while it runs is parked on a FIFO queue of
//! one-shot channels and released with a copy of the leader's outcome once
//! the cycle settles.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::classify::UNAUTHENTICATED;
use crate::envelope::{Envelope, StatusCode};
use crate::store::{Credential, CredentialStore};

/// Why a refresh cycle failed.
///
/// Every caller waiting on the cycle receives its own copy.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    /// No refresh token is stored, so there is nothing to exchange.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// The refresh endpoint answered with a failure.
    #[error("refresh endpoint rejected the session: {}", .0.message().unwrap_or("no message"))]
    Rejected(Envelope),

    /// The refresh endpoint answered 2xx without a usable token pair.
    #[error("refresh response did not contain a token pair")]
    MalformedResponse,

    /// The new credential could not be persisted.
    #[error("failed to store refreshed credential: {message}")]
    Storage { message: String },

    /// The refreshing task was dropped before the cycle settled. Parked
    /// callers start a new cycle rather than surfacing this.
    #[error("refresh was abandoned before it completed")]
    Abandoned,
}

impl RefreshError {
    /// Failure envelope surfaced to callers of a failed cycle.
    pub fn to_envelope(&self) -> Envelope {
        match self {
            Self::Rejected(envelope) => envelope.clone(),
            other => Envelope::failure(Some(StatusCode::Http(UNAUTHENTICATED)), other.to_string()),
        }
    }
}

/// Result of one refresh cycle.
pub type RefreshOutcome = Result<Credential, RefreshError>;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

struct Inner {
    state: RefreshState,
    queue: VecDeque<oneshot::Sender<RefreshOutcome>>,
    cycles: u64,
}

/// Owns the refresh state machine and the queue of parked callers.
///
/// One coordinator exists per [`Dispatcher`](crate::Dispatcher). The lock
/// is only taken for state transitions and is never held across an await.
pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
    store: Arc<dyn CredentialStore>,
}

impl RefreshCoordinator {
    /// Create an idle coordinator that persists refreshed credentials to `store`.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                queue: VecDeque::new(),
                cycles: 0,
            }),
            store,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.inner.lock().state
    }

    pub fn is_refreshing(&self) -> bool {
        self.state() == RefreshState::Refreshing
    }

    /// Number of callers parked behind the in-flight refresh.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Number of refresh cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.inner.lock().cycles
    }

    /// Obtain a fresh credential, running `refresh` only if no cycle is in flight.
    ///
    /// When idle, the caller becomes the leader: `refresh` is invoked, a
    /// successful result is written to the store, and every parked caller
    /// is released with the same outcome. When a cycle is already running,
    /// the caller waits for that cycle. If the leader is dropped before the
    /// cycle settles, parked callers compete again and one of them leads a
    /// new cycle with its own `refresh`.
    pub async fn request_refresh<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        loop {
            let waiter = {
                let mut inner = self.inner.lock();
                match inner.state {
                    RefreshState::Idle => {
                        inner.state = RefreshState::Refreshing;
                        inner.cycles += 1;
                        tracing::info!("Starting session refresh (cycle {})", inner.cycles);
                        None
                    }
                    RefreshState::Refreshing => {
                        let (tx, rx) = oneshot::channel();
                        inner.queue.push_back(tx);
                        tracing::debug!(
                            "Refresh in flight, parked caller at queue position {}",
                            inner.queue.len()
                        );
                        Some(rx)
                    }
                }
            };

            let Some(rx) = waiter else {
                break;
            };
            match rx.await {
                Ok(Err(RefreshError::Abandoned)) | Err(_) => {
                    tracing::debug!("Refresh leader went away; retrying the refresh");
                }
                Ok(outcome) => return outcome,
            }
        }

        let mut guard = CycleGuard {
            coordinator: self,
            armed: true,
        };

        let outcome = match refresh().await {
            Ok(credential) => match self.store.set(&credential).await {
                Ok(()) => Ok(credential),
                Err(e) => Err(RefreshError::Storage {
                    message: e.to_string(),
                }),
            },
            Err(e) => Err(e),
        };

        guard.armed = false;
        self.settle(&outcome);
        outcome
    }

    fn settle(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut inner = self.inner.lock();
            inner.state = RefreshState::Idle;
            std::mem::take(&mut inner.queue)
        };

        match outcome {
            Ok(_) => tracing::info!(
                "Session refreshed, releasing {} queued caller(s)",
                waiters.len()
            ),
            Err(e) => tracing::warn!(
                "Session refresh failed: {}; rejecting {} queued caller(s)",
                e,
                waiters.len()
            ),
        }

        for waiter in waiters {
            // A waiter whose task was dropped has nobody left to tell.
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RefreshCoordinator")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("cycles", &inner.cycles)
            .finish()
    }
}

/// Settles the cycle as abandoned if the leader's future is dropped mid-refresh.
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.settle(&Err(RefreshError::Abandoned));
        }
    }
}
