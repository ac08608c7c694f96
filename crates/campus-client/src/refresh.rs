//! Single-flight coordination of access-token refreshes.
//!
//! When several requests hit an expired token at the same moment, only the
//! first one performs the refresh call. The others park behind it and are
//! released, in the order they arrived, with a copy of its outcome.
//!
//! # Example
//!
//! ```
//! use campus_client::RefreshCoordinator;
//!
//! # async fn example() -> campus_client::Result<()> {
//! let coordinator = RefreshCoordinator::new();
//! let token = coordinator
//!     .run(|| async { Ok("fresh-token".to_string()) })
//!     .await?;
//! assert_eq!(token, "fresh-token");
//! assert!(!coordinator.is_refreshing());
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{ApiError, Result};

/// Outcome handed to every caller parked behind a refresh.
type Waiter = oneshot::Sender<Result<String>>;

/// Message reported to waiters whose leader went away before settling.
const ABANDONED_MESSAGE: &str = "token refresh was abandoned before completing";

/// Coalesces concurrent token refreshes onto a single in-flight call.
///
/// The slot is `None` while idle and holds the waiter queue while a refresh
/// is running. It is only ever locked for non-async bookkeeping.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    in_flight: Mutex<Option<Vec<Waiter>>>,
}

enum Entry {
    Leader,
    Follower(oneshot::Receiver<Result<String>>),
}

impl RefreshCoordinator {
    /// Creates an idle coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a refresh is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.slot().is_some()
    }

    /// Returns the number of callers parked behind the in-flight refresh.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.slot().as_ref().map_or(0, Vec::len)
    }

    /// Runs `refresh` unless one is already in flight, in which case this
    /// waits for that one and returns its outcome instead.
    ///
    /// `refresh` is only invoked when this caller becomes the leader.
    pub async fn run<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let entry = {
            let mut slot = self.slot();
            if let Some(waiters) = slot.as_mut() {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Entry::Follower(rx)
            } else {
                *slot = Some(Vec::new());
                Entry::Leader
            }
        };

        match entry {
            Entry::Follower(rx) => {
                tracing::debug!("Token refresh already in flight, waiting for it");
                rx.await
                    .unwrap_or_else(|_| Err(ApiError::network(ABANDONED_MESSAGE)))
            }
            Entry::Leader => {
                let guard = LeaderGuard {
                    coordinator: self,
                    armed: true,
                };
                let outcome = refresh().await;
                guard.settle(&outcome);
                outcome
            }
        }
    }

    /// Resets the slot and hands `outcome` to every waiter, oldest first.
    fn release(&self, outcome: &Result<String>) {
        let waiters = self.slot().take().unwrap_or_default();
        tracing::debug!(
            waiters = waiters.len(),
            success = outcome.is_ok(),
            "Releasing callers queued behind token refresh"
        );
        for waiter in waiters {
            // A waiter whose caller stopped listening is simply skipped.
            let _ = waiter.send(outcome.clone());
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Vec<Waiter>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the waiters if the leader's future is dropped mid-refresh.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl LeaderGuard<'_> {
    fn settle(mut self, outcome: &Result<String>) {
        self.armed = false;
        self.coordinator.release(outcome);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Token refresh dropped before completing");
            self.coordinator
                .release(&Err(ApiError::network(ABANDONED_MESSAGE)));
        }
    }
}
