//! Per-key call coalescing
//!
//! [`FlightGroup::do_call`] guarantees that across all callers whose calls
//! overlap in time, the supplied work runs exactly once per key. The first
//! caller becomes the leader and runs the future; everyone else parks until
//! the leader finishes and then receives the leader's exact result, errors
//! included. The in-flight record is dropped once the leader completes, so
//! non-overlapping calls each run the work again.
//!
//! If the leader's own future is dropped mid-flight (its caller was
//! cancelled), waiters are released with [`Error::Cancelled`] rather than
//! parking forever; waiters never cancel the shared call themselves.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};

/// One in-flight (or just-completed) call.
struct Call<T> {
    done: Notify,
    result: OnceLock<Result<T>>,
}

impl<T: Clone> Call<T> {
    async fn wait(&self) -> Result<T> {
        let notified = self.done.notified();
        tokio::pin!(notified);
        // Register interest before checking the slot so a completion
        // between the check and the await is not lost.
        notified.as_mut().enable();
        if self.result.get().is_none() {
            notified.await;
        }
        match self.result.get() {
            Some(result) => result.clone(),
            None => Err(Error::Cancelled),
        }
    }
}

/// Releases waiters and retires the in-flight record when the leader
/// finishes, by completion or by being dropped mid-flight.
struct LeaderGuard<'a, T: Clone> {
    calls: &'a Mutex<HashMap<String, Arc<Call<T>>>>,
    key: &'a str,
    call: Arc<Call<T>>,
}

impl<T: Clone> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if self.call.result.get().is_none() {
            let _ = self.call.result.set(Err(Error::Cancelled));
        }
        self.call.done.notify_waiters();
        self.calls.lock().remove(self.key);
    }
}

/// A namespace of coalesced calls, keyed by string.
pub struct FlightGroup<T> {
    calls: Mutex<HashMap<String, Arc<Call<T>>>>,
}

/// Whether a call to [`FlightGroup::do_call`] joined an existing in-flight
/// call or became the leader for a new one.
enum CallOutcome<T> {
    Join(Arc<Call<T>>),
    Lead(Arc<Call<T>>),
}

impl<T: Clone> FlightGroup<T> {
    pub fn new() -> Self {
        FlightGroup {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, coalescing with any overlapping call for the
    /// same key. Every caller that observed the same in-flight record
    /// receives the identical result.
    pub async fn do_call<F>(&self, key: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = {
            let mut calls = self.calls.lock();
            if let Some(existing) = calls.get(key) {
                CallOutcome::Join(Arc::clone(existing))
            } else {
                let call = Arc::new(Call {
                    done: Notify::new(),
                    result: OnceLock::new(),
                });
                calls.insert(key.to_string(), Arc::clone(&call));
                CallOutcome::Lead(call)
            }
        };

        let call = match outcome {
            CallOutcome::Join(existing) => return existing.wait().await,
            CallOutcome::Lead(call) => call,
        };

        let guard = LeaderGuard {
            calls: &self.calls,
            key,
            call,
        };
        let result = work.await;
        let _ = guard.call.result.set(result.clone());
        drop(guard);
        result
    }

    /// Run `f` while holding the group's mutex, excluding every concurrent
    /// attempt to start or retire a call.
    pub fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _calls = self.calls.lock();
        f()
    }
}

impl<T: Clone> Default for FlightGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}
