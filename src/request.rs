//! Request table - ids, progress and terminal state of asynchronous requests
//!
//! `is_completed`, `is_canceled` and `wait_for_completion` report a terminal
//! outcome once; the request is then removed from the table. `request_status`
//! only observes.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Identifier of an asynchronous request
pub type RequestId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Queued,
    Running,
    Completed,
    Canceled,
}

impl RequestState {
    fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Canceled)
    }
}

/// Observable status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Completed,
    Canceled,
    /// Never issued, or already reported and removed
    Unknown,
}

#[derive(Debug)]
struct RequestEntry {
    state: RequestState,
    total: usize,
    completed: usize,
    cancel_requested: bool,
    reason: Option<String>,
}

#[derive(Default)]
pub struct RequestTable {
    next_id: AtomicI64,
    entries: Mutex<HashMap<RequestId, RequestEntry>>,
    changed: Condvar,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queued request made of `total` chunk tasks
    pub fn create(&self, total: usize) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().insert(
            id,
            RequestEntry {
                state: RequestState::Queued,
                total,
                completed: 0,
                cancel_requested: false,
                reason: None,
            },
        );
        id
    }

    pub(crate) fn mark_running(&self, id: RequestId) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            if entry.state == RequestState::Queued {
                entry.state = RequestState::Running;
            }
        }
    }

    pub(crate) fn chunk_done(&self, id: RequestId) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            if !entry.state.is_terminal() {
                entry.completed = (entry.completed + 1).min(entry.total);
            }
        }
    }

    /// Whether a cancel was requested; unknown requests count as canceled
    pub(crate) fn should_stop(&self, id: RequestId) -> bool {
        self.entries
            .lock()
            .get(&id)
            .map(|entry| entry.cancel_requested || entry.state.is_terminal())
            .unwrap_or(true)
    }

    pub(crate) fn finish(&self, id: RequestId) {
        self.terminate(id, RequestState::Completed, None);
    }

    pub(crate) fn fail(&self, id: RequestId, reason: String) {
        self.terminate(id, RequestState::Canceled, Some(reason));
    }

    fn terminate(&self, id: RequestId, state: RequestState, reason: Option<String>) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            if entry.state.is_terminal() {
                return;
            }
            let state = if entry.cancel_requested && state == RequestState::Completed {
                RequestState::Canceled
            } else {
                state
            };
            if state == RequestState::Completed {
                entry.completed = entry.total;
            }
            log::debug!("request {} {:?}", id, state);
            entry.state = state;
            if entry.reason.is_none() {
                entry.reason = reason;
            }
            self.changed.notify_all();
        }
    }

    /// Ask a request to stop. Chunk tasks already running finish; the rest are skipped.
    pub fn cancel(&self, id: RequestId) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            if !entry.state.is_terminal() {
                entry.cancel_requested = true;
                entry.reason.get_or_insert_with(|| "canceled by caller".to_string());
            }
        }
    }

    /// Cancel every live request immediately
    pub fn cancel_all(&self, reason: &str) {
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            if !entry.state.is_terminal() {
                entry.cancel_requested = true;
                entry.state = RequestState::Canceled;
                entry.reason = Some(reason.to_string());
            }
        }
        self.changed.notify_all();
    }

    /// Remove the request when it has reached `state`
    fn take_if(&self, id: RequestId, state: RequestState) -> bool {
        let mut entries = self.entries.lock();
        if entries.get(&id).is_some_and(|entry| entry.state == state) {
            entries.remove(&id);
            true
        } else {
            false
        }
    }

    pub fn is_completed(&self, id: RequestId) -> bool {
        self.take_if(id, RequestState::Completed)
    }

    pub fn is_canceled(&self, id: RequestId) -> bool {
        self.take_if(id, RequestState::Canceled)
    }

    /// Block until the request completes, is canceled or `timeout` elapses.
    /// Returns true only for a completed request, which is then removed.
    pub fn wait_for_completion(&self, id: RequestId, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut entries = self.entries.lock();
        loop {
            match entries.get(&id).map(|entry| entry.state) {
                Some(RequestState::Completed) => {
                    entries.remove(&id);
                    return true;
                }
                Some(RequestState::Canceled) | None => return false,
                Some(_) => {}
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut entries, deadline).timed_out() {
                        return entries
                            .get(&id)
                            .is_some_and(|entry| entry.state == RequestState::Completed)
                            && entries.remove(&id).is_some();
                    }
                }
                None => self.changed.wait(&mut entries),
            }
        }
    }

    /// Fraction of chunk tasks finished
    pub fn completion_factor(&self, id: RequestId) -> f32 {
        match self.entries.lock().get(&id) {
            Some(entry) if entry.state == RequestState::Completed => 1.0,
            Some(entry) if entry.total == 0 => 0.0,
            Some(entry) => entry.completed as f32 / entry.total as f32,
            None => 0.0,
        }
    }

    pub fn request_status(&self, id: RequestId) -> RequestStatus {
        match self.entries.lock().get(&id).map(|entry| entry.state) {
            Some(RequestState::Queued) | Some(RequestState::Running) => RequestStatus::Pending,
            Some(RequestState::Completed) => RequestStatus::Completed,
            Some(RequestState::Canceled) => RequestStatus::Canceled,
            None => RequestStatus::Unknown,
        }
    }

    /// Why a request was canceled
    pub fn cancel_reason(&self, id: RequestId) -> Option<String> {
        self.entries
            .lock()
            .get(&id)
            .filter(|entry| entry.state == RequestState::Canceled)
            .and_then(|entry| entry.reason.clone())
    }

    /// Requests not yet reported terminal
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.state.is_terminal())
            .count()
    }
}
