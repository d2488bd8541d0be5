//! Ticket-queue state machine behind the shared/exclusive lock.
//!
//! Fairness policy: strict FIFO. Every acquisition request takes a
//! monotonically increasing ticket and requests are granted in ticket order,
//! with consecutive shared tickets admitted concurrently. A shared request
//! that arrives behind a queued exclusive request waits for it, so neither
//! mode can starve the other. Tickets whose waiters gave up (timeout or
//! cancellation) are recorded and skipped so they cannot wedge the queue.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use tracing::trace;

use crate::error::{CadenceError, Result};
use crate::lock::cancel::{CancelToken, Wake};

/// Lock acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of concurrent holders; excludes only exclusive holders.
    Shared,
    /// Exactly one holder; excludes all others.
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        })
    }
}

/// Holder counts and the ticket queue. Mutated only under [`LockCore::state`].
///
/// Invariant: `exclusive_holder.is_some()` implies `shared_holders == 0`,
/// and `shared_holders > 0` implies `exclusive_holder.is_none()`.
struct LockState {
    shared_holders: usize,
    exclusive_holder: Option<ThreadId>,
    /// Next ticket to hand out.
    next_ticket: u64,
    /// Ticket currently at the head of the queue.
    grant_head: u64,
    /// Tickets whose waiters gave up before being granted.
    abandoned: HashSet<u64>,
}

impl LockState {
    fn admissible(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.exclusive_holder.is_none(),
            LockMode::Exclusive => self.exclusive_holder.is_none() && self.shared_holders == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared_holders += 1,
            LockMode::Exclusive => self.exclusive_holder = Some(thread::current().id()),
        }
    }

    /// Advance the head past contiguously abandoned tickets.
    fn skip_abandoned(&mut self) {
        while self.abandoned.remove(&self.grant_head) {
            self.grant_head += 1;
        }
    }
}

pub(crate) struct LockCore {
    state: Mutex<LockState>,
    available: Condvar,
}

impl LockCore {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                shared_holders: 0,
                exclusive_holder: None,
                next_ticket: 0,
                grant_head: 0,
                abandoned: HashSet::new(),
            }),
            available: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocking acquisition with an optional deadline and cancel token.
    ///
    /// Without either, the wait can only end in a grant.
    pub(crate) fn acquire(
        &self,
        mode: LockMode,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let mut state = self.state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        loop {
            if state.grant_head == ticket && state.admissible(mode) {
                state.grant(mode);
                state.grant_head += 1;
                state.skip_abandoned();
                drop(state);
                // Let the next ticket re-check; consecutive shared grants
                // chain through here.
                self.available.notify_all();
                return Ok(());
            }

            if let Some(token) = cancel
                && token.is_cancelled()
            {
                trace!("ticket {ticket} cancelled waiting for {mode} lock");
                self.abandon(&mut state, ticket);
                return Err(CadenceError::Cancelled(mode));
            }

            state = match deadline {
                None => self.available.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        trace!("ticket {ticket} timed out waiting for {mode} lock");
                        self.abandon(&mut state, ticket);
                        return Err(CadenceError::AcquireTimeout(mode));
                    }
                    let (state, _timed_out) = self
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state
                }
            };
        }
    }

    /// Non-blocking acquisition. Never overtakes a queued ticket.
    pub(crate) fn try_acquire(&self, mode: LockMode) -> bool {
        let mut state = self.state();
        if state.grant_head != state.next_ticket || !state.admissible(mode) {
            return false;
        }
        state.next_ticket += 1;
        state.grant(mode);
        state.grant_head += 1;
        true
    }

    pub(crate) fn release_shared(&self) -> Result<()> {
        let mut state = self.state();
        if state.shared_holders == 0 {
            return Err(CadenceError::ReleaseNotHeld(LockMode::Shared));
        }
        state.shared_holders -= 1;
        if state.shared_holders == 0 {
            drop(state);
            self.available.notify_all();
        }
        Ok(())
    }

    pub(crate) fn release_exclusive(&self) -> Result<()> {
        let mut state = self.state();
        if state.exclusive_holder != Some(thread::current().id()) {
            return Err(CadenceError::ReleaseNotHeld(LockMode::Exclusive));
        }
        state.exclusive_holder = None;
        drop(state);
        self.available.notify_all();
        Ok(())
    }

    pub(crate) fn shared_holders(&self) -> usize {
        self.state().shared_holders
    }

    pub(crate) fn has_exclusive_holder(&self) -> bool {
        self.state().exclusive_holder.is_some()
    }

    /// Requests that have taken a ticket but not yet been granted.
    pub(crate) fn queued_requests(&self) -> usize {
        let state = self.state();
        usize::try_from(state.next_ticket - state.grant_head).unwrap_or(usize::MAX)
    }

    fn abandon(&self, state: &mut MutexGuard<'_, LockState>, ticket: u64) {
        state.abandoned.insert(ticket);
        state.skip_abandoned();
        self.available.notify_all();
    }
}

impl Wake for LockCore {
    fn wake(&self) {
        // Take the state mutex first so a waiter between its cancel check
        // and its park cannot miss this notification.
        let _state = self.state();
        self.available.notify_all();
    }
}
