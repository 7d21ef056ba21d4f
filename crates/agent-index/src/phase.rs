//! Process-wide commit/save phase.
//!
//! A single atomic holds the current [`Phase`], so at most one of committing
//! and saving is ever true and readers never take a lock. Entering a phase
//! waits for `Idle`, woken by a notification each time the phase is released.
//!
//! Commit admission is collapsed through a waiter counter: only one caller
//! may wait for the commit phase at a time, later ones return immediately.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::IndexError;

/// What the orchestrator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Committing = 1,
    Saving = 2,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Committing,
            2 => Phase::Saving,
            _ => Phase::Idle,
        }
    }
}

/// Atomic phase cell with wake-ups on release.
#[derive(Debug)]
pub struct PhaseState {
    phase: AtomicU8,
    released: Notify,
    waiters: AtomicU64,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle as u8),
            released: Notify::new(),
            waiters: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_committing(&self) -> bool {
        self.current() == Phase::Committing
    }

    pub fn is_saving(&self) -> bool {
        self.current() == Phase::Saving
    }

    /// Number of callers currently admitted to wait for a commit.
    pub fn waiters(&self) -> u64 {
        self.waiters.load(Ordering::Acquire)
    }

    /// Enter `target` if the phase is idle.
    pub fn try_enter(&self, target: Phase) -> Option<PhaseGuard<'_>> {
        self.phase
            .compare_exchange(
                Phase::Idle as u8,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| PhaseGuard { state: self })
    }

    /// Wait until the phase is idle, then enter `target`.
    pub async fn enter(
        &self,
        target: Phase,
        token: &CancellationToken,
    ) -> Result<PhaseGuard<'_>, IndexError> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before re-checking so a release in between is not lost.
            released.as_mut().enable();

            if let Some(guard) = self.try_enter(target) {
                return Ok(guard);
            }

            tokio::select! {
                _ = token.cancelled() => return Err(IndexError::Cancelled),
                _ = &mut released => {}
            }
        }
    }

    /// Admit a commit waiter, or `None` if one is already waiting.
    pub fn admit(&self) -> Option<WaiterTicket<'_>> {
        let waiting = self.waiters.fetch_add(1, Ordering::AcqRel) + 1;
        if waiting > 1 {
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(WaiterTicket { state: self })
    }
}

/// RAII guard that returns the phase to `Idle` when dropped.
///
/// Drop runs on every exit path, panics included, so a failed commit or
/// save never leaves the phase stuck.
#[derive(Debug)]
pub struct PhaseGuard<'a> {
    state: &'a PhaseState,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.state.phase.store(Phase::Idle as u8, Ordering::Release);
        self.state.released.notify_waiters();
    }
}

/// Holds the single commit-waiter slot until dropped.
#[derive(Debug)]
pub struct WaiterTicket<'a> {
    state: &'a PhaseState,
}

impl Drop for WaiterTicket<'_> {
    fn drop(&mut self) {
        self.state.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}
