//! Exclusive access to the accelerator session.
//!
//! The transport runs many calls at once; the card runs one. [`ConcurrencyGate`]
//! wraps the session in a mutex and hands out [`GateGuard`]s. Dropping the
//! guard releases the gate on every path, including early returns and
//! unwinding. Acquisition blocks the calling thread, so it must only be used
//! from blocking contexts (`tokio::task::spawn_blocking`).

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::warn;

use crate::accel::AcceleratorSession;

pub struct ConcurrencyGate {
    session: Mutex<AcceleratorSession>,
    /// Guards currently alive. Never exceeds one.
    in_flight: AtomicUsize,
    /// Highest `in_flight` ever observed.
    peak: AtomicUsize,
    grants: AtomicU64,
}

impl ConcurrencyGate {
    pub fn new(session: AcceleratorSession) -> Self {
        Self {
            session: Mutex::new(session),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            grants: AtomicU64::new(0),
        }
    }

    /// Block until the session is free and take it.
    ///
    /// No fairness beyond that of the underlying mutex.
    pub fn acquire(&self) -> GateGuard<'_> {
        let session = self.session.lock().unwrap_or_else(|poisoned| {
            // Buffers are fully rewritten by the next request.
            warn!("previous gate holder panicked; reclaiming accelerator session");
            poisoned.into_inner()
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.grants.fetch_add(1, Ordering::Relaxed);

        GateGuard {
            session,
            gate: self,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn grants(&self) -> u64 {
        self.grants.load(Ordering::Relaxed)
    }

    /// Tear down the gate and hand back the session.
    pub fn into_inner(self) -> AcceleratorSession {
        self.session
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Scoped ownership of the accelerator session.
pub struct GateGuard<'a> {
    session: MutexGuard<'a, AcceleratorSession>,
    gate: &'a ConcurrencyGate,
}

impl Deref for GateGuard<'_> {
    type Target = AcceleratorSession;

    fn deref(&self) -> &AcceleratorSession {
        &self.session
    }
}

impl DerefMut for GateGuard<'_> {
    fn deref_mut(&mut self) -> &mut AcceleratorSession {
        &mut self.session
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        // Runs before the mutex guard field is dropped, so the counter is
        // back to zero before the next holder can enter.
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
