//! Acknowledgment gate
//!
//! Single-use rendezvous between the thread that issues a command and the
//! client thread that later observes the broker's receipt.
//!
//! ```text
//!   caller thread                         client I/O thread
//!   -------------                         -----------------
//!   (gate, depositor) = new()
//!   hand depositor to listener  ───────▶  listener owns depositor
//!   issue command
//!   gate.await_and_take()  ◀──────────── depositor.deposit(outcome)
//! ```
//!
//! The slot is a bounded channel of capacity one, so a deposit that lands
//! before the caller starts waiting is buffered rather than lost. Only the
//! first deposit is kept.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;
use thiserror::Error;

/// Why a wait on the gate ended without a value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("no deposit within {0:?}")]
    Timeout(Duration),

    /// Every depositor was dropped without depositing.
    #[error("gate abandoned before a deposit")]
    Abandoned,
}

/// Consumer half: blocks until a value arrives, then is consumed.
pub struct AcknowledgmentGate<T> {
    slot: Receiver<T>,
}

/// Producer half, handed to whatever will eventually fire.
pub struct GateDepositor<T> {
    slot: Sender<T>,
}

impl<T> Clone for GateDepositor<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> AcknowledgmentGate<T> {
    /// Create a gate and its depositor.
    pub fn new() -> (Self, GateDepositor<T>) {
        let (tx, rx) = bounded(1);
        (Self { slot: rx }, GateDepositor { slot: tx })
    }

    /// Block until a value has been deposited and return it.
    pub fn await_and_take(self) -> Result<T, GateError> {
        self.slot.recv().map_err(|_| GateError::Abandoned)
    }

    /// Like [`await_and_take`](Self::await_and_take), giving up after `timeout`.
    pub fn await_and_take_timeout(self, timeout: Duration) -> Result<T, GateError> {
        match self.slot.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(GateError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(GateError::Abandoned),
        }
    }

    /// Wait with an optional bound; `None` waits forever.
    pub fn await_with(self, timeout: Option<Duration>) -> Result<T, GateError> {
        match timeout {
            Some(timeout) => self.await_and_take_timeout(timeout),
            None => self.await_and_take(),
        }
    }
}

impl<T> GateDepositor<T> {
    /// Store `value` and release the waiter.
    ///
    /// Returns `false` when the value was discarded: the slot already holds
    /// an earlier deposit, or the waiter has gone away.
    pub fn deposit(&self, value: T) -> bool {
        match self.slot.try_send(value) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
