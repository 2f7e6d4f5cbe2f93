//! In-process loopback broker
//!
//! An [`AsyncClient`] with no network underneath: commands are queued to a
//! tokio task that plays the broker, journals each command in arrival order,
//! and answers its receipt from the runtime's worker thread. Use it for
//! tests, local development, and the smoke binary.
//!
//! Faults can be injected per command name:
//! - `reject` answers the receipt with a broker ERROR
//! - `withhold` never answers (exercises receipt timeouts)
//! - `disconnect` / `exhaust_connection_attempts` fail dispatch synchronously

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::client::{AsyncClient, ReceiptListener, ReceiptOutcome, ReceiptToken};
use crate::error::{Result, StompError};
use crate::headers::{Headers, RECEIPT};

/// Loopback broker settings
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Delay before each command is answered
    pub receipt_delay: Duration,
}

/// A command as the loopback broker received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Protocol command name (`SEND`, `BEGIN`, ...)
    pub command: &'static str,
    /// Destination, transaction id, or message id, depending on the command
    pub target: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl RecordedCommand {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connection {
    Up,
    Down,
    Exhausted(u32),
}

#[derive(Debug)]
struct Faults {
    rejected: HashSet<&'static str>,
    withheld: HashSet<&'static str>,
    connection: Connection,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            rejected: HashSet::new(),
            withheld: HashSet::new(),
            connection: Connection::Up,
        }
    }
}

struct Shared {
    listeners: DashMap<ReceiptToken, ReceiptListener>,
    journal: Mutex<Vec<RecordedCommand>>,
    faults: RwLock<Faults>,
}

impl Shared {
    fn faults(&self) -> std::sync::RwLockReadGuard<'_, Faults> {
        self.faults.read().unwrap_or_else(|e| e.into_inner())
    }

    fn faults_mut(&self) -> std::sync::RwLockWriteGuard<'_, Faults> {
        self.faults.write().unwrap_or_else(|e| e.into_inner())
    }

    fn journal(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCommand>> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fire and remove the listener for `token`.
    fn fire(&self, token: &ReceiptToken, outcome: ReceiptOutcome) -> bool {
        match self.listeners.remove(token) {
            Some((_, listener)) => {
                listener(outcome);
                true
            }
            None => false,
        }
    }
}

/// In-process [`AsyncClient`] backed by a tokio broker task.
pub struct LoopbackClient {
    commands: mpsc::UnboundedSender<RecordedCommand>,
    shared: Arc<Shared>,
    next_receipt: AtomicU64,
    registrations: AtomicU64,
}

impl LoopbackClient {
    /// Start the broker task on `runtime`.
    pub fn start(runtime: &Handle, config: LoopbackConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            listeners: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            faults: RwLock::new(Faults::default()),
        });

        let broker_shared = Arc::clone(&shared);
        runtime.spawn(async move {
            broker_loop(rx, broker_shared, config.receipt_delay).await;
        });

        info!("Loopback broker started");

        Self {
            commands,
            shared,
            next_receipt: AtomicU64::new(1),
            registrations: AtomicU64::new(0),
        }
    }

    /// Answer every future `command` with a broker ERROR.
    pub fn reject(&self, command: &'static str) {
        self.shared.faults_mut().rejected.insert(command);
    }

    /// Never answer future `command`s.
    pub fn withhold(&self, command: &'static str) {
        self.shared.faults_mut().withheld.insert(command);
    }

    /// Refuse dispatch with `NotConnected`.
    pub fn disconnect(&self) {
        self.shared.faults_mut().connection = Connection::Down;
    }

    /// Refuse dispatch as the connection layer does once it gives up.
    pub fn exhaust_connection_attempts(&self, attempts: u32) {
        self.shared.faults_mut().connection = Connection::Exhausted(attempts);
    }

    /// Drop every injected fault and reconnect.
    pub fn clear_faults(&self) {
        *self.shared.faults_mut() = Faults::default();
    }

    /// Deliver `outcome` to the listener for `token`, as a broker echo would.
    ///
    /// Returns whether a listener was waiting.
    pub fn deliver_receipt(&self, token: &ReceiptToken, outcome: ReceiptOutcome) -> bool {
        self.shared.fire(token, outcome)
    }

    /// Every command received so far, in broker order.
    pub fn journal(&self) -> Vec<RecordedCommand> {
        self.shared.journal().clone()
    }

    /// Command names received so far, in broker order.
    pub fn command_names(&self) -> Vec<&'static str> {
        self.shared.journal().iter().map(|c| c.command).collect()
    }

    /// Total listener registrations since start.
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Listeners registered but not yet fired or removed.
    pub fn pending_listeners(&self) -> usize {
        self.shared.listeners.len()
    }

    fn dispatch(
        &self,
        command: &'static str,
        target: &str,
        body: Bytes,
        headers: Headers,
    ) -> Result<()> {
        match self.shared.faults().connection {
            Connection::Up => {}
            Connection::Down => {
                return Err(StompError::NotConnected(format!(
                    "loopback broker disconnected, cannot {}",
                    command
                )))
            }
            Connection::Exhausted(attempts) => {
                return Err(StompError::MaxConnectionAttemptsReached(attempts))
            }
        }

        self.commands
            .send(RecordedCommand {
                command,
                target: target.to_string(),
                headers,
                body,
            })
            .map_err(|_| StompError::NotConnected("loopback broker stopped".into()))
    }
}

impl AsyncClient for LoopbackClient {
    fn register_receipt_listener(&self, listener: ReceiptListener) -> ReceiptToken {
        let n = self.next_receipt.fetch_add(1, Ordering::SeqCst);
        let token = ReceiptToken::new(format!("receipt-{}", n));
        self.shared.listeners.insert(token.clone(), listener);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        token
    }

    fn deregister_receipt_listener(&self, token: &ReceiptToken) -> bool {
        self.shared.listeners.remove(token).is_some()
    }

    fn send(&self, destination: &str, body: Bytes, headers: Headers) -> Result<()> {
        self.dispatch("SEND", destination, body, headers)
    }

    fn begin(&self, transaction: &str, headers: Headers) -> Result<()> {
        self.dispatch("BEGIN", transaction, Bytes::new(), headers)
    }

    fn commit(&self, transaction: &str, headers: Headers) -> Result<()> {
        self.dispatch("COMMIT", transaction, Bytes::new(), headers)
    }

    fn abort(&self, transaction: &str, headers: Headers) -> Result<()> {
        self.dispatch("ABORT", transaction, Bytes::new(), headers)
    }

    fn acknowledge(&self, message_id: &str, headers: Headers) -> Result<()> {
        self.dispatch("ACK", message_id, Bytes::new(), headers)
    }

    fn subscribe(&self, destination: &str, headers: Headers) -> Result<()> {
        self.dispatch("SUBSCRIBE", destination, Bytes::new(), headers)
    }

    fn unsubscribe(&self, destination: &str, headers: Headers) -> Result<()> {
        self.dispatch("UNSUBSCRIBE", destination, Bytes::new(), headers)
    }
}

/// Broker loop - runs in a spawned task.
///
/// Journals each command, then answers its receipt unless withheld.
async fn broker_loop(
    mut rx: mpsc::UnboundedReceiver<RecordedCommand>,
    shared: Arc<Shared>,
    receipt_delay: Duration,
) {
    debug!("Broker loop started");

    while let Some(frame) = rx.recv().await {
        if !receipt_delay.is_zero() {
            tokio::time::sleep(receipt_delay).await;
        }

        let command = frame.command;
        let receipt = frame.headers.get(RECEIPT).cloned();
        shared.journal().push(frame);

        let Some(receipt) = receipt else {
            trace!(command, "Command without receipt");
            continue;
        };

        let outcome = {
            let faults = shared.faults();
            if faults.withheld.contains(command) {
                trace!(command, receipt = %receipt, "Withholding receipt");
                continue;
            }
            if faults.rejected.contains(command) {
                Err(StompError::Protocol(format!("broker rejected {}", command)))
            } else {
                Ok(receipt.clone())
            }
        };

        let token = ReceiptToken::new(receipt);
        if !shared.fire(&token, outcome) {
            warn!(command, receipt = %token, "No listener for receipt");
        }
    }

    debug!("Broker loop ended");
}
