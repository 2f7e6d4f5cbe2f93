//! Synchronous invocation of receipt-carrying commands
//!
//! Each call:
//! 1. creates a fresh [`AcknowledgmentGate`]
//! 2. registers a one-shot receipt listener that deposits into it
//! 3. stamps the listener's token into the `receipt` header
//! 4. hands the command to the [`AsyncClient`]
//! 5. blocks on the gate until the broker answers
//!
//! A listener is never left behind: a synchronous dispatch failure or a
//! timeout deregisters it before the error is returned.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::client::AsyncClient;
use crate::error::{Result, StompError};
use crate::gate::{AcknowledgmentGate, GateError};
use crate::headers::{Headers, RECEIPT};

/// A broker command and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send { destination: String, body: Bytes },
    Begin { transaction: String },
    Commit { transaction: String },
    Abort { transaction: String },
    Ack { message_id: String },
    Subscribe { destination: String },
    Unsubscribe { destination: String },
}

impl Command {
    /// Protocol name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Send { .. } => "SEND",
            Command::Begin { .. } => "BEGIN",
            Command::Commit { .. } => "COMMIT",
            Command::Abort { .. } => "ABORT",
            Command::Ack { .. } => "ACK",
            Command::Subscribe { .. } => "SUBSCRIBE",
            Command::Unsubscribe { .. } => "UNSUBSCRIBE",
        }
    }
}

/// One outstanding synchronous call: the command plus its merged headers.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub command: Command,
    pub headers: Headers,
}

impl PendingCall {
    pub fn new(command: Command, headers: Headers) -> Self {
        Self { command, headers }
    }
}

/// Turns one asynchronous receipt into a blocking return value.
#[derive(Clone)]
pub struct SynchronousInvoker {
    client: Arc<dyn AsyncClient>,
    /// `None` waits for the receipt indefinitely
    receipt_timeout: Option<Duration>,
}

impl SynchronousInvoker {
    pub fn new(client: Arc<dyn AsyncClient>, receipt_timeout: Option<Duration>) -> Self {
        Self {
            client,
            receipt_timeout,
        }
    }

    pub fn receipt_timeout(&self) -> Option<Duration> {
        self.receipt_timeout
    }

    /// Issue `call` and block until its receipt arrives.
    ///
    /// Returns the receipt id delivered by the broker.
    ///
    /// # Errors
    /// - Synchronous dispatch failures from the client, unchanged
    /// - `StompError::Protocol` when the broker answers with an error
    /// - `StompError::Timeout` when no receipt arrives within the bound
    /// - `StompError::ReceiptAbandoned` when the client drops the listener
    pub fn invoke(&self, call: PendingCall) -> Result<String> {
        let PendingCall {
            command,
            mut headers,
        } = call;
        let name = command.name();

        let (gate, depositor) = AcknowledgmentGate::new();
        let token = self
            .client
            .register_receipt_listener(Box::new(move |outcome| {
                if !depositor.deposit(outcome) {
                    trace!("Receipt arrived after its waiter gave up");
                }
            }));
        headers.insert(RECEIPT.to_string(), token.to_string());

        trace!(command = name, receipt = %token, "Dispatching command");

        if let Err(e) = self.dispatch(command, headers) {
            self.client.deregister_receipt_listener(&token);
            if e.is_connection_failure() {
                warn!(command = name, receipt = %token, error = %e, "Client not connected");
            } else {
                debug!(command = name, receipt = %token, error = %e, "Dispatch failed");
            }
            return Err(e);
        }

        match gate.await_with(self.receipt_timeout) {
            Ok(Ok(receipt_id)) => {
                debug!(command = name, receipt = %receipt_id, "Receipt received");
                Ok(receipt_id)
            }
            Ok(Err(e)) => {
                debug!(command = name, receipt = %token, error = %e, "Broker rejected command");
                Err(e)
            }
            Err(GateError::Timeout(after)) => {
                // A late receipt must not find a listener.
                self.client.deregister_receipt_listener(&token);
                warn!(command = name, receipt = %token, ?after, "Receipt timed out");
                Err(StompError::Timeout {
                    command: name.to_string(),
                    after,
                })
            }
            Err(GateError::Abandoned) => Err(StompError::ReceiptAbandoned(format!(
                "{} (receipt {})",
                name, token
            ))),
        }
    }

    fn dispatch(&self, command: Command, headers: Headers) -> Result<()> {
        match command {
            Command::Send { destination, body } => self.client.send(&destination, body, headers),
            Command::Begin { transaction } => self.client.begin(&transaction, headers),
            Command::Commit { transaction } => self.client.commit(&transaction, headers),
            Command::Abort { transaction } => self.client.abort(&transaction, headers),
            Command::Ack { message_id } => self.client.acknowledge(&message_id, headers),
            Command::Subscribe { destination } => self.client.subscribe(&destination, headers),
            Command::Unsubscribe { destination } => {
                self.client.unsubscribe(&destination, headers)
            }
        }
    }
}
