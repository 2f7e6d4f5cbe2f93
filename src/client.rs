//! The asynchronous client boundary
//!
//! Everything below this trait (framing, sockets, failover, delivery to
//! consumers) belongs to the client implementation. The session only needs
//! to issue commands and be told, later and on some other thread, whether the
//! broker acknowledged them.

use bytes::Bytes;
use std::fmt;

use crate::error::Result;
use crate::headers::Headers;

/// Outcome delivered to a receipt listener: the receipt id, or the broker
/// error correlated with it.
pub type ReceiptOutcome = Result<String>;

/// One-shot callback fired when the broker answers a receipt-carrying command.
pub type ReceiptListener = Box<dyn FnOnce(ReceiptOutcome) + Send + Sync + 'static>;

/// Correlation token for a registered listener; travels in the `receipt` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback-driven broker client.
///
/// Dispatch methods return once the command is handed to the transport;
/// their `Err` covers only failures known synchronously (not connected,
/// connection attempts exhausted). Broker-side results arrive through the
/// listener registered under the command's `receipt` header.
pub trait AsyncClient: Send + Sync {
    /// Register a listener fired at most once for the returned token.
    fn register_receipt_listener(&self, listener: ReceiptListener) -> ReceiptToken;

    /// Remove a listener that has not fired. Returns whether it was present.
    fn deregister_receipt_listener(&self, token: &ReceiptToken) -> bool;

    fn send(&self, destination: &str, body: Bytes, headers: Headers) -> Result<()>;

    fn begin(&self, transaction: &str, headers: Headers) -> Result<()>;

    fn commit(&self, transaction: &str, headers: Headers) -> Result<()>;

    fn abort(&self, transaction: &str, headers: Headers) -> Result<()>;

    fn acknowledge(&self, message_id: &str, headers: Headers) -> Result<()>;

    fn subscribe(&self, destination: &str, headers: Headers) -> Result<()>;

    fn unsubscribe(&self, destination: &str, headers: Headers) -> Result<()>;
}
