//! Blocking STOMP session
//!
//! Single responsibility: turn caller intent into receipt-confirmed broker
//! commands, one at a time.
//!
//! # Header precedence
//!
//! Lowest to highest:
//!
//! | Layer                     | Applies to                 |
//! |---------------------------|----------------------------|
//! | `subscribe_headers`       | SUBSCRIBE                  |
//! | `default_headers`         | every other command        |
//! | caller-supplied headers   | every command              |
//! | acknowledged message id   | ACK                        |
//! | open transaction id       | SEND, ACK, BEGIN/COMMIT/ABORT |
//!
//! The caller cannot override the `transaction` header of an open
//! transaction, and the `receipt` header always belongs to the invoker.
//!
//! # Transactions
//!
//! ```text
//!            transaction(block)
//!   NoTransaction ───────────────▶ TransactionOpen(id)
//!        ▲          BEGIN(id)             │
//!        │                                │ block(session)
//!        │        Ok  → COMMIT(id)        │
//!        └──────── Err → ABORT(id) ◀──────┘
//! ```
//!
//! A `transaction` call made while one is already open does not begin a new
//! one: the block simply runs inside the outer transaction.
//!
//! # Threading
//!
//! Every operation takes `&mut self`, so a session drives at most one
//! in-flight command. Receipts are delivered on the client's own thread.

use bytes::Bytes;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::client::AsyncClient;
use crate::config::SessionConfig;
use crate::error::{Result, StompError};
use crate::headers::{
    merge, Headers, Message, SubscriptionOptions, MESSAGE_ID, SUBSCRIPTION, TRANSACTION,
};
use crate::invoker::{Command, PendingCall, SynchronousInvoker};

/// A caller-facing session over an [`AsyncClient`].
pub struct Session {
    invoker: SynchronousInvoker,
    default_headers: Headers,
    subscribe_headers: Headers,
    transaction_prefix: String,
    /// Some while a transaction is open
    transaction_id: Option<String>,
    transaction_counter: AtomicU64,
    session_id: Uuid,
}

impl Session {
    /// Create a session over `client`.
    ///
    /// # Errors
    /// `StompError::Config` when `config` fails validation.
    pub fn new(client: Arc<dyn AsyncClient>, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let session_id = Uuid::new_v4();
        let invoker = SynchronousInvoker::new(client, config.receipt_timeout());
        info!(
            session = %session_id,
            receipt_timeout = ?invoker.receipt_timeout(),
            "Session created"
        );

        Ok(Self {
            invoker,
            default_headers: config.default_headers,
            subscribe_headers: config.subscribe_headers,
            transaction_prefix: config.transaction_prefix,
            transaction_id: None,
            transaction_counter: AtomicU64::new(0),
            session_id,
        })
    }

    pub fn default_headers(&self) -> &Headers {
        &self.default_headers
    }

    pub fn subscribe_headers(&self) -> &Headers {
        &self.subscribe_headers
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Id of the open transaction, if any.
    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_id.is_some()
    }

    /// Send `body` to `destination` and wait for the broker's receipt.
    ///
    /// Returns the receipt id.
    pub fn send(
        &mut self,
        destination: &str,
        body: impl Into<Bytes>,
        headers: &Headers,
    ) -> Result<String> {
        let headers = self.command_headers(&[headers]);
        self.invoke(
            Command::Send {
                destination: destination.to_string(),
                body: body.into(),
            },
            headers,
        )
    }

    /// Acknowledge consumption of `message` and wait for the receipt.
    ///
    /// The message's `message-id` and `subscription` sit above the caller's
    /// headers, so the frame always names the message being acknowledged.
    ///
    /// # Errors
    /// `StompError::Protocol` if `message` carries no `message-id`; nothing
    /// is dispatched in that case.
    pub fn acknowledge(&mut self, message: &Message, headers: &Headers) -> Result<String> {
        let message_id = message
            .message_id()
            .ok_or_else(|| {
                StompError::Protocol("cannot acknowledge a message without message-id".into())
            })?
            .to_string();

        let mut identity = Headers::new();
        identity.insert(MESSAGE_ID.to_string(), message_id.clone());
        if let Some(subscription) = message.subscription() {
            identity.insert(SUBSCRIPTION.to_string(), subscription.to_string());
        }

        debug!(
            message_id = %message_id,
            destination = ?message.destination(),
            "Acknowledging message"
        );
        let headers = self.command_headers(&[headers, &identity]);
        self.invoke(Command::Ack { message_id }, headers)
    }

    /// Subscribe to `destination` and wait for the receipt.
    ///
    /// Uses `subscribe_headers` instead of `default_headers`; `options` sit
    /// between those and the caller's headers.
    pub fn subscribe(
        &mut self,
        destination: &str,
        options: &SubscriptionOptions,
        headers: &Headers,
    ) -> Result<String> {
        let headers = merge(&[&self.subscribe_headers, &options.to_headers(), headers]);
        self.invoke(
            Command::Subscribe {
                destination: destination.to_string(),
            },
            headers,
        )
    }

    /// Unsubscribe from `destination` and wait for the receipt.
    pub fn unsubscribe(&mut self, destination: &str, headers: &Headers) -> Result<String> {
        let headers = merge(&[&self.default_headers, headers]);
        self.invoke(
            Command::Unsubscribe {
                destination: destination.to_string(),
            },
            headers,
        )
    }

    /// Run `block` inside a broker transaction.
    ///
    /// Outermost call: BEGIN, run `block`, then COMMIT on `Ok` or ABORT on
    /// `Err`. The block's error is returned unchanged after the rollback; a
    /// failing rollback is logged and never replaces it. If COMMIT itself
    /// fails, ABORT is attempted and the commit error is returned.
    ///
    /// Nested call: `block` runs as part of the open transaction with no
    /// commands of its own.
    ///
    /// The session is back to no open transaction on every exit, including a
    /// panic unwinding out of `block` (which is rolled back and resumed).
    pub fn transaction<T, E, F>(&mut self, block: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Session) -> std::result::Result<T, E>,
        E: From<StompError> + fmt::Display,
    {
        if let Some(id) = &self.transaction_id {
            debug!(transaction = %id, "Joining open transaction");
            return block(self);
        }

        let id = self.next_transaction_id();
        self.transaction_id = Some(id.clone());
        let mut scope = TransactionScope { session: self };

        if let Err(e) = scope.session.transaction_command(Command::Begin {
            transaction: id.clone(),
        }) {
            warn!(transaction = %id, error = %e, "BEGIN failed");
            return Err(e.into());
        }
        debug!(transaction = %id, "Transaction begun");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| block(&mut *scope.session)));

        match outcome {
            Ok(Ok(value)) => match scope.session.transaction_command(Command::Commit {
                transaction: id.clone(),
            }) {
                Ok(_) => {
                    debug!(transaction = %id, "Transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    warn!(transaction = %id, error = %e, "COMMIT failed");
                    scope.session.rollback(&id, &e);
                    Err(e.into())
                }
            },
            Ok(Err(e)) => {
                scope.session.rollback(&id, &e);
                Err(e)
            }
            Err(payload) => {
                scope.session.rollback(&id, &"transaction block panicked");
                panic::resume_unwind(payload);
            }
        }
    }

    /// ABORT `id`, logging (never returning) a rollback failure.
    fn rollback(&mut self, id: &str, cause: &dyn fmt::Display) {
        match self.transaction_command(Command::Abort {
            transaction: id.to_string(),
        }) {
            Ok(_) => debug!(transaction = %id, cause = %cause, "Transaction rolled back"),
            Err(rollback_error) => error!(
                transaction = %id,
                cause = %cause,
                rollback_error = %rollback_error,
                "Rollback failed; reporting the original failure"
            ),
        }
    }

    fn transaction_command(&mut self, command: Command) -> Result<String> {
        let headers = self.command_headers(&[]);
        self.invoke(command, headers)
    }

    /// `default_headers` < `layers` < open transaction id.
    fn command_headers(&self, layers: &[&Headers]) -> Headers {
        let mut all = Vec::with_capacity(layers.len() + 1);
        all.push(&self.default_headers);
        all.extend_from_slice(layers);

        let mut headers = merge(&all);
        if let Some(id) = &self.transaction_id {
            headers.insert(TRANSACTION.to_string(), id.clone());
        }
        headers
    }

    fn next_transaction_id(&self) -> String {
        let n = self.transaction_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}-{}", self.transaction_prefix, n, self.session_id)
    }

    fn invoke(&mut self, command: Command, headers: Headers) -> Result<String> {
        self.invoker.invoke(PendingCall::new(command, headers))
    }
}

/// Closes the session's open transaction when an outermost `transaction`
/// call exits, whether it returns or unwinds.
struct TransactionScope<'a> {
    session: &'a mut Session,
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.session.transaction_id.take() {
            trace!(transaction = %id, "Transaction closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ReceiptListener, ReceiptToken};
    use std::sync::Mutex;

    /// Records every dispatch and answers inline.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(&'static str, Headers)>>,
        listener: Mutex<Option<ReceiptListener>>,
        /// Command whose next dispatch panics
        panic_once: Mutex<Option<&'static str>>,
    }

    impl Recorder {
        fn record(&self, name: &'static str, headers: Headers) -> Result<()> {
            let mut armed = self.panic_once.lock().unwrap();
            if *armed == Some(name) {
                *armed = None;
                drop(armed);
                panic!("{} dispatch panicked", name);
            }
            drop(armed);
            let receipt = headers["receipt"].clone();
            self.calls.lock().unwrap().push((name, headers));
            if let Some(listener) = self.listener.lock().unwrap().take() {
                listener(Ok(format!("done:{}", receipt)));
            }
            Ok(())
        }

        fn names(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().iter().map(|(n, _)| *n).collect()
        }

        fn headers(&self, index: usize) -> Headers {
            self.calls.lock().unwrap()[index].1.clone()
        }
    }

    impl AsyncClient for Recorder {
        fn register_receipt_listener(&self, listener: ReceiptListener) -> ReceiptToken {
            *self.listener.lock().unwrap() = Some(listener);
            ReceiptToken::new(format!("r{}", self.calls.lock().unwrap().len()))
        }

        fn deregister_receipt_listener(&self, _token: &ReceiptToken) -> bool {
            self.listener.lock().unwrap().take().is_some()
        }

        fn send(&self, _destination: &str, _body: Bytes, headers: Headers) -> Result<()> {
            self.record("SEND", headers)
        }

        fn begin(&self, _transaction: &str, headers: Headers) -> Result<()> {
            self.record("BEGIN", headers)
        }

        fn commit(&self, _transaction: &str, headers: Headers) -> Result<()> {
            self.record("COMMIT", headers)
        }

        fn abort(&self, _transaction: &str, headers: Headers) -> Result<()> {
            self.record("ABORT", headers)
        }

        fn acknowledge(&self, _message_id: &str, headers: Headers) -> Result<()> {
            self.record("ACK", headers)
        }

        fn subscribe(&self, _destination: &str, headers: Headers) -> Result<()> {
            self.record("SUBSCRIBE", headers)
        }

        fn unsubscribe(&self, _destination: &str, headers: Headers) -> Result<()> {
            self.record("UNSUBSCRIBE", headers)
        }
    }

    fn session() -> (Session, Arc<Recorder>) {
        session_over(Recorder::default())
    }

    fn session_over(recorder: Recorder) -> (Session, Arc<Recorder>) {
        let recorder = Arc::new(recorder);
        let config = SessionConfig::default()
            .with_default_header("a", "1")
            .with_subscribe_header("a", "2");
        (Session::new(recorder.clone(), config).unwrap(), recorder)
    }

    fn caller(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_send_returns_receipt_and_merges_headers() {
        let (mut session, recorder) = session();

        let receipt = session.send("/queue/a", "x", &caller(&[("a", "3")])).unwrap();

        assert_eq!(receipt, "done:r0");
        let headers = recorder.headers(0);
        assert_eq!(headers["a"], "3");
        assert!(!headers.contains_key(TRANSACTION));
    }

    #[test]
    fn test_subscribe_uses_subscribe_defaults() {
        let (mut session, recorder) = session();

        let options = SubscriptionOptions::default().prefetch_size(1);
        session
            .subscribe("/topic/t", &options, &Headers::new())
            .unwrap();

        let headers = recorder.headers(0);
        assert_eq!(headers["a"], "2");
        assert_eq!(headers["activemq.prefetchSize"], "1");
    }

    #[test]
    fn test_transaction_id_format_and_reset() {
        let (mut session, recorder) = session();
        let sid = session.session_id();

        let seen: std::result::Result<String, StompError> = session.transaction(|s| {
            Ok(s.transaction_id().unwrap().to_string())
        });

        assert_eq!(seen.unwrap(), format!("transaction-1-{}", sid));
        assert!(!session.in_transaction());
        assert_eq!(recorder.names(), vec!["BEGIN", "COMMIT"]);
    }

    #[test]
    fn test_acknowledge_requires_message_id() {
        let (mut session, recorder) = session();

        let err = session
            .acknowledge(&Message::default(), &Headers::new())
            .unwrap_err();

        assert!(matches!(err, StompError::Protocol(_)));
        assert!(recorder.names().is_empty());
    }

    #[test]
    fn test_acknowledge_carries_message_identity() {
        let (mut session, recorder) = session();
        let message = Message::new(caller(&[("message-id", "ID:7"), ("subscription", "0")]), "");

        session.acknowledge(&message, &Headers::new()).unwrap();

        let headers = recorder.headers(0);
        assert_eq!(headers["message-id"], "ID:7");
        assert_eq!(headers["subscription"], "0");
        assert_eq!(headers["a"], "1");
    }

    #[test]
    fn test_panic_in_block_rolls_back_and_resets() {
        let (mut session, recorder) = session();

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: std::result::Result<(), StompError> =
                session.transaction(|_| panic!("boom"));
        }));

        assert!(unwound.is_err());
        assert!(!session.in_transaction());
        assert_eq!(recorder.names(), vec!["BEGIN", "ABORT"]);
    }

    #[test]
    fn test_acknowledge_identity_overrides_caller_headers() {
        let (mut session, recorder) = session();
        let message = Message::new(caller(&[("message-id", "ID:7"), ("subscription", "0")]), "");

        session
            .acknowledge(&message, &caller(&[("message-id", "ID:other"), ("x", "y")]))
            .unwrap();

        let headers = recorder.headers(0);
        assert_eq!(headers["message-id"], "ID:7");
        assert_eq!(headers["subscription"], "0");
        assert_eq!(headers["x"], "y");
    }

    #[test]
    fn test_panic_in_commit_still_closes_transaction() {
        let (mut session, recorder) = session_over(Recorder {
            panic_once: Mutex::new(Some("COMMIT")),
            ..Default::default()
        });

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: std::result::Result<(), StompError> = session.transaction(|_| Ok(()));
        }));

        assert!(unwound.is_err());
        assert!(!session.in_transaction());

        let sent: std::result::Result<String, StompError> =
            session.transaction(|s| s.send("/queue/a", "x", &Headers::new()));

        assert!(sent.is_ok());
        assert!(!session.in_transaction());
        assert_eq!(recorder.names(), vec!["BEGIN", "BEGIN", "SEND", "COMMIT"]);
        let sid = session.session_id();
        assert_eq!(recorder.headers(2)[TRANSACTION], format!("transaction-2-{}", sid));
    }

    #[test]
    fn test_panic_in_begin_still_closes_transaction() {
        let (mut session, recorder) = session_over(Recorder {
            panic_once: Mutex::new(Some("BEGIN")),
            ..Default::default()
        });

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: std::result::Result<(), StompError> =
                session.transaction(|_| panic!("block must not run"));
        }));

        assert!(unwound.is_err());
        assert!(!session.in_transaction());
        assert!(recorder.names().is_empty());

        session.send("/queue/a", "x", &Headers::new()).unwrap();
        assert!(!recorder.headers(0).contains_key(TRANSACTION));
    }
}
