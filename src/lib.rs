//! stomp-sync - blocking, receipt-confirmed sessions over an asynchronous STOMP client
//!
//! The broker client underneath is callback driven: commands go out, and the
//! broker's RECEIPT arrives later on the client's own thread. This crate lets
//! ordinary single-threaded code call `send`, `acknowledge` or `transaction`
//! and simply get the receipt back once the broker has it.
//!
//! ## Layers
//!
//! | Module     | Responsibility                                          |
//! |------------|---------------------------------------------------------|
//! | `gate`     | Single-use rendezvous between two threads               |
//! | `invoker`  | One command, one receipt listener, one blocking wait    |
//! | `session`  | Header defaults and the transaction state machine       |
//! | `client`   | The asynchronous client boundary (`AsyncClient`)        |
//! | `loopback` | In-process broker implementing `AsyncClient`            |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stomp_sync::{Headers, LoopbackClient, LoopbackConfig, Session, SessionConfig, StompError};
//!
//! # fn example() -> Result<(), StompError> {
//! let runtime = tokio::runtime::Runtime::new()?;
//! let client = Arc::new(LoopbackClient::start(runtime.handle(), LoopbackConfig::default()));
//!
//! let config = SessionConfig::default().with_default_header("persistent", "true");
//! let mut session = Session::new(client, config)?;
//!
//! // Returns once the broker has confirmed the SEND
//! let receipt = session.send("/queue/orders", "order-1", &Headers::new())?;
//!
//! // BEGIN, two SENDs, COMMIT - or ABORT if the block fails
//! session.transaction(|s| -> Result<String, StompError> {
//!     s.send("/queue/orders", "order-2", &Headers::new())?;
//!     s.send("/queue/orders", "order-3", &Headers::new())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod headers;
pub mod invoker;
pub mod loopback;
pub mod session;

// Re-export main types
pub use client::{AsyncClient, ReceiptListener, ReceiptOutcome, ReceiptToken};
pub use config::{Args, SessionConfig};
pub use error::{Result, StompError};
pub use gate::{AcknowledgmentGate, GateDepositor, GateError};
pub use headers::{Headers, Message, SubscriptionOptions};
pub use invoker::{Command, PendingCall, SynchronousInvoker};
pub use loopback::{LoopbackClient, LoopbackConfig, RecordedCommand};
pub use session::Session;
