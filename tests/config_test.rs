//! Config loading integration tests

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use stomp_sync::{Headers, LoopbackClient, LoopbackConfig, Session, SessionConfig, StompError};

#[test]
fn test_load_from_file_feeds_session_defaults() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"
receipt_timeout_ms = 2000
transaction_prefix = "billing"

[default_headers]
persistent = "true"
priority = "4"

[subscribe_headers]
ack = "client-individual"
"#
    )
    .expect("write config");

    let config = SessionConfig::load(file.path()).expect("valid config");
    assert_eq!(config.receipt_timeout(), Some(Duration::from_secs(2)));

    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let client = Arc::new(LoopbackClient::start(rt.handle(), LoopbackConfig::default()));
    let mut session = Session::new(client.clone(), config).expect("session");

    assert_eq!(session.default_headers()["persistent"], "true");
    assert_eq!(session.subscribe_headers()["ack"], "client-individual");

    let id = session
        .transaction(|s| -> Result<String, StompError> {
            s.send("/queue/invoices", "inv-1", &Headers::new())?;
            Ok(s.transaction_id().unwrap_or_default().to_string())
        })
        .expect("transaction");

    assert!(id.starts_with("billing-1-"));
    assert!(id.ends_with(&session.session_id().to_string()));

    let journal = client.journal();
    assert_eq!(journal[1].header("priority"), Some("4"));
    assert_eq!(journal[1].header("transaction"), Some(id.as_str()));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = SessionConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, StompError::Io(_)));
}

#[test]
fn test_malformed_file_is_toml_error() {
    let err = SessionConfig::from_toml_str("receipt_timeout_ms = \"soon\"").unwrap_err();
    assert!(matches!(err, StompError::Toml(_)));
}

#[test]
fn test_invalid_config_rejected_by_session() {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let client = Arc::new(LoopbackClient::start(rt.handle(), LoopbackConfig::default()));

    let config = SessionConfig::default().with_default_header("transaction", "pinned");
    let err = Session::new(client, config).err().expect("rejected");
    assert!(matches!(err, StompError::Config(_)));
}
