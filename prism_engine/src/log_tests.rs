//! Unit tests for log.rs
//!
//! Tests Logger trait, LogEntry, LogSeverity, and the engine_* macros.

use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
use crate::prism::Engine;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use serial_test::serial;

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_equality() {
    assert_eq!(LogSeverity::Info, LogSeverity::Info);
    assert_ne!(LogSeverity::Trace, LogSeverity::Debug);
}

// ============================================================================
// LOG ENTRY TESTS
// ============================================================================

#[test]
fn test_log_entry_creation_without_file_line() {
    let entry = LogEntry {
        severity: LogSeverity::Info,
        timestamp: SystemTime::now(),
        source: "prism::Engine".to_string(),
        message: "Engine initialized".to_string(),
        file: None,
        line: None,
    };

    assert_eq!(entry.severity, LogSeverity::Info);
    assert_eq!(entry.source, "prism::Engine");
    assert!(entry.file.is_none());
    assert!(entry.line.is_none());
}

#[test]
fn test_default_logger_does_not_panic() {
    let logger = DefaultLogger;
    logger.log(&LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "prism::test".to_string(),
        message: "message with details".to_string(),
        file: Some("log_tests.rs"),
        line: Some(1),
    });
}

// ============================================================================
// CUSTOM LOGGER / MACRO TESTS (share the global logger, run serially)
// ============================================================================

/// Logger that captures entries for inspection
struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn install_capture_logger() -> Arc<Mutex<Vec<LogEntry>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(CaptureLogger {
        entries: Arc::clone(&entries),
    });
    entries
}

#[test]
#[serial]
fn test_engine_info_macro_reaches_logger() {
    let entries = install_capture_logger();

    crate::engine_info!("prism::test", "hello {}", 42);

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].message, "hello 42");
    assert!(captured[0].file.is_none());

    drop(captured);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_error_macro_includes_file_line() {
    let entries = install_capture_logger();

    crate::engine_error!("prism::test", "failure: {}", "oops");

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Error);
    assert!(captured[0].file.is_some());
    assert!(captured[0].line.is_some());

    drop(captured);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_err_macro_logs_and_returns_error() {
    let entries = install_capture_logger();

    let err = crate::engine_err!("prism::test", "bad handle: {}", 7);
    match err {
        crate::prism::Error::BackendError(msg) => assert_eq!(msg, "bad handle: 7"),
        other => panic!("unexpected error variant: {:?}", other),
    }

    assert_eq!(entries.lock().unwrap().len(), 1);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_engine_bail_macro_returns_early() {
    fn failing() -> crate::prism::Result<()> {
        crate::engine_bail!("prism::test", "unsupported state");
    }

    let entries = install_capture_logger();
    let result = failing();
    assert!(result.is_err());
    assert_eq!(entries.lock().unwrap().len(), 1);
    Engine::reset_logger();
}
