//! Process-wide logging setup shared by every stock ledger binary and test harness.

pub mod tracing;

pub use self::tracing::{init, LogFormat, LogFormatError, LoggingConfig};
