//! Global log stream instances.
//!
//! One stream per context, one consumer (the log drain) for both.

use crate::logging::LogStream;

/// Immediate-context log stream.
///
/// Receives the fast-path lines of every armed source (interrupt handlers
/// on any core). Multiple producers, single consumer.
pub static RT_LOG_STREAM: LogStream = LogStream::new();

/// Deferred-context log stream.
///
/// Receives the reports written by [`LogStreamSink`](crate::report::LogStreamSink)
/// from the per-source workers. Multiple producers, single consumer.
pub static BG_LOG_STREAM: LogStream = LogStream::new();
