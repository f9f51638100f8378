// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Logging setup shared by the Manager and Worker binaries.

use crate::error::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default cap on how much rendered log text [`LogCapture`] retains; once
/// exceeded, the oldest bytes are dropped so a long-running Manager/Worker
/// can't grow its captured log without bound before upload.
const DEFAULT_MAX_CAPTURED_BYTES: usize = 4 * 1024 * 1024;

/// A `tracing_subscriber::fmt` [`MakeWriter`] that renders every log line
/// into an in-memory buffer instead of (or in addition to) stdout, so the
/// exact lines a run produced can be persisted to the Object Store as
/// `<R>_manager.log` / `<worker>.log` (§6) rather than a separate
/// hand-written placeholder string. Every line carries the `fmt` layer's
/// default UTC timestamp prefix, which is what makes `merge_worker_logs`'
/// sort-by-line a true timestamp-ordered merge (§4.4).
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// The captured log text so far, valid UTF-8 lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.buffer.lock().unwrap();
        guard.extend_from_slice(buf);
        let overflow = guard.len().saturating_sub(DEFAULT_MAX_CAPTURED_BYTES);
        if overflow > 0 {
            guard.drain(0..overflow);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub format: LogFormat,
    /// `tracing_subscriber::EnvFilter` directive string, e.g. `"info,batchfleet=debug"`.
    pub filter: String,
    /// Optional OTLP collector endpoint. `None` by default: the
    /// `fmt` layer below is always installed, this is additive span export
    /// wiring left for a deployment that actually runs a collector.
    pub otlp_endpoint: Option<String>,
}

impl TracingConfig {
    /// Verbose, human-readable defaults for running off a laptop, in the
    /// same shape as every other service's `Default` config in this stack.
    pub fn local_dev(component: &str) -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: format!("info,{component}=debug"),
            otlp_endpoint: None,
        }
    }

    /// Initializes the global `tracing` subscriber. Must be called once, as
    /// early as possible in `main`, before any other operation that might log.
    ///
    /// Besides the console layer (pretty or JSON, per `self.format`), this
    /// installs a plain-text, non-ANSI [`LogCapture`] layer so the caller
    /// can upload the run's actual rendered log lines at the end of the run
    /// (§7.1) instead of a separate ad hoc summary string.
    pub fn init(&self) -> LogCapture {
        let capture = LogCapture::new();
        let captured_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(capture.clone());

        let env_filter = EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);
        match self.format {
            LogFormat::Pretty => {
                registry
                    .with(tracing_subscriber::fmt::layer())
                    .with(captured_layer)
                    .init();
            }
            LogFormat::Json => {
                registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .with(captured_layer)
                    .init();
            }
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            tracing::warn!(
                endpoint,
                "otlp_endpoint configured but no OTLP exporter is wired into this build"
            );
        }
        capture
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::local_dev("batchfleet")
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "format: {:?}", self.format);
        let _ = writeln!(&mut result, "filter: {}", self.filter);
        let _ = writeln!(&mut result, "otlp: {}", self.otlp_endpoint.is_some());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use test_r::test;

    #[test]
    fn log_capture_accumulates_writes() {
        let mut capture = LogCapture::new();
        capture.write_all(b"first line\n").unwrap();
        capture.write_all(b"second line\n").unwrap();
        assert_eq!(capture.contents(), "first line\nsecond line\n");
    }

    #[test]
    fn log_capture_drops_oldest_bytes_past_the_cap() {
        let mut capture = LogCapture::new();
        capture.buffer = Arc::new(Mutex::new(vec![b'a'; DEFAULT_MAX_CAPTURED_BYTES - 3]));
        capture.write_all(b"xyz").unwrap();
        assert_eq!(capture.contents().len(), DEFAULT_MAX_CAPTURED_BYTES);

        capture.write_all(b"overflow").unwrap();
        let contents = capture.contents();
        assert_eq!(contents.len(), DEFAULT_MAX_CAPTURED_BYTES);
        assert!(contents.ends_with("overflow"));
    }
}
