//! Injectable structured logging.
//!
//! The router, recognizer, trainer and engine manager each hold an
//! `Arc<NluLogger>`; there is no process-wide logger. An entry names the
//! component that wrote it and, when a bus message is being handled, the
//! Hermes site and session it belongs to.
//!
//! ```text
//!  component ──log(entry)──▶ NluLogger ──▶ [StderrSink, TracingSink, MemorySink, ...]
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Writing component: "router", "recognizer", "trainer", "engine", ...
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
            site_id: None,
            session_id: None,
            payload: None,
        }
    }

    pub fn with_site(mut self, site_id: &str) -> Self {
        self.site_id = Some(site_id.to_string());
        self
    }

    pub fn with_session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_string);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// `2024-05-01T10:00:00.000Z DEBUG engine site=kitchen session=s1: Trained engine {"seconds":0.2}`
impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.level,
            self.source
        )?;
        if let Some(site) = &self.site_id {
            write!(f, " site={site}")?;
        }
        if let Some(session) = &self.session_id {
            write!(f, " session={session}")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(payload) = &self.payload {
            write!(f, " {payload}")?;
        }
        Ok(())
    }
}

/// Receives every entry that passes the logger's level filter. Must not block.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry);
}

pub struct NluLogger {
    min_level: LogLevel,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl NluLogger {
    /// No sinks yet, every level passes.
    pub fn new() -> Self {
        Self {
            min_level: LogLevel::Trace,
            sinks: Vec::new(),
        }
    }

    /// Drops everything.
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Stderr at `Info` and above.
    pub fn stderr() -> Arc<Self> {
        Arc::new(
            Self::new()
                .with_level(LogLevel::Info)
                .with_sink(Arc::new(StderrSink)),
        )
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        !self.sinks.is_empty() && level >= self.min_level
    }

    pub fn log(&self, entry: &LogEntry) {
        if self.enabled(entry.level) {
            self.sinks.iter().for_each(|sink| sink.write(entry));
        }
    }

    fn emit(&self, level: LogLevel, source: &str, message: &str) {
        if self.enabled(level) {
            self.log(&LogEntry::new(level, source, message));
        }
    }

    pub fn debug(&self, source: &str, message: &str) {
        self.emit(LogLevel::Debug, source, message);
    }

    pub fn info(&self, source: &str, message: &str) {
        self.emit(LogLevel::Info, source, message);
    }

    pub fn warn(&self, source: &str, message: &str) {
        self.emit(LogLevel::Warn, source, message);
    }

    pub fn error(&self, source: &str, message: &str) {
        self.emit(LogLevel::Error, source, message);
    }
}

impl Default for NluLogger {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// One line per entry on stderr; stdout stays free for the host.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, entry: &LogEntry) {
        eprintln!("{entry}");
    }
}

/// Re-emits entries as `tracing` events under the `nlu_hermes` target.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, entry: &LogEntry) {
        let site = entry.site_id.as_deref().unwrap_or_default();
        let session = entry.session_id.as_deref().unwrap_or_default();
        let payload = entry
            .payload
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        macro_rules! forward {
            ($level:ident) => {
                tracing::$level!(
                    target: "nlu_hermes",
                    source = %entry.source,
                    site = %site,
                    session = %session,
                    payload = %payload,
                    "{}",
                    entry.message
                )
            };
        }

        match entry.level {
            LogLevel::Trace => forward!(trace),
            LogLevel::Debug => forward!(debug),
            LogLevel::Info => forward!(info),
            LogLevel::Warn => forward!(warn),
            LogLevel::Error => forward!(error),
        }
    }
}

/// Keeps entries for later inspection.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Messages written by `source`, oldest first.
    pub fn messages(&self, source: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn contains(&self, source: &str, needle: &str) -> bool {
        self.lock()
            .iter()
            .any(|e| e.source == source && e.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) {
        self.lock().push(entry.clone());
    }
}

pub struct CallbackSink {
    callback: Box<dyn Fn(&LogEntry) + Send + Sync>,
}

impl CallbackSink {
    pub fn new(callback: impl Fn(&LogEntry) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl LogSink for CallbackSink {
    fn write(&self, entry: &LogEntry) {
        (self.callback)(entry)
    }
}
