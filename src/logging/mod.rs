use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

pub const DEFAULT_CAPTURE_BYTES: usize = 100_000;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl LogLevel {
    pub fn from_config_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "verbose" => Some(Self::Verbose),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Verbose => "VERBOSE",
        }
    }

    fn as_colored_str(self) -> &'static str {
        match self {
            Self::Error => "\x1b[31mERROR\x1b[0m",
            Self::Warn => "\x1b[33mWARN\x1b[0m",
            Self::Info => "\x1b[32mINFO\x1b[0m",
            Self::Debug => "\x1b[36mDEBUG\x1b[0m",
            Self::Verbose => "\x1b[35mVERBOSE\x1b[0m",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub human_friendly: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Debug,
            human_friendly: false,
        }
    }
}

pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

#[derive(Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }
}

/// Keeps the most recent log text in memory, bounded by `capacity_bytes`.
///
/// Lines are always stored without ANSI colors so remote readers get plain text.
pub struct LogCapture {
    capacity_bytes: usize,
    inner: Mutex<CaptureBuffer>,
}

#[derive(Default)]
struct CaptureBuffer {
    lines: VecDeque<String>,
    total_bytes: usize,
}

impl LogCapture {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            inner: Mutex::new(CaptureBuffer::default()),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn contents(&self) -> String {
        let buffer = self.inner.lock().expect("log capture lock poisoned");
        let mut text = String::with_capacity(buffer.total_bytes);
        for line in &buffer.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

impl LogSink for LogCapture {
    fn write_line(&self, line: &str) {
        if self.capacity_bytes == 0 {
            return;
        }

        let mut buffer = self.inner.lock().expect("log capture lock poisoned");
        buffer.total_bytes += line.len() + 1;
        buffer.lines.push_back(line.to_owned());

        while buffer.total_bytes > self.capacity_bytes {
            let Some(evicted) = buffer.lines.pop_front() else {
                buffer.total_bytes = 0;
                break;
            };
            buffer.total_bytes -= evicted.len() + 1;
        }
    }
}

pub struct Logger {
    config: LoggerConfig,
    sink: Arc<dyn LogSink>,
    capture: Option<Arc<LogCapture>>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config,
            sink,
            capture: None,
        }
    }

    /// Mirrors every emitted line into `capture` as plain text.
    pub fn with_capture(mut self, capture: Arc<LogCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn error(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Error, context, message, None);
    }

    pub fn warn(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Warn, context, message, None);
    }

    pub fn info(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Info, context, message, None);
    }

    pub fn debug(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Debug, context, message, None);
    }

    pub fn verbose(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Verbose, context, message, None);
    }

    pub fn log(
        &self,
        level: LogLevel,
        context: Option<&str>,
        message: &str,
        payload: Option<Value>,
    ) {
        if !self.should_log(level) {
            return;
        }

        let line = self.format_line(
            level,
            context,
            message,
            payload.as_ref(),
            self.config.human_friendly,
        );
        self.sink.write_line(&line);

        if let Some(capture) = &self.capture {
            if self.config.human_friendly {
                capture.write_line(&self.format_line(
                    level,
                    context,
                    message,
                    payload.as_ref(),
                    false,
                ));
            } else {
                capture.write_line(&line);
            }
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level <= self.config.min_level
    }

    fn format_line(
        &self,
        level: LogLevel,
        context: Option<&str>,
        message: &str,
        payload: Option<&Value>,
        colored: bool,
    ) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let rendered_level = if colored {
            level.as_colored_str()
        } else {
            level.as_str()
        };

        let context_part = match context {
            Some(ctx) if !ctx.is_empty() => format!(" [{ctx}]"),
            _ => String::new(),
        };

        let payload_part = match payload {
            Some(value) => format!(" payload={value}"),
            None => String::new(),
        };

        format!("{timestamp} [{rendered_level}]{context_part} {message}{payload_part}")
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("config", &self.config)
            .field("sink", &"<dyn LogSink>")
            .field("capture", &self.capture.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{LogCapture, LogLevel, LogSink, Logger, LoggerConfig};

    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub(crate) lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        pub(crate) fn contains(&self, needle: &str) -> bool {
            self.lines
                .lock()
                .expect("memory sink mutex poisoned")
                .iter()
                .any(|line| line.contains(needle))
        }
    }

    impl LogSink for MemorySink {
        fn write_line(&self, line: &str) {
            self.lines
                .lock()
                .expect("memory sink mutex poisoned")
                .push(line.to_owned());
        }
    }

    pub(crate) fn memory_logger() -> (Arc<Logger>, Arc<MemorySink>) {
        memory_logger_at(LogLevel::Verbose)
    }

    pub(crate) fn memory_logger_at(min_level: LogLevel) -> (Arc<Logger>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::with_sink(
            LoggerConfig {
                min_level,
                human_friendly: false,
            },
            sink.clone(),
        );
        (Arc::new(logger), sink)
    }

    #[test]
    fn parses_config_levels_case_insensitively() {
        assert_eq!(LogLevel::from_config_value("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_config_value(" verbose "), Some(LogLevel::Verbose));
        assert_eq!(LogLevel::from_config_value("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_config_value("loud"), None);
    }

    #[test]
    fn debug_threshold_excludes_verbose_logs() {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::with_sink(LoggerConfig::default(), sink.clone());

        logger.debug(Some("tests::logger"), "debug message");
        logger.verbose(Some("tests::logger"), "verbose message");

        let lines = sink.lines.lock().expect("memory sink mutex poisoned");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[DEBUG]"));
        assert!(!lines[0].contains("verbose message"));
    }

    #[test]
    fn log_supports_optional_json_payload() {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::with_sink(LoggerConfig::default(), sink.clone());

        logger.log(
            LogLevel::Info,
            Some("tests::payload"),
            "payload attached",
            Some(json!({"command":"fill","connection_id":2})),
        );

        let lines = sink.lines.lock().expect("memory sink mutex poisoned");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[INFO]"));
        assert!(lines[0].contains("[tests::payload]"));
        assert!(lines[0].contains("payload={\"command\":\"fill\",\"connection_id\":2}"));
        assert!(lines[0].starts_with("20"));
    }

    #[test]
    fn capture_receives_plain_lines_even_when_stdout_is_colored() {
        let sink = Arc::new(MemorySink::default());
        let capture = Arc::new(LogCapture::new(4_096));
        let logger = Logger::with_sink(
            LoggerConfig {
                min_level: LogLevel::Info,
                human_friendly: true,
            },
            sink.clone(),
        )
        .with_capture(Arc::clone(&capture));

        logger.warn(Some("tests::capture"), "brightness clipped");

        let stdout_lines = sink.lines.lock().expect("memory sink mutex poisoned");
        assert!(stdout_lines[0].contains("\x1b[33mWARN"));
        let captured = capture.contents();
        assert!(captured.contains("[WARN] [tests::capture] brightness clipped"));
        assert!(!captured.contains('\x1b'));
    }

    #[test]
    fn capture_evicts_oldest_lines_past_capacity() {
        let capture = LogCapture::new(20);
        capture.write_line("first line");
        capture.write_line("second line");
        capture.write_line("third");

        let contents = capture.contents();
        assert!(!contents.contains("first line"));
        assert!(contents.contains("second line"));
        assert!(contents.ends_with("third\n"));
        assert!(contents.len() <= capture.capacity_bytes());
    }

    #[test]
    fn zero_capacity_capture_keeps_nothing() {
        let capture = LogCapture::new(0);
        capture.write_line("dropped");
        assert!(capture.contents().is_empty());
    }
}
