use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<&Level> for LogLevel {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warning,
            Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single buffered log line.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Multi-producer log buffer drained by one periodic consumer.
///
/// Producers never block: `emit` pushes onto an unbounded lock-free channel.
/// Lines not drained before the process exits are lost.
pub struct LogSink {
    tx: Sender<LogEvent>,
    rx: Receiver<LogEvent>,
}

static GLOBAL_SINK: OnceLock<Arc<LogSink>> = OnceLock::new();

impl LogSink {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// The process-wide sink, created on first use.
    pub fn global() -> Arc<LogSink> {
        GLOBAL_SINK
            .get_or_init(|| Arc::new(LogSink::new()))
            .clone()
    }

    pub fn emit(&self, level: LogLevel, text: impl Into<String>) {
        let event = LogEvent {
            timestamp: Local::now(),
            level,
            message: text.into(),
        };
        // Both ends live in self, so the channel cannot be disconnected.
        let _ = self.tx.send(event);
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.emit(LogLevel::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(LogLevel::Info, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.emit(LogLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(LogLevel::Error, text);
    }

    /// Take every event buffered so far, in arrival order.
    pub fn drain_all(&self) -> Vec<LogEvent> {
        self.rx.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards `tracing` events into a [`LogSink`].
pub struct SinkLayer {
    sink: Arc<LogSink>,
}

impl SinkLayer {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.sink
            .emit(LogLevel::from(event.metadata().level()), visitor.finish());
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.message, self.fields.join(", "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Route this crate's `tracing` output into the global sink.
///
/// Other crates (reqwest, hyper) only get through at warn level.
pub fn init(verbose: bool) -> Result<(), LogError> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let filter = Targets::new()
        .with_target(env!("CARGO_CRATE_NAME"), level)
        .with_default(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(SinkLayer::new(LogSink::global()).with_filter(filter))
        .try_init()?;

    Ok(())
}
