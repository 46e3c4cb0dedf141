pub mod config;
pub mod download;
pub mod logging;

// Re-export commonly used types for easier access in tests
pub use config::{Config, ConfigManager};
pub use download::{
    Capabilities, DownloadTask, FormatMenu, FormatSelector, InvocationDescriptor, MediaEngine,
    MediaInfo, OptionsBuilder, ProgressEvent, TaskId, TaskManager, TaskSnapshot, TaskState,
    YtDlpEngine,
};
pub use logging::{LogEvent, LogLevel, LogSink};
