pub mod engine;
pub mod format;
pub mod manager;
pub mod options;
pub mod probe;
pub mod progress;
pub mod task;
pub mod ytdlp;

pub use engine::{
    EngineError, FormatInfo, Interrupt, InterruptReason, MediaEngine, MediaInfo,
    ProgressCallback, ProgressEvent,
};
pub use format::{Capabilities, FormatMenu, FormatSelector, QUALITY_PRESETS, QualityPreset};
pub use manager::{DirectoryStatus, InfoFetcher, ManagerError, TaskManager};
pub use options::{CookieArgs, InvocationDescriptor, OptionsBuilder, TransferArgs};
pub use progress::{AttemptOutcome, TaskUpdate, UpdateKind};
pub use task::{DownloadTask, TaskError, TaskSignal, TaskSnapshot, TaskState};
pub use ytdlp::YtDlpEngine;

use std::fmt;

/// Identifies a task by creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
