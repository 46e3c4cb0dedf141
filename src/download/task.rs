use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::task::JoinHandle;

use super::engine::{Interrupt, InterruptReason, MediaInfo, ProgressEvent};
use super::progress::{AttemptOutcome, TaskUpdate, UpdateKind, format_speed};
use super::{FormatSelector, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Downloading,
    Pausing,
    Paused,
    Resuming,
    Finished,
    Cancelled,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Cancelled | TaskState::Error
        )
    }

    /// An execution attempt is (or is about to be) running.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskState::Downloading | TaskState::Pausing | TaskState::Resuming
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Queued => "queued",
            TaskState::Downloading => "downloading",
            TaskState::Pausing => "pausing",
            TaskState::Paused => "paused",
            TaskState::Resuming => "resuming",
            TaskState::Finished => "finished",
            TaskState::Cancelled => "cancelled",
            TaskState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task is already downloading")]
    AlreadyRunning,

    #[error("cannot {action} a task that is {state}")]
    InvalidTransition {
        action: &'static str,
        state: TaskState,
    },
}

const SIGNAL_CLEAR: u8 = 0;
const SIGNAL_PAUSE: u8 = 1;
const SIGNAL_CANCEL: u8 = 2;

/// Cancellation token shared between a task and its running attempt.
///
/// The progress callback checks it on every tick; the engine has no
/// other way to be stopped.
#[derive(Debug, Default)]
pub struct TaskSignal {
    flag: AtomicU8,
}

impl TaskSignal {
    pub fn request_pause(&self) {
        // Never downgrade a cancel.
        let _ = self.flag.compare_exchange(
            SIGNAL_CLEAR,
            SIGNAL_PAUSE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn request_cancel(&self) {
        self.flag.store(SIGNAL_CANCEL, Ordering::Release);
    }

    pub fn check(&self) -> Result<(), Interrupt> {
        let reason = match self.flag.load(Ordering::Acquire) {
            SIGNAL_PAUSE => InterruptReason::Pause,
            SIGNAL_CANCEL => InterruptReason::Cancel,
            _ => return Ok(()),
        };
        Err(Interrupt { reason })
    }
}

/// What an execution thread needs to run one transfer attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: TaskId,
    pub generation: u64,
    pub url: String,
    pub selector: FormatSelector,
    pub signal: Arc<TaskSignal>,
}

/// Result of feeding a [`TaskUpdate`] to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// From a superseded attempt, or the task already ended.
    Stale,
    /// Valid but meaningless in the current state.
    Ignored,
    Progress,
    Transition(TaskState),
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub url: String,
    pub title: String,
    pub uploader: Option<String>,
    pub selector: FormatSelector,
    pub state: TaskState,
    pub progress: f64,
    pub speed: Option<f64>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub generation: u64,
    pub error: Option<String>,
    pub status: String,
}

/// One queued media item and its lifecycle.
///
/// Only the coordinating context mutates a task; execution threads talk
/// back through [`TaskUpdate`] messages.
#[derive(Debug)]
pub struct DownloadTask {
    id: TaskId,
    url: String,
    selector: FormatSelector,
    info: MediaInfo,
    state: TaskState,
    progress: f64,
    speed: Option<f64>,
    downloaded_bytes: u64,
    total_bytes: Option<u64>,
    generation: u64,
    signal: Arc<TaskSignal>,
    error: Option<String>,
    handle: Option<JoinHandle<()>>,
}

impl DownloadTask {
    pub fn new(id: TaskId, url: String, selector: FormatSelector, info: MediaInfo) -> Self {
        Self {
            id,
            url,
            selector,
            info,
            state: TaskState::Queued,
            progress: 0.0,
            speed: None,
            downloaded_bytes: 0,
            total_bytes: None,
            generation: 0,
            signal: Arc::new(TaskSignal::default()),
            error: None,
            handle: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn selector(&self) -> &FormatSelector {
        &self.selector
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn set_handle(&mut self, handle: JoinHandle<()>) {
        self.handle = Some(handle);
    }

    /// Move to `Downloading` and hand out a fresh attempt.
    ///
    /// Starting a task whose attempt is still running is a caller bug.
    pub fn begin_attempt(&mut self) -> Result<Attempt, TaskError> {
        match self.state {
            TaskState::Queued | TaskState::Paused | TaskState::Resuming => {}
            TaskState::Downloading | TaskState::Pausing => {
                debug_assert!(false, "task {} started while already downloading", self.id);
                return Err(TaskError::AlreadyRunning);
            }
            state => {
                return Err(TaskError::InvalidTransition {
                    action: "start",
                    state,
                });
            }
        }

        self.generation += 1;
        self.signal = Arc::new(TaskSignal::default());
        self.state = TaskState::Downloading;
        self.speed = None;
        self.error = None;

        Ok(Attempt {
            id: self.id,
            generation: self.generation,
            url: self.url.clone(),
            selector: self.selector.clone(),
            signal: Arc::clone(&self.signal),
        })
    }

    /// Flag intent only; the running attempt stops at its next tick.
    pub fn request_pause(&mut self) -> Result<(), TaskError> {
        if self.state != TaskState::Downloading {
            return Err(TaskError::InvalidTransition {
                action: "pause",
                state: self.state,
            });
        }
        self.signal.request_pause();
        self.state = TaskState::Pausing;
        Ok(())
    }

    pub fn request_resume(&mut self) -> Result<(), TaskError> {
        if self.state != TaskState::Paused {
            return Err(TaskError::InvalidTransition {
                action: "resume",
                state: self.state,
            });
        }
        self.state = TaskState::Resuming;
        Ok(())
    }

    /// Cancel immediately. Whatever the running attempt reports later
    /// belongs to a superseded generation and is dropped.
    pub fn request_cancel(&mut self) -> Result<(), TaskError> {
        if self.state.is_terminal() {
            return Err(TaskError::InvalidTransition {
                action: "cancel",
                state: self.state,
            });
        }
        self.signal.request_cancel();
        self.generation += 1;
        self.state = TaskState::Cancelled;
        self.speed = None;
        // Detach; the attempt winds down on its own.
        self.handle = None;
        Ok(())
    }

    pub fn apply(&mut self, update: &TaskUpdate) -> Applied {
        if update.generation != self.generation || self.state.is_terminal() {
            return Applied::Stale;
        }

        match &update.kind {
            UpdateKind::Progress(event) => {
                if !matches!(self.state, TaskState::Downloading | TaskState::Pausing) {
                    return Applied::Ignored;
                }
                self.record_progress(event);
                Applied::Progress
            }
            UpdateKind::Ended(outcome) => {
                if !matches!(self.state, TaskState::Downloading | TaskState::Pausing) {
                    return Applied::Ignored;
                }
                self.handle = None;
                self.speed = None;

                self.state = match (self.state, outcome) {
                    (_, AttemptOutcome::Completed) => {
                        self.progress = 100.0;
                        TaskState::Finished
                    }
                    (TaskState::Pausing, AttemptOutcome::Interrupted(_)) => TaskState::Paused,
                    (_, AttemptOutcome::Interrupted(reason)) => {
                        self.error = Some(format!("transfer stopped unexpectedly ({})", reason));
                        TaskState::Error
                    }
                    (_, AttemptOutcome::Failed(message)) => {
                        self.error = Some(message.clone());
                        TaskState::Error
                    }
                };
                Applied::Transition(self.state)
            }
        }
    }

    fn record_progress(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Downloading {
                downloaded_bytes,
                total_bytes,
                speed,
            } => {
                self.downloaded_bytes = *downloaded_bytes;
                self.total_bytes = *total_bytes;
                // Without a total the percentage is left alone.
                if let Some(total) = total_bytes.filter(|t| *t > 0) {
                    self.progress =
                        (*downloaded_bytes as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
                }
                self.speed = *speed;
            }
            ProgressEvent::Finished => {
                self.progress = 100.0;
                self.speed = None;
            }
        }
    }

    pub fn status_line(&self) -> String {
        match self.state {
            TaskState::Queued => "Queued".to_string(),
            TaskState::Downloading if self.total_bytes.is_some() || self.progress > 0.0 => {
                format!("Downloading... {:.1}%", self.progress)
            }
            TaskState::Downloading => "Downloading...".to_string(),
            TaskState::Pausing => "Pausing...".to_string(),
            TaskState::Paused => "Paused".to_string(),
            TaskState::Resuming => "Resuming...".to_string(),
            TaskState::Finished => "Completed!".to_string(),
            TaskState::Cancelled => "Cancelled".to_string(),
            TaskState::Error => "Error!".to_string(),
        }
    }

    pub fn speed_line(&self) -> String {
        self.speed.map(format_speed).unwrap_or_default()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            url: self.url.clone(),
            title: self.info.display_title().to_string(),
            uploader: self.info.uploader.clone(),
            selector: self.selector.clone(),
            state: self.state,
            progress: self.progress,
            speed: self.speed,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            generation: self.generation,
            error: self.error.clone(),
            status: self.status_line(),
        }
    }
}
