use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::InvocationDescriptor;

/// Metadata resolved for one URL before any transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub original_url: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub formats: Vec<FormatInfo>,
}

/// yt-dlp emits `null` for fields it could not extract.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl MediaInfo {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Unknown"
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default, rename = "format_note")]
    pub note: Option<String>,
}

/// One tick reported by the engine during a transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Downloading {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        /// Bytes per second.
        speed: Option<f64>,
    },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptReason {
    Pause,
    Cancel,
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptReason::Pause => write!(f, "pause"),
            InterruptReason::Cancel => write!(f, "cancel"),
        }
    }
}

/// Returned by a progress callback to stop the running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("download interrupted ({reason})")]
pub struct Interrupt {
    pub reason: InterruptReason,
}

/// Called on every progress tick. Returning `Err` aborts the transfer.
pub type ProgressCallback<'a> = dyn FnMut(&ProgressEvent) -> Result<(), Interrupt> + Send + 'a;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The progress callback asked to stop. Partial output is kept.
    #[error("transfer interrupted ({0})")]
    Interrupted(InterruptReason),

    #[error("media engine unavailable: {0}")]
    Unavailable(String),

    #[error("failed to run media engine: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metadata from media engine: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

impl From<Interrupt> for EngineError {
    fn from(interrupt: Interrupt) -> Self {
        EngineError::Interrupted(interrupt.reason)
    }
}

/// Resolves URLs and performs transfers.
///
/// `transfer` must invoke `on_progress` from the calling task only, stop
/// writing promptly once it returns `Err`, and leave a partial file that
/// a later call with the same descriptor resumes.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn resolve_metadata(
        &self,
        url: &str,
        descriptor: &InvocationDescriptor,
    ) -> Result<MediaInfo, EngineError>;

    async fn transfer(
        &self,
        url: &str,
        descriptor: &InvocationDescriptor,
        on_progress: &mut ProgressCallback<'_>,
    ) -> Result<(), EngineError>;
}
