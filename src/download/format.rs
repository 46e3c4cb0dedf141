use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;

/// Engine format expression, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatSelector(String);

impl FormatSelector {
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `+` joins separate video and audio streams, which needs a merger.
    pub fn requires_merge(&self) -> bool {
        self.0.contains('+')
    }
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub label: &'static str,
    pub alias: &'static str,
    pub selector: &'static str,
}

pub const BEST_AVAILABLE: QualityPreset = QualityPreset {
    label: "Best Available",
    alias: "best",
    selector: "bestvideo*+bestaudio/best",
};

pub const AUDIO_ONLY: QualityPreset = QualityPreset {
    label: "Audio Only",
    alias: "audio",
    selector: "bestaudio/best",
};

pub const QUALITY_PRESETS: [QualityPreset; 4] = [
    BEST_AVAILABLE,
    QualityPreset {
        label: "1080p",
        alias: "1080p",
        selector: "bestvideo[height<=1080]+bestaudio/best",
    },
    QualityPreset {
        label: "720p",
        alias: "720p",
        selector: "bestvideo[height<=720]+bestaudio/best",
    },
    AUDIO_ONLY,
];

impl QualityPreset {
    pub fn selector(&self) -> FormatSelector {
        FormatSelector::new(self.selector)
    }
}

/// External tools found at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub engine: Option<PathBuf>,
    pub merger: Option<PathBuf>,
}

impl Capabilities {
    pub fn detect(config: &Config) -> Self {
        info!("Checking for yt-dlp...");
        let engine = match &config.general.ytdlp_path {
            Some(path) => which::which(path).ok(),
            None => which::which("yt-dlp").ok(),
        };
        match &engine {
            Some(path) => info!("yt-dlp found at {}", path.display()),
            None => warn!("yt-dlp not found. Downloads are unavailable."),
        }

        info!("Checking for FFmpeg...");
        let merger = which::which("ffmpeg").ok();
        match &merger {
            Some(path) => info!("FFmpeg found at {}", path.display()),
            None => warn!("FFmpeg not found. Merging formats will be disabled."),
        }

        Self { engine, merger }
    }

    pub fn can_merge(&self) -> bool {
        self.merger.is_some()
    }
}

/// The quality choices actually offered, given the available tools.
#[derive(Debug, Clone)]
pub struct FormatMenu {
    entries: Vec<QualityPreset>,
    default: QualityPreset,
}

impl FormatMenu {
    pub fn new(capabilities: &Capabilities) -> Self {
        let can_merge = capabilities.can_merge();
        let entries = QUALITY_PRESETS
            .iter()
            .filter(|preset| can_merge || !preset.selector().requires_merge())
            .copied()
            .collect();

        let default = if can_merge { BEST_AVAILABLE } else { AUDIO_ONLY };

        Self { entries, default }
    }

    pub fn entries(&self) -> &[QualityPreset] {
        &self.entries
    }

    pub fn default_preset(&self) -> QualityPreset {
        self.default
    }

    /// Find an offered preset by alias or label, case-insensitively.
    pub fn find(&self, name: &str) -> Option<QualityPreset> {
        let name = name.trim();
        self.entries
            .iter()
            .find(|p| p.alias.eq_ignore_ascii_case(name) || p.label.eq_ignore_ascii_case(name))
            .copied()
    }

    /// Whether a preset exists at all, offered or not.
    pub fn is_known(name: &str) -> bool {
        let name = name.trim();
        QUALITY_PRESETS
            .iter()
            .any(|p| p.alias.eq_ignore_ascii_case(name) || p.label.eq_ignore_ascii_case(name))
    }
}
