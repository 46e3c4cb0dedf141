pub mod config;
pub mod download;
pub mod info;

use crate::cli::{Commands, ConfigAction};
use anyhow::Result;
use console::{Term, style};
use mediaq::logging::{LogEvent, LogLevel, LogSink};

// Re-export all handlers
pub use config::handle_config;
pub use download::handle_download;
pub use info::handle_info;

/// Check if config validation should be skipped for certain commands
pub fn should_skip_config_validation(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Config {
            action: ConfigAction::Validate
                | ConfigAction::Reset { .. }
                | ConfigAction::Path
                | ConfigAction::Set { .. }
        }
    )
}

/// One log event styled by level.
pub fn styled_event(event: &LogEvent) -> String {
    let line = event.to_string();
    match event.level {
        LogLevel::Debug => style(line).dim().to_string(),
        LogLevel::Info => line,
        LogLevel::Warning => style(line).yellow().to_string(),
        LogLevel::Error => style(line).red().to_string(),
    }
}

/// Flush pending log events to stderr.
pub fn print_log_events(verbose: bool) -> Result<()> {
    let term = Term::stderr();
    for event in LogSink::global().drain_all() {
        if event.level == LogLevel::Debug && !verbose {
            continue;
        }
        term.write_line(&styled_event(&event))?;
    }
    Ok(())
}
