use super::print_log_events;
use anyhow::Result;
use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};
use mediaq::Config;
use mediaq::download::progress::{format_bytes, format_duration};
use mediaq::download::{Capabilities, FormatMenu, TaskManager, YtDlpEngine};
use std::process;
use std::sync::Arc;
use std::time::Duration;

pub async fn handle_info(
    config: Config,
    capabilities: &Capabilities,
    url: String,
    verbose: bool,
) -> Result<()> {
    let term = Term::stdout();
    let engine = Arc::new(YtDlpEngine::from_capabilities(capabilities)?);
    let manager = TaskManager::new(engine, config);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?);
    spinner.set_message("Fetching media information...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = manager.fetch_info(&url).await;
    spinner.finish_and_clear();
    print_log_events(verbose)?;

    let info = match result {
        Ok(info) => info,
        Err(e) => {
            term.write_line(&format!("{} {}", style("❌").red(), e))?;
            process::exit(1);
        }
    };

    term.write_line(&format!("{} Media details:", style("📦").cyan()))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Title").dim(),
        style(info.display_title()).cyan().bold()
    ))?;
    if let Some(uploader) = &info.uploader {
        term.write_line(&format!("   {}: {}", style("Uploader").dim(), uploader))?;
    }
    if let Some(duration) = info.duration {
        term.write_line(&format!(
            "   {}: {}",
            style("Duration").dim(),
            format_duration(Duration::from_secs_f64(duration.max(0.0)))
        ))?;
    }
    if let Some(thumbnail) = &info.thumbnail {
        term.write_line(&format!("   {}: {}", style("Thumbnail").dim(), thumbnail))?;
    }

    if !info.formats.is_empty() {
        term.write_line("")?;
        term.write_line(&format!(
            "{} Available formats ({}):",
            style("🎞️").cyan(),
            info.formats.len()
        ))?;
        for format in &info.formats {
            let mut line = format!("   {:<10}", format.format_id);
            if let Some(ext) = &format.ext {
                line.push_str(&format!(" {:<5}", ext));
            }
            if let Some(height) = format.height {
                line.push_str(&format!(" {}p", height));
            }
            if let Some(size) = format.filesize {
                line.push_str(&format!(" {}", format_bytes(size)));
            }
            if let Some(note) = &format.note {
                line.push_str(&format!(" {}", style(note).dim()));
            }
            term.write_line(&line)?;
        }
    }

    let menu = FormatMenu::new(capabilities);
    term.write_line("")?;
    term.write_line(&format!("{} Quality choices:", style("🎚️").cyan()))?;
    for preset in menu.entries() {
        let marker = if *preset == menu.default_preset() {
            style("(default)").green().to_string()
        } else {
            String::new()
        };
        term.write_line(&format!(
            "   {:<15} {:<8} {}",
            preset.label,
            style(preset.alias).dim(),
            marker
        ))?;
    }

    if !capabilities.can_merge() {
        term.write_line(&format!(
            "{} FFmpeg not found: only single-file formats are offered",
            style("⚠️").yellow()
        ))?;
    }

    Ok(())
}
