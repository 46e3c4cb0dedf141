use crate::cli::ConfigAction;
use anyhow::{Context, Result};
use console::{Term, style};
use dialoguer::Confirm;
use mediaq::config::{ConfigManager, SECTIONS};
use std::process;

pub async fn handle_config(config_manager: &mut ConfigManager, action: ConfigAction) -> Result<()> {
    let term = Term::stdout();

    match action {
        ConfigAction::Show { section } => match section.as_deref() {
            Some(name) if SECTIONS.contains(&name) => {
                let value = config_manager.get(name)?;
                let mut table = toml::Table::new();
                table.insert(name.to_string(), value);

                term.write_line(&format!(
                    "{} {} configuration:",
                    style("🔧").cyan(),
                    style(name).cyan()
                ))?;
                term.write_line("")?;
                term.write_line(&toml::to_string_pretty(&table)?)?;
            }
            Some(name) => {
                term.write_line(&format!("{} Unknown section: {}", style("❌").red(), name))?;
                term.write_line(&format!(
                    "{} Available sections: {}",
                    style("💡").yellow(),
                    SECTIONS.join(", ")
                ))?;
                process::exit(1);
            }
            None => {
                term.write_line(&format!("{} Current configuration:", style("⚙️").cyan()))?;
                term.write_line("")?;
                term.write_line(&toml::to_string_pretty(config_manager.config())?)?;
            }
        },

        ConfigAction::Path => {
            term.write_line(&config_manager.config_file().display().to_string())?;
        }

        ConfigAction::Get { key } => match config_manager.get(&key) {
            Ok(toml::Value::String(s)) => term.write_line(&s)?,
            Ok(toml::Value::Table(table)) => term.write_line(&toml::to_string_pretty(&table)?)?,
            Ok(value) => term.write_line(&value.to_string())?,
            Err(e) => {
                term.write_line(&format!("{} {}", style("❌").red(), e))?;
                process::exit(1);
            }
        },

        ConfigAction::Set { key, value } => {
            if let Err(e) = config_manager.set(&key, &value) {
                term.write_line(&format!("{} {:#}", style("❌").red(), e))?;
                process::exit(1);
            }
            config_manager.save()?;

            term.write_line(&format!(
                "{} {} = {}",
                style("✅").green(),
                style(&key).cyan(),
                style(&value).green()
            ))?;

            if let Err(e) = config_manager.validate() {
                term.write_line(&format!(
                    "{} Saved, but the configuration is not valid yet: {}",
                    style("⚠️").yellow(),
                    e
                ))?;
            }
        }

        ConfigAction::Reset { section, yes } => {
            let target = section.as_deref().unwrap_or("all configuration");

            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Are you sure you want to reset {}?",
                        style(target).cyan()
                    ))
                    .default(false)
                    .interact()?;

                if !confirmed {
                    term.write_line(&format!("{} Operation cancelled", style("❌").red()))?;
                    return Ok(());
                }
            }

            config_manager.reset(section.as_deref())?;
            config_manager.save()?;
            term.write_line(&format!("{} Reset {}", style("🔄").green(), target))?;
        }

        ConfigAction::Validate => {
            term.write_line(&format!(
                "{} Validating configuration...",
                style("🔍").cyan()
            ))?;

            match config_manager.validate() {
                Ok(()) => {
                    term.write_line(&format!("{} Configuration is valid", style("✅").green()))?;
                }
                Err(e) => {
                    term.write_line(&format!(
                        "{} Configuration validation failed:",
                        style("❌").red()
                    ))?;
                    term.write_line(&format!("   {}", e))?;
                    term.write_line(&format!(
                        "{} Fix it with 'mediaq config set' or 'mediaq config reset'",
                        style("💡").yellow()
                    ))?;
                    process::exit(1);
                }
            }
        }

        ConfigAction::Sample { force } => {
            let sample_file = config_manager.config_dir().join("config.sample.toml");
            if sample_file.exists() && !force {
                term.write_line(&format!(
                    "{} File already exists: {:?}",
                    style("❌").red(),
                    sample_file
                ))?;
                term.write_line(&format!(
                    "{} Use --force to overwrite",
                    style("💡").yellow()
                ))?;
                process::exit(1);
            }

            let sample_file = config_manager
                .create_sample_config()
                .context("Failed to write sample configuration")?;
            term.write_line(&format!(
                "{} Sample configuration created at: {:?}",
                style("✅").green(),
                sample_file
            ))?;
        }
    }
    Ok(())
}
