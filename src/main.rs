mod cli;
mod handlers;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use mediaq::download::{Capabilities, YtDlpEngine};
use mediaq::{ConfigManager, logging};
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Validate CLI arguments first
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let verbose = args.verbose;
    logging::init(verbose)?;

    let mut config_manager = match &args.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };

    // Validate config on startup (unless we're about to fix it)
    if !handlers::should_skip_config_validation(&args.command) {
        if let Err(e) = config_manager.validate() {
            eprintln!("Configuration validation failed: {}", e);
            eprintln!("Run 'mediaq config validate' for details or 'mediaq config reset' to start over");
            process::exit(1);
        }
    }

    let capabilities = if args.requires_engine() {
        let capabilities = Capabilities::detect(config_manager.config());
        if let Err(e) = YtDlpEngine::from_capabilities(&capabilities) {
            handlers::print_log_events(verbose)?;
            eprintln!("Error: {}", e);
            process::exit(1);
        }
        capabilities
    } else {
        Capabilities::default()
    };

    match args.command {
        Commands::Download {
            urls,
            quality,
            output_dir,
            yes,
        } => {
            let mut config = config_manager.config().clone();
            if let Some(dir) = output_dir {
                config.general.download_dir = dir;
            }
            handlers::handle_download(config, &capabilities, urls, quality, yes, verbose).await?;
        }
        Commands::Info { url } => {
            handlers::handle_info(config_manager.config().clone(), &capabilities, url, verbose)
                .await?;
        }
        Commands::Config { action } => {
            handlers::handle_config(&mut config_manager, action).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq::download::FormatMenu;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_manager_initialization() {
        let dir = TempDir::new().unwrap();
        let result = ConfigManager::with_path(dir.path().join("config.toml"));
        assert!(
            result.is_ok(),
            "Config manager should initialize successfully"
        );
        assert!(result.unwrap().validate().is_ok());
    }

    #[test]
    fn test_cli_integration() {
        let cli = Cli::try_parse_from(["mediaq", "dl", "https://example.com/v", "-q", "audio"])
            .unwrap();
        assert!(cli.validate().is_ok());
        assert!(cli.requires_engine());
        assert!(!handlers::should_skip_config_validation(&cli.command));

        let cli = Cli::try_parse_from(["mediaq", "config", "reset", "--yes"]).unwrap();
        assert!(handlers::should_skip_config_validation(&cli.command));
    }

    #[test]
    fn test_missing_engine_is_reported() {
        let capabilities = Capabilities::default();
        assert!(YtDlpEngine::from_capabilities(&capabilities).is_err());

        // Without a merger only non-merging presets remain.
        let menu = FormatMenu::new(&capabilities);
        assert_eq!(menu.default_preset().alias, "audio");
    }
}
