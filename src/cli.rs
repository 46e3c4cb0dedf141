use clap::{Parser, Subcommand};
use mediaq::FormatMenu;

#[derive(Parser)]
#[command(name = "mediaq")]
#[command(about = "Queue media downloads with pause, resume and cancel")]
#[command(long_about = "
mediaq downloads online media through yt-dlp. Several downloads run at once;
each can be paused, resumed from its partial file, or cancelled while the
others keep going.

Examples:
  mediaq download https://youtu.be/xyz          # Download at best quality
  mediaq dl URL1 URL2 --quality 720p            # Two downloads at 720p
  mediaq info https://youtu.be/xyz              # Show title and formats
  mediaq config set network.force_ipv4 true
")]
#[command(version)]
pub struct Cli {
    /// Override config file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    /// Show debug messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download one or more URLs in an interactive session
    #[command(visible_alias = "dl")]
    Download {
        /// Media page URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Quality preset
        #[arg(short, long, value_name = "QUALITY")]
        #[arg(help = "Quality preset: best, 1080p, 720p or audio")]
        quality: Option<String>,

        /// Download directory override
        #[arg(short, long, value_name = "DIR")]
        #[arg(help = "Download to specific directory")]
        output_dir: Option<String>,

        /// Create the download directory without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Show metadata and available formats for a URL
    Info {
        /// Media page URL
        url: String,
    },

    /// Manage configuration
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only specific section
        #[arg(short, long, value_name = "SECTION")]
        #[arg(help = "Show only specific section (general, network, cookies)")]
        section: Option<String>,
    },

    /// Print the config file location
    Path,

    /// Get a configuration value
    Get {
        /// Configuration key (e.g., network.socket_timeout)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., general.download_dir)
        key: String,

        /// Configuration value
        value: String,
    },

    /// Reset configuration to defaults
    Reset {
        /// Section to reset (resets all if not specified)
        #[arg(short, long, value_name = "SECTION")]
        #[arg(help = "Section to reset (general, network, cookies)")]
        section: Option<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        #[arg(help = "Skip confirmation prompt")]
        yes: bool,
    },

    /// Validate configuration
    #[command(visible_alias = "check")]
    Validate,

    /// Create sample configuration
    Sample {
        /// Overwrite existing file
        #[arg(short, long)]
        #[arg(help = "Overwrite existing file")]
        force: bool,
    },
}

impl Cli {
    /// Validate CLI arguments and show helpful error messages
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Commands::Download { urls, quality, .. } => {
                if urls.iter().any(|u| u.trim().is_empty()) {
                    return Err("URL cannot be empty".to_string());
                }
                if let Some(q) = quality {
                    if !FormatMenu::is_known(q) {
                        return Err(format!(
                            "Unknown quality '{}'. Use best, 1080p, 720p or audio",
                            q
                        ));
                    }
                }
            }
            Commands::Info { url } => {
                if url.trim().is_empty() {
                    return Err("URL cannot be empty".to_string());
                }
            }
            Commands::Config { .. } => {}
        }
        Ok(())
    }

    /// Check if command runs the media engine
    pub fn requires_engine(&self) -> bool {
        matches!(
            self.command,
            Commands::Download { .. } | Commands::Info { .. }
        )
    }
}
