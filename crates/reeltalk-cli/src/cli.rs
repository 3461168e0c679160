use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "reeltalk")]
#[command(version, about = "ReelTalk - fishing knowledge relay for Telegram")]
pub struct Cli {
    /// Config file (defaults to ~/.config/reeltalk/config.toml)
    #[arg(long, env = "REELTALK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port for the webhook server (overrides PORT and the config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
