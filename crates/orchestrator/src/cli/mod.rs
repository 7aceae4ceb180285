use std::path::PathBuf;

use clap::{Parser, Subcommand};
use orc_domain::config::Config;

#[derive(Parser)]
#[command(name = "orchestratord", about = "Multi-agent conversation orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the orchestrator server (default).
    Serve,
    /// Inspect the resolved configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration as TOML.
    Show,
    /// Check the configuration file for obvious mistakes.
    Validate,
}

fn config_path() -> PathBuf {
    std::env::var("ORC_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("orchestrator.toml"))
}

/// Loads configuration from `ORC_CONFIG` (or `orchestrator.toml` in the
/// current directory), falling back to defaults if the file is absent, then
/// layers `ORC_*` environment overrides on top.
pub fn load_config() -> anyhow::Result<(Config, PathBuf)> {
    let path = config_path();
    let config = match std::fs::read_to_string(&path) {
        Ok(raw) => Config::from_toml_str(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(e) => return Err(e.into()),
    };
    Ok((config.apply_env(), path))
}

pub fn validate(config: &Config, path: &PathBuf) -> bool {
    let mut ok = true;
    if config.idle_turn_ms == 0 {
        eprintln!("error: idle_turn_ms must be greater than zero");
        ok = false;
    }
    if config.watchdog_interval_ms == 0 {
        eprintln!("error: watchdog_interval_ms must be greater than zero");
        ok = false;
    }
    if config.subscription_queue_capacity == 0 {
        eprintln!("warning: subscription_queue_capacity is zero, every publish will block or overrun immediately");
    }
    if ok {
        println!("{} is valid", path.display());
    }
    ok
}

pub fn show(config: &Config) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
