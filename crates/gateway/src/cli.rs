//! Command-line interface and configuration loading.

use clap::{Parser, Subcommand};

use vx_domain::config::Config;

#[derive(Parser)]
#[command(name = "voxgate", about = "Real-time voice-agent runtime", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Configuration tooling.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration and exit.
    Validate,
    /// Print the effective configuration (TOML).
    Show,
}

/// Load the config: `VOXGATE_CONFIG` path, then `./voxgate.toml`, then
/// defaults; the recognized environment options are overlaid last.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let path = std::env::var("VOXGATE_CONFIG").unwrap_or_else(|_| "voxgate.toml".to_string());

    let mut config: Config = if std::path::Path::new(&path).exists() {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))?
    } else {
        Config::default()
    };

    config.apply_env();
    Ok((config, path))
}

/// Print the effective config as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(raw) => println!("{raw}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

/// Validate and report; returns whether the config is usable.
pub fn validate(config: &Config, path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{path}: OK");
        return true;
    }
    let mut ok = true;
    for issue in &issues {
        match issue.severity {
            vx_domain::config::ConfigSeverity::Warning => println!("warning: {issue}"),
            vx_domain::config::ConfigSeverity::Error => {
                ok = false;
                println!("error: {issue}");
            }
        }
    }
    ok
}
