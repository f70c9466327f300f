//! `agentry config`: Show the runtime configuration.

use agentry_config::{CONFIG_PATH_ENV, RuntimeConfig};

pub fn run(show_default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show_default {
        print!("{}", RuntimeConfig::default_toml());
        return Ok(());
    }

    let config = RuntimeConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let source = std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| RuntimeConfig::config_dir().join("config.toml").display().to_string());
    println!("# Effective configuration (file: {source}, env overrides applied)");
    print!("{}", config.to_toml());

    Ok(())
}
