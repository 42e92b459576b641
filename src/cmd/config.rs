//! Configuration view and validation commands, `taskdeck config`.

use std::path::Path;

use anyhow::Result;

use super::super::ConfigCommands;
use taskdeck::config::AppConfig;

/// Resolve the effective configuration: defaults, then the file, then
/// `TASKDECK_*` variables. CLI flags are applied by the caller.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = AppConfig::load_or_default(path)?;
    config.apply_env()?;
    Ok(config)
}

pub fn cmd_config(config: &AppConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration is valid with {} warning(s):", warnings.len());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
