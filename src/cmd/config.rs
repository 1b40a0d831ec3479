//! Configuration view and scaffolding commands: `pploy config`.

use std::path::Path;

use anyhow::Result;
use pploy::config::{CONFIG_FILE_NAME, PployConfig};

use super::super::ConfigCommands;

pub fn cmd_config(workdir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = workdir.join(CONFIG_FILE_NAME);

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found, showing defaults", config_path.display());
            }
            let mut config = PployConfig::load_or_default(workdir)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Some(ConfigCommands::Validate) => {
            let mut config = PployConfig::load_or_default(workdir)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            println!("Configuration is valid.");
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(workdir)?;
            PployConfig::default().save(&config_path)?;
            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
        }
    }

    Ok(())
}
