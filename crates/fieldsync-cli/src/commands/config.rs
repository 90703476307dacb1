use std::path::Path;

use fieldsync_core::util::normalize_text_option;
use fieldsync_core::ClientConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::load_config;
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_base_url,
            health_url,
            force,
        } => run_config_init(config_path, api_base_url, health_url, force),
        ConfigCommands::Show => {
            let config = load_config(config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

pub fn build_init_config(
    api_base_url: Option<String>,
    health_url: Option<String>,
) -> Result<ClientConfig, CliError> {
    let config = ClientConfig {
        api_base_url: normalize_text_option(api_base_url),
        health_url: normalize_text_option(health_url),
        ..ClientConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn run_config_init(
    config_path: &Path,
    api_base_url: Option<String>,
    health_url: Option<String>,
    force: bool,
) -> Result<(), CliError> {
    if config_path.exists() && !force {
        return Err(CliError::ConfigExists(config_path.display().to_string()));
    }

    let config = build_init_config(api_base_url, health_url)?;
    config.save_to_path(config_path)?;

    println!("Wrote {}", config_path.display());
    if config.api_base_url.is_none() {
        println!("No API base URL set; `sync` needs FIELDSYNC_API_BASE_URL until one is configured.");
    }
    Ok(())
}
