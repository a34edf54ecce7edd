use std::path::Path;

use tidy_core::config::EngineConfig;
use tidy_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::commands::common::{load_config, print_json};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_base_url,
            api_token,
            user_id,
            poll_interval,
        } => run_config_init(config_path, api_base_url, api_token, user_id, poll_interval),
        ConfigCommands::Show { json } => {
            let config = load_config(config_path)?;
            if json {
                let mut redacted = config;
                if redacted.api_token.is_some() {
                    redacted.api_token = Some("<redacted>".to_string());
                }
                print_json(&redacted)?;
            } else {
                println!("Config file: {}", config_path.display());
                println!("{config:#?}");
            }
            Ok(())
        }
    }
}

pub fn run_config_init(
    config_path: &Path,
    api_base_url: Option<String>,
    api_token: Option<String>,
    user_id: Option<String>,
    poll_interval: Option<u64>,
) -> Result<(), CliError> {
    let existing = EngineConfig::load_from_path(config_path)?;
    let config = merge_config(existing, api_base_url, api_token, user_id, poll_interval)?;
    config.save_to_path(config_path)?;
    println!("Config written to {}", config_path.display());

    if !config.has_remote() {
        println!("No api_base_url set; queued changes stay local until one is configured.");
    }
    if config.user_id.is_none() {
        println!("No user_id set; pass --user when enqueueing changes.");
    }
    Ok(())
}

/// Apply explicit values over an existing config and validate the result.
pub fn merge_config(
    mut config: EngineConfig,
    api_base_url: Option<String>,
    api_token: Option<String>,
    user_id: Option<String>,
    poll_interval: Option<u64>,
) -> Result<EngineConfig, CliError> {
    if let Some(url) = normalize_text_option(api_base_url) {
        config.api_base_url = Some(url);
    }
    if let Some(token) = normalize_text_option(api_token) {
        config.api_token = Some(token);
    }
    if let Some(user) = normalize_text_option(user_id) {
        config.user_id = Some(user);
    }
    if let Some(seconds) = poll_interval {
        config.poll_interval_secs = seconds;
    }
    Ok(config.normalized()?)
}
