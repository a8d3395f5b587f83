//! Commands for the CLI's own saved settings

use anyhow::Result;

use crate::config::Config;
use crate::output::{print_json, print_success, print_warning, OutputFormat};

/// Print the saved settings and where they live
pub fn show(format: OutputFormat) -> Result<()> {
    let path = Config::config_path()?;
    let config = Config::load_from(&path)?;

    match format {
        OutputFormat::Json => print_json(&config),
        OutputFormat::Table => {
            println!("Config file:            {}", path.display());
            match &config.api_url {
                Some(url) => println!("API URL:                {}", url),
                None => print_warning("No API URL saved, using the default"),
            }
            if let Some(format) = config.default_format {
                println!("Default format:         {:?}", format);
            }
        }
    }

    Ok(())
}

/// Save the agent URL and/or default format
pub fn set(api_url: Option<String>, default_format: Option<OutputFormat>) -> Result<()> {
    if let Some(url) = &api_url {
        url::Url::parse(url)?;
    }

    let mut config = Config::load()?;
    if api_url.is_some() {
        config.api_url = api_url;
    }
    if default_format.is_some() {
        config.default_format = default_format;
    }

    let path = config.save()?;
    print_success(&format!("Saved settings to {}", path.display()));
    Ok(())
}
