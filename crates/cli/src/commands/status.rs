//! Agent status command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
}

/// Show agent health and per-component status
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    if format == OutputFormat::Json {
        print_json(&health);
        return Ok(());
    }

    println!("{}", "Agent Status".bold());
    println!("{}", "=".repeat(50));
    println!("Agent:                  {}", client.base_url().as_str().cyan());
    println!("Overall:                {}", color_status(&health.status));
    println!();

    let components: Vec<_> = health.components.iter().collect();
    let rows = components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.to_string(),
            status: color_status(&component.status),
            message: component.message.clone().unwrap_or_default(),
            last_check: chrono::DateTime::from_timestamp(component.last_check_timestamp, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    print_table(rows, &components, format);

    Ok(())
}
