//! Savings and audit report commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, AuditEntry, Observation, Remediation};
use crate::output::{
    color_status, format_currency, format_pct, format_provider, format_timestamp, print_json,
    print_table, OutputFormat,
};

/// Row for per-service savings table
#[derive(Tabled)]
struct ServiceSavingsRow {
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Remediations")]
    count: usize,
    #[tabled(rename = "Savings")]
    savings: String,
}

#[derive(Tabled)]
struct RemediationRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Workflow")]
    workflow: String,
    #[tabled(rename = "Before")]
    before: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "Savings")]
    savings: String,
}

impl From<&Remediation> for RemediationRow {
    fn from(r: &Remediation) -> Self {
        Self {
            timestamp: format_timestamp(&r.timestamp),
            provider: format_provider(&r.provider),
            service: r.service.clone(),
            workflow: r.workflow.clone(),
            before: format_currency(r.before_cost),
            after: format_currency(r.after_cost),
            savings: format_currency(r.savings).green().to_string(),
        }
    }
}

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Deviation")]
    deviation: String,
    #[tabled(rename = "Outcome")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&AuditEntry> for AuditRow {
    fn from(e: &AuditEntry) -> Self {
        Self {
            timestamp: format_timestamp(&e.timestamp),
            provider: format_provider(&e.provider),
            service: e.service.clone(),
            deviation: format_pct(e.deviation_pct),
            kind: color_status(&e.kind),
            reason: e.reason.clone(),
        }
    }
}

#[derive(Tabled)]
struct ObservationRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Tags")]
    tags: String,
}

impl From<&Observation> for ObservationRow {
    fn from(o: &Observation) -> Self {
        Self {
            timestamp: format_timestamp(&o.timestamp),
            provider: format_provider(&o.provider),
            service: o.service.clone(),
            cost: format_currency(o.cost),
            tags: o
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Show total and per-service savings
pub async fn show_summary(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let summary = client.summary().await?;

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            println!("{}", "Savings Summary".bold());
            println!("{}", "=".repeat(50));
            println!("Remediations:           {}", summary.count);
            println!(
                "{}          {}",
                "Total Savings:".bold(),
                format_currency(summary.total_savings).green().bold()
            );
            println!();

            if !summary.per_service.is_empty() {
                println!("{}", "Savings by Service".bold());
                println!("{}", "-".repeat(50));

                let rows: Vec<ServiceSavingsRow> = summary
                    .per_service
                    .iter()
                    .map(|s| ServiceSavingsRow {
                        provider: format_provider(&s.provider),
                        service: s.service.clone(),
                        count: s.count,
                        savings: format_currency(s.savings),
                    })
                    .collect();
                print_table(rows, &summary.per_service, format);
            }
        }
    }

    Ok(())
}

/// List applied remediations, optionally for one service
pub async fn list_remediations(
    client: &ApiClient,
    service: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let remediations = client.remediations(service.as_deref()).await?;
    let rows = remediations.iter().map(RemediationRow::from).collect();
    print_table(rows, &remediations, format);
    Ok(())
}

/// List anomalies that ended without a remediation
pub async fn list_audit(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let entries = client.audit().await?;
    let rows = entries.iter().map(AuditRow::from).collect();
    print_table(rows, &entries, format);
    Ok(())
}

/// List the most recent observations, oldest first
pub async fn list_observations(
    client: &ApiClient,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let observations = client.observations(limit).await?;
    let rows = observations.iter().map(ObservationRow::from).collect();
    print_table(rows, &observations, format);
    Ok(())
}
