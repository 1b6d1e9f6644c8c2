//! `health`: show advisor health and readiness

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthReport, ReadinessReport};
use crate::output::{color_status, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct Combined<'a> {
    health: &'a HealthReport,
    readiness: &'a ReadinessReport,
}

pub async fn fetch(client: &ApiClient) -> Result<(HealthReport, ReadinessReport)> {
    let health: HealthReport = client.get("healthz").await?;
    let readiness: ReadinessReport = client.get("readyz").await?;
    Ok((health, readiness))
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (health, readiness) = fetch(client).await?;

    match format {
        OutputFormat::Json => print_json(&Combined {
            health: &health,
            readiness: &readiness,
        })?,
        OutputFormat::Table => {
            println!("{}", "Advisor Health".bold());
            println!("{}", "=".repeat(50));
            println!("Status:   {}", color_status(&health.status));
            let ready = if readiness.ready { "ready" } else { "not ready" };
            println!("Ready:    {}", color_status(ready));
            if let Some(reason) = &readiness.reason {
                println!("Reason:   {}", reason);
            }
            println!();

            let mut rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            print_table(&rows);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_reads_unhealthy_body() {
        let mut server = mockito::Server::new_async().await;
        let _healthz = server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"cpu_server_lw":{"status":"unhealthy","message":"plugin down","last_check_timestamp":1}}}"#,
            )
            .create_async()
            .await;
        let _readyz = server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_body(r#"{"ready":false,"reason":"unhealthy components"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let (health, readiness) = fetch(&client).await.unwrap();

        assert_eq!(health.status, "unhealthy");
        assert_eq!(
            health.components["cpu_server_lw"].message.as_deref(),
            Some("plugin down")
        );
        assert!(!readiness.ready);
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_json() {
        let mut server = mockito::Server::new_async().await;
        let _healthz = server
            .mock("GET", "/healthz")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = fetch(&client).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }
}
