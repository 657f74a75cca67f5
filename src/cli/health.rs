use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::config::{Config, SummarizerSettings};
use crate::error::FdaError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# fda-events Health Check\n\n");
        out.push_str("| API | Status | Latency |\n");
        out.push_str("|-----|--------|---------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.api, row.status, row.latency
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} endpoints healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

async fn check_one(
    client: &reqwest::Client,
    api: &str,
    url: &str,
    bearer: Option<&str>,
) -> HealthRow {
    let start = Instant::now();
    let mut req = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json");
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }

    match req.send().await {
        Ok(resp) => {
            let status = resp.status();
            let elapsed = start.elapsed().as_millis();
            if status.is_success() {
                HealthRow {
                    api: api.to_string(),
                    status: "ok".into(),
                    latency: format!("{elapsed}ms"),
                }
            } else {
                HealthRow {
                    api: api.to_string(),
                    status: "error".into(),
                    latency: format!("{elapsed}ms (HTTP {})", status.as_u16()),
                }
            }
        }
        Err(err) => {
            let reason = if err.is_timeout() {
                "timeout"
            } else if err.is_connect() {
                "connect"
            } else {
                "error"
            };
            HealthRow {
                api: api.to_string(),
                status: "error".into(),
                latency: reason.into(),
            }
        }
    }
}

fn health_http_client() -> Result<reqwest::Client, FdaError> {
    static HEALTH_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    if let Some(client) = HEALTH_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .user_agent(concat!("fda-events/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FdaError::HttpClientInit)?;

    Ok(HEALTH_HTTP_CLIENT.get_or_init(|| client).clone())
}

/// Probes the events endpoint, then the summarizer, one after the other.
///
/// # Errors
///
/// Returns an error when the HTTP client cannot be created.
pub async fn check(config: &Config) -> Result<HealthReport, FdaError> {
    let client = health_http_client()?;

    let events_url = format!("{}?limit=1", config.events_url);
    let mut rows = vec![check_one(&client, "openFDA drug/event", &events_url, None).await];

    let summarizer = match &config.summarizer {
        SummarizerSettings::Local { host, model, .. } => {
            let url = format!("{}/api/tags", host.trim_end_matches('/'));
            check_one(&client, &format!("Ollama local ({model})"), &url, None).await
        }
        SummarizerSettings::Cloud {
            base, token, model, ..
        } => {
            let url = format!("{}/api/tags", base.trim_end_matches('/'));
            check_one(&client, &format!("Ollama Cloud ({model})"), &url, Some(token)).await
        }
    };
    rows.push(summarizer);

    let healthy = rows.iter().filter(|row| row.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total: rows.len(),
        rows,
    })
}
