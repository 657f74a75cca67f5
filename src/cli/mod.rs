use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::config::Config;
use crate::entities::adverse_event::{self, EventReport, EventSearchFilters};
use crate::entities::trends::{SYSTEM_PROMPT, TrendAggregate, TrendSummary};
use crate::render;
use crate::sources::ollama::OllamaClient;
use crate::sources::openfda::{DEFAULT_SORT, DEFAULT_TIMEOUT_SECS, EventPage};
use crate::transform::adverse_event::RowLayout;

pub mod health;

const REPORT_DEFAULT_LIMIT: i64 = 15;
const TRENDS_DEFAULT_LIMIT: i64 = 500;
const EXPORT_DEFAULT_LIMIT: i64 = 50;

#[derive(Parser, Debug)]
#[command(
    name = "fda-events",
    version,
    about = "Fetch, tabulate, and summarize openFDA drug adverse event reports"
)]
pub struct Cli {
    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Records to request; values outside 1-1000 are clamped
    #[arg(long, allow_negative_numbers = true)]
    pub limit: Option<i64>,

    /// Earliest receive date (YYYY, YYYY-MM, YYYYMMDD, or YYYY-MM-DD)
    #[arg(long)]
    pub date_from: Option<String>,

    /// Latest receive date (YYYY, YYYY-MM, YYYYMMDD, or YYYY-MM-DD)
    #[arg(long)]
    pub date_to: Option<String>,

    /// Raw openFDA search expression
    #[arg(long, conflicts_with_all = ["date_from", "date_to"])]
    pub search: Option<String>,

    /// Sort expression
    #[arg(long, default_value = DEFAULT_SORT)]
    pub sort: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: f64,
}

impl QueryArgs {
    fn filters(&self) -> EventSearchFilters {
        EventSearchFilters {
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            search: self.search.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Fetch recent reports and print a compact table
    Report {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Aggregate a batch of reports and ask a language model for a trend summary
    Trends {
        #[command(flatten)]
        query: QueryArgs,

        /// Skip the model and print the aggregated tables
        #[arg(long)]
        no_summary: bool,
    },

    /// Write reports as CSV
    Export {
        #[command(flatten)]
        query: QueryArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check connectivity to the events endpoint and the summarizer
    Health,
}

/// Text to print plus whether the process should exit successfully.
#[derive(Debug)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }
}

fn now_rfc3339() -> anyhow::Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format fetch timestamp")
}

/// Fetches one page; a `Failure` becomes the command error.
async fn fetch_page(
    config: &Config,
    query: &QueryArgs,
    default_limit: i64,
) -> anyhow::Result<(EventPage, Option<String>)> {
    let params = adverse_event::query_params(
        config,
        &query.filters(),
        query.limit.unwrap_or(default_limit),
        &query.sort,
        query.timeout,
    )?;
    let search = params.search_expression.clone();
    let page = adverse_event::fetch_events(config, params)
        .await
        .into_page()
        .map_err(anyhow::Error::msg)?;
    Ok((page, search))
}

async fn summarize(config: &Config, summary: &TrendSummary) -> Option<String> {
    let user_prompt = match summary.user_prompt() {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(error = %err, "could not build summary prompt");
            return None;
        }
    };
    let settings = config.summarizer.clone();
    let task = tokio::task::spawn_blocking(move || {
        OllamaClient::new(&settings)?.summarize(SYSTEM_PROMPT, &user_prompt)
    });
    match task.await {
        Ok(Ok(text)) => Some(text),
        Ok(Err(err)) => {
            warn!(error = %err, "summary unavailable; showing aggregated stats only");
            None
        }
        Err(err) => {
            warn!(error = %err, "summary task failed");
            None
        }
    }
}

async fn run_report(config: &Config, query: &QueryArgs, json: bool) -> anyhow::Result<String> {
    let (page, search) = fetch_page(config, query, REPORT_DEFAULT_LIMIT).await?;
    let report = EventReport::from_page(&page, RowLayout::COMPACT, now_rfc3339()?);
    if json {
        return Ok(render::json::to_pretty(&report)?);
    }
    Ok(render::markdown::event_report(&report, search.as_deref())?)
}

async fn run_trends(
    config: &Config,
    query: &QueryArgs,
    no_summary: bool,
    json: bool,
) -> anyhow::Result<String> {
    let (page, _) = fetch_page(config, query, TRENDS_DEFAULT_LIMIT).await?;
    if page.records.is_empty() {
        bail!("No records returned. Cannot compute trends.");
    }
    let agg = TrendAggregate::from_records(&page.records);
    let summary = TrendSummary::from_aggregate(&agg);
    if json {
        return Ok(render::json::to_pretty(&summary)?);
    }

    let narrative = if no_summary {
        None
    } else {
        summarize(config, &summary).await
    };
    Ok(render::markdown::trend_report(
        &agg,
        narrative.as_deref(),
        page.search_dropped,
        &now_rfc3339()?,
    )?)
}

async fn run_export(
    config: &Config,
    query: &QueryArgs,
    output: Option<PathBuf>,
) -> anyhow::Result<String> {
    let (page, _) = fetch_page(config, query, EXPORT_DEFAULT_LIMIT).await?;
    let rows = crate::transform::adverse_event::display_rows(&page.records, RowLayout::WIDE);

    match output {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            render::csv::write_rows(&rows, file)?;
            Ok(format!("Wrote {} rows to {}", rows.len(), path.display()))
        }
        None => {
            let mut buf = Vec::new();
            render::csv::write_rows(&rows, &mut buf)?;
            Ok(String::from_utf8(buf)?)
        }
    }
}

/// Runs one subcommand against `config`.
///
/// # Errors
///
/// Returns an error for invalid flags, fetch failures, and output failures.
/// An unreachable summarizer is not an error; `trends` falls back to tables.
pub async fn run(cli: Cli, config: &Config) -> anyhow::Result<CommandOutput> {
    let json = cli.json;
    match cli.command {
        Commands::Report { query } => Ok(CommandOutput::ok(
            run_report(config, &query, json).await?,
        )),
        Commands::Trends { query, no_summary } => Ok(CommandOutput::ok(
            run_trends(config, &query, no_summary, json).await?,
        )),
        Commands::Export { query, output } => {
            Ok(CommandOutput::ok(run_export(config, &query, output).await?))
        }
        Commands::Health => {
            let report = health::check(config).await?;
            let text = if json {
                render::json::to_pretty(&report)?
            } else {
                report.to_markdown()
            };
            Ok(CommandOutput {
                text,
                success: report.all_healthy(),
            })
        }
    }
}
