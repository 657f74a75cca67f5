use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::FdaError;
use crate::sources::openfda::{EventPage, OpenFdaClient, QueryParams, QueryResult};
use crate::transform::adverse_event::{
    self as transform, DISPLAY_PLACEHOLDER, DisplayRow, RowLayout,
};
use crate::utils::date::to_yyyymmdd;

const RECEIVE_DATE_FIELD: &str = "receivedate";
const EXAMPLE_SUMMARY_WIDTH: usize = 60;

#[derive(Debug, Clone, Default)]
pub struct EventSearchFilters {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search: Option<String>,
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Builds the `search` expression: either the raw `--search` text or a
/// `receivedate` range from the date flags. Open ends use `*`.
pub fn build_search_expression(filters: &EventSearchFilters) -> Result<Option<String>, FdaError> {
    let raw = trimmed(filters.search.as_deref());
    let from = trimmed(filters.date_from.as_deref());
    let to = trimmed(filters.date_to.as_deref());

    if raw.is_some() && (from.is_some() || to.is_some()) {
        return Err(FdaError::InvalidArgument(
            "--search cannot be combined with --date-from/--date-to".into(),
        ));
    }
    if let Some(raw) = raw {
        return Ok(Some(raw.to_string()));
    }

    let from = from
        .map(|v| to_yyyymmdd(v, "--date-from", false))
        .transpose()?;
    let to = to.map(|v| to_yyyymmdd(v, "--date-to", true)).transpose()?;
    if let (Some(from), Some(to)) = (from.as_deref(), to.as_deref())
        && from > to
    {
        return Err(FdaError::InvalidArgument(
            "--date-from must be <= --date-to".into(),
        ));
    }

    Ok(match (from, to) {
        (None, None) => None,
        (from, to) => Some(format!(
            "{RECEIVE_DATE_FIELD}:[{} TO {}]",
            from.as_deref().unwrap_or("*"),
            to.as_deref().unwrap_or("*")
        )),
    })
}

pub fn query_params(
    config: &Config,
    filters: &EventSearchFilters,
    limit: i64,
    sort: &str,
    timeout_seconds: f64,
) -> Result<QueryParams, FdaError> {
    Ok(QueryParams::new(limit)
        .with_search(build_search_expression(filters)?)
        .with_sort(sort)
        .with_api_key(config.fda_api_key.clone())
        .with_timeout_seconds(timeout_seconds))
}

/// Runs the blocking fetch on the runtime's blocking pool.
pub async fn fetch_events(config: &Config, params: QueryParams) -> QueryResult {
    let config = config.clone();
    let task = tokio::task::spawn_blocking(move || match OpenFdaClient::new(&config) {
        Ok(client) => client.fetch(&params),
        Err(err) => QueryResult::Failure {
            message: err.to_string(),
        },
    });
    let result = match task.await {
        Ok(result) => result,
        Err(err) => QueryResult::Failure {
            message: format!("fetch task failed: {err}"),
        },
    };
    debug!(
        success = result.is_success(),
        records = result.records().len(),
        error = result.message().unwrap_or_default(),
        "openFDA fetch finished"
    );
    result
}

#[derive(Debug, Clone, Serialize)]
pub struct ExampleRecord {
    pub receive_date: String,
    pub report_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,
    pub drug_count: usize,
    pub drugs: String,
    pub reaction_count: usize,
    pub reactions: String,
}

fn patient_line(record: &Value) -> Option<String> {
    let patient = record.get("patient")?.as_object()?;
    let field = |key: &str| {
        patient
            .get(key)
            .and_then(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DISPLAY_PLACEHOLDER.to_string())
    };
    Some(format!(
        "sex={} age={}",
        field("patientsex"),
        field("patientonsetage")
    ))
}

impl ExampleRecord {
    pub fn from_record(record: &Value) -> Self {
        let layout = RowLayout {
            drug_width: EXAMPLE_SUMMARY_WIDTH,
            reaction_width: EXAMPLE_SUMMARY_WIDTH,
            ..RowLayout::COMPACT
        };
        let drugs = transform::drug_names(record);
        let reactions = transform::reaction_names(record);
        Self {
            receive_date: transform::receive_date(record)
                .unwrap_or_else(|| DISPLAY_PLACEHOLDER.into()),
            report_id: transform::report_id(record).unwrap_or_else(|| DISPLAY_PLACEHOLDER.into()),
            patient: patient_line(record),
            drug_count: drugs.len(),
            drugs: transform::summarize_names(&drugs, layout, layout.drug_width),
            reaction_count: reactions.len(),
            reactions: transform::summarize_names(&reactions, layout, layout.reaction_width),
        }
    }
}

/// What the console report prints for one fetched page.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub returned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub rows: Vec<DisplayRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<ExampleRecord>,
    pub search_dropped: bool,
    pub fetched_at: String,
}

impl EventReport {
    pub fn from_page(page: &EventPage, layout: RowLayout, fetched_at: String) -> Self {
        Self {
            returned: page.records.len(),
            total: page.total(),
            rows: transform::display_rows(&page.records, layout),
            example: page.records.first().map(ExampleRecord::from_record),
            search_dropped: page.search_dropped,
            fetched_at,
        }
    }
}
