use std::sync::OnceLock;

use minijinja::{Environment, context};
use serde::Serialize;

use crate::entities::adverse_event::EventReport;
use crate::entities::trends::TrendAggregate;
use crate::error::FdaError;
use crate::utils::date::format_month;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

const BAR_CELLS: usize = 40;
const TABLE_RULE_WIDTH: usize = 88;
const FALLBACK_TOP_DRUGS: usize = 10;
const FALLBACK_TOP_REACTIONS: usize = 10;
const FALLBACK_TOP_PAIRS: usize = 5;

fn pad_right(s: String, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        return s;
    }
    format!("{s}{}", " ".repeat(width - len))
}

fn pad_left(s: String, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        return s;
    }
    format!("{}{s}", " ".repeat(width - len))
}

fn build_env() -> Result<Environment<'static>, FdaError> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_filter("pad", pad_right);
    env.add_filter("pad_left", pad_left);
    env.add_template("report.md.j2", include_str!("../../templates/report.md.j2"))?;
    env.add_template("trends.md.j2", include_str!("../../templates/trends.md.j2"))?;
    Ok(env)
}

fn env() -> Result<&'static Environment<'static>, FdaError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }
    let env = build_env()?;
    Ok(ENV.get_or_init(|| env))
}

/// Filled cells first, capped at the bar width.
fn month_bar(count: usize) -> String {
    let filled = count.min(BAR_CELLS);
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_CELLS - filled))
}

#[derive(Serialize)]
struct MonthRow {
    month: String,
    count: usize,
    bar: String,
}

#[derive(Serialize)]
struct NameCount<'a> {
    name: &'a str,
    count: usize,
}

#[derive(Serialize)]
struct PairRow<'a> {
    drug: &'a str,
    reaction: &'a str,
    count: usize,
}

pub fn event_report(report: &EventReport, search: Option<&str>) -> Result<String, FdaError> {
    let tmpl = env()?.get_template("report.md.j2")?;
    Ok(tmpl.render(context! {
        report => report,
        search => search,
        rule => "-".repeat(TABLE_RULE_WIDTH),
    })?)
}

/// Renders the trend report: the model narrative when present, else the raw tables.
pub fn trend_report(
    agg: &TrendAggregate,
    narrative: Option<&str>,
    search_dropped: bool,
    fetched_at: &str,
) -> Result<String, FdaError> {
    let months: Vec<MonthRow> = agg
        .months_chronological()
        .into_iter()
        .map(|(month, count)| MonthRow {
            month: format_month(&month),
            count,
            bar: month_bar(count),
        })
        .collect();
    let drugs: Vec<NameCount<'_>> = agg
        .by_drug
        .iter()
        .take(FALLBACK_TOP_DRUGS)
        .map(|(name, count)| NameCount { name, count: *count })
        .collect();
    let reactions: Vec<NameCount<'_>> = agg
        .by_reaction
        .iter()
        .take(FALLBACK_TOP_REACTIONS)
        .map(|(name, count)| NameCount { name, count: *count })
        .collect();
    let pairs: Vec<PairRow<'_>> = agg
        .by_pair
        .iter()
        .take(FALLBACK_TOP_PAIRS)
        .map(|((drug, reaction), count)| PairRow {
            drug,
            reaction,
            count: *count,
        })
        .collect();
    let date_range = agg
        .date_range()
        .map(|(first, last)| format!("{first} to {last}"));

    let tmpl = env()?.get_template("trends.md.j2")?;
    Ok(tmpl.render(context! {
        total_reports => agg.total_reports,
        narrative => narrative,
        search_dropped => search_dropped,
        months => months,
        drugs => drugs,
        reactions => reactions,
        pairs => pairs,
        unique_drugs => agg.by_drug.len(),
        unique_reactions => agg.by_reaction.len(),
        date_range => date_range,
        fetched_at => fetched_at,
    })?)
}
