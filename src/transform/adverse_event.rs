use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DISPLAY_PLACEHOLDER: &str = "—";
pub const UNKNOWN_NAME: &str = "(unknown)";

/// Locates a list inside a record, or `None` to defer to the next strategy.
type ListStrategy = fn(&Value) -> Option<&Vec<Value>>;

fn non_empty_array(value: Option<&Value>) -> Option<&Vec<Value>> {
    value?.as_array().filter(|items| !items.is_empty())
}

fn top_level_drug(record: &Value) -> Option<&Vec<Value>> {
    non_empty_array(record.get("drug"))
}

fn patient_drug(record: &Value) -> Option<&Vec<Value>> {
    non_empty_array(record.get("patient")?.get("drug"))
}

fn top_level_reaction(record: &Value) -> Option<&Vec<Value>> {
    non_empty_array(record.get("reaction"))
}

fn patient_reaction(record: &Value) -> Option<&Vec<Value>> {
    non_empty_array(record.get("patient")?.get("reaction"))
}

const DRUG_LIST_STRATEGIES: &[ListStrategy] = &[top_level_drug, patient_drug];
const REACTION_LIST_STRATEGIES: &[ListStrategy] = &[top_level_reaction, patient_reaction];

fn first_list<'a>(record: &'a Value, strategies: &[ListStrategy]) -> &'a [Value] {
    strategies
        .iter()
        .find_map(|strategy| strategy(record))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// String content of a scalar, or the first string of an array.
fn text_of(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().find_map(|v| v.as_str())?.trim().to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Product names in source order: `medicinalproduct`, else `brand_name`.
pub fn drug_names(record: &Value) -> Vec<String> {
    first_list(record, DRUG_LIST_STRATEGIES)
        .iter()
        .filter_map(|drug| {
            text_of(drug.get("medicinalproduct")).or_else(|| text_of(drug.get("brand_name")))
        })
        .collect()
}

/// MedDRA preferred terms in source order.
pub fn reaction_names(record: &Value) -> Vec<String> {
    first_list(record, REACTION_LIST_STRATEGIES)
        .iter()
        .filter_map(|reaction| text_of(reaction.get("reactionmeddrapt")))
        .collect()
}

pub(crate) fn or_unknown(names: Vec<String>) -> Vec<String> {
    if names.is_empty() {
        vec![UNKNOWN_NAME.to_string()]
    } else {
        names
    }
}

pub fn receive_date(record: &Value) -> Option<String> {
    text_of(record.get("receivedate"))
}

pub fn report_id(record: &Value) -> Option<String> {
    text_of(record.get("safetyreportid")).or_else(|| text_of(record.get("report_num")))
}

fn take_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Column caps for one table style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    pub max_names: usize,
    pub name_width: usize,
    pub drug_width: usize,
    pub reaction_width: usize,
}

impl RowLayout {
    /// Console table.
    pub const COMPACT: Self = Self {
        max_names: 2,
        name_width: 25,
        drug_width: 40,
        reaction_width: 35,
    };
    /// Export / data-grid table.
    pub const WIDE: Self = Self {
        max_names: 3,
        name_width: 30,
        drug_width: 80,
        reaction_width: 80,
    };
}

pub(crate) fn summarize_names(names: &[String], layout: RowLayout, width: usize) -> String {
    if names.is_empty() || width == 0 {
        return DISPLAY_PLACEHOLDER.to_string();
    }
    let joined = names
        .iter()
        .take(layout.max_names)
        .map(|name| take_chars(name, layout.name_width))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = take_chars(&joined, width);
    if out.chars().count() >= width {
        out.push_str("...");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayRow {
    pub receive_date: String,
    pub report_id: String,
    pub drug_summary: String,
    pub reaction_summary: String,
}

impl DisplayRow {
    pub const HEADERS: [&'static str; 4] = ["Receive date", "Report ID", "Drug(s)", "Reaction(s)"];

    pub fn from_record(record: &Value, layout: RowLayout) -> Self {
        Self {
            receive_date: receive_date(record).unwrap_or_else(|| DISPLAY_PLACEHOLDER.into()),
            report_id: report_id(record).unwrap_or_else(|| DISPLAY_PLACEHOLDER.into()),
            drug_summary: summarize_names(&drug_names(record), layout, layout.drug_width),
            reaction_summary: summarize_names(
                &reaction_names(record),
                layout,
                layout.reaction_width,
            ),
        }
    }

    pub fn cells(&self) -> [&str; 4] {
        [
            self.receive_date.as_str(),
            self.report_id.as_str(),
            self.drug_summary.as_str(),
            self.reaction_summary.as_str(),
        ]
    }
}

pub fn display_rows(records: &[Value], layout: RowLayout) -> Vec<DisplayRow> {
    records
        .iter()
        .map(|record| DisplayRow::from_record(record, layout))
        .collect()
}
