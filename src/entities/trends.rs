use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use serde::Serialize;
use serde_json::Value;

use crate::error::FdaError;
use crate::transform::adverse_event::{drug_names, or_unknown, reaction_names, receive_date};
use crate::utils::date::format_month;

const MONTH_KEY_LEN: usize = 6;
const SUMMARY_TOP_DRUGS: usize = 10;
const SUMMARY_TOP_REACTIONS: usize = 10;
const SUMMARY_TOP_PAIRS: usize = 6;

pub const SYSTEM_PROMPT: &str = "You are a data analyst. Summarize the main trends in this FDA adverse event data using bullet points. Include:
- Top drugs and top reactions (with counts where helpful)
- Notable drug-reaction pairs
- Time trend or date-range note
- One follow-up question or recommendation
Be concise; use numbers. Format as bullet points for easy reading.";

/// Insertion-ordered counter. Sorting is stable, so ties keep first-seen order.
struct Counter<K> {
    index: HashMap<K, usize>,
    entries: Vec<(K, usize)>,
}

impl<K: Eq + Hash + Clone> Counter<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn add(&mut self, key: K) {
        match self.index.get(&key) {
            Some(&slot) => self.entries[slot].1 += 1,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, 1));
            }
        }
    }

    fn into_sorted(self) -> Vec<(K, usize)> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }
}

/// Frequency tables over one batch of records, each sorted by count descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrendAggregate {
    pub total_reports: usize,
    pub by_drug: Vec<(String, usize)>,
    pub by_reaction: Vec<(String, usize)>,
    pub by_pair: Vec<((String, String), usize)>,
    pub by_month: Vec<(String, usize)>,
}

impl TrendAggregate {
    pub fn from_records(records: &[Value]) -> Self {
        let mut drugs = Counter::new();
        let mut reactions = Counter::new();
        let mut pairs = Counter::new();
        let mut months = Counter::new();

        for record in records {
            if let Some(date) = receive_date(record)
                && date.chars().count() >= MONTH_KEY_LEN
            {
                months.add(date.chars().take(MONTH_KEY_LEN).collect::<String>());
            }

            let record_drugs = or_unknown(drug_names(record));
            let record_reactions = or_unknown(reaction_names(record));
            for drug in &record_drugs {
                drugs.add(drug.clone());
            }
            for reaction in &record_reactions {
                reactions.add(reaction.clone());
            }
            for drug in &record_drugs {
                for reaction in &record_reactions {
                    pairs.add((drug.clone(), reaction.clone()));
                }
            }
        }

        Self {
            total_reports: records.len(),
            by_drug: drugs.into_sorted(),
            by_reaction: reactions.into_sorted(),
            by_pair: pairs.into_sorted(),
            by_month: months.into_sorted(),
        }
    }

    /// Month buckets in calendar order.
    pub fn months_chronological(&self) -> Vec<(String, usize)> {
        let mut months = self.by_month.clone();
        months.sort_by(|a, b| a.0.cmp(&b.0));
        months
    }

    pub fn date_range(&self) -> Option<(String, String)> {
        let first = self.by_month.iter().map(|(m, _)| m).min()?;
        let last = self.by_month.iter().map(|(m, _)| m).max()?;
        Some((format_month(first), format_month(last)))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DrugCount {
    pub drug: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReactionCount {
    pub reaction: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PairCount {
    pub drug: String,
    pub reaction: String,
    pub count: usize,
}

/// Compact payload handed to the language model.
#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    pub total_reports: usize,
    pub date_range: String,
    pub reports_by_month: BTreeMap<String, usize>,
    pub top_drugs: Vec<DrugCount>,
    pub top_reactions: Vec<ReactionCount>,
    pub top_drug_reaction_pairs: Vec<PairCount>,
    pub unique_drugs: usize,
    pub unique_reactions: usize,
}

impl TrendSummary {
    pub fn from_aggregate(agg: &TrendAggregate) -> Self {
        Self {
            total_reports: agg.total_reports,
            date_range: agg
                .date_range()
                .map(|(first, last)| format!("{first} to {last}"))
                .unwrap_or_else(|| "N/A".to_string()),
            reports_by_month: agg
                .by_month
                .iter()
                .map(|(month, count)| (format_month(month), *count))
                .collect(),
            top_drugs: agg
                .by_drug
                .iter()
                .take(SUMMARY_TOP_DRUGS)
                .map(|(drug, count)| DrugCount {
                    drug: drug.clone(),
                    count: *count,
                })
                .collect(),
            top_reactions: agg
                .by_reaction
                .iter()
                .take(SUMMARY_TOP_REACTIONS)
                .map(|(reaction, count)| ReactionCount {
                    reaction: reaction.clone(),
                    count: *count,
                })
                .collect(),
            top_drug_reaction_pairs: agg
                .by_pair
                .iter()
                .take(SUMMARY_TOP_PAIRS)
                .map(|((drug, reaction), count)| PairCount {
                    drug: drug.clone(),
                    reaction: reaction.clone(),
                    count: *count,
                })
                .collect(),
            unique_drugs: agg.by_drug.len(),
            unique_reactions: agg.by_reaction.len(),
        }
    }

    pub fn user_prompt(&self) -> Result<String, FdaError> {
        let payload = crate::render::json::to_pretty(self)?;
        Ok(format!(
            "FDA adverse event summary ({} reports):\n\n{payload}\n\nWrite a brief trend report in bullet points.",
            self.total_reports
        ))
    }
}
