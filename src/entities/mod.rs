//! Query building, report assembly, and trend aggregation used by the CLI.

pub(crate) mod adverse_event;
pub(crate) mod trends;
