//! Output formatting for the CLI: pretty JSON, text/markdown templates, and CSV.

pub(crate) mod csv;
pub(crate) mod json;
pub(crate) mod markdown;
