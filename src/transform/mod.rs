//! Transform adapters from raw openFDA records into display-ready rows.

pub(crate) mod adverse_event;
