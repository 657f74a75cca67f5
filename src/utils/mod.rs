//! Internal utility helpers for date handling.

pub(crate) mod date;
