use serde::Serialize;

use crate::error::FdaError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, FdaError> {
    Ok(serde_json::to_string_pretty(value)?)
}
