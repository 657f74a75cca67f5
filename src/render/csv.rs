use std::io::Write;

use crate::error::FdaError;
use crate::transform::adverse_event::DisplayRow;

/// Writes a header line followed by one line per row.
pub fn write_rows<W: Write>(rows: &[DisplayRow], writer: W) -> Result<(), FdaError> {
    let mut out = ::csv::Writer::from_writer(writer);
    out.write_record(DisplayRow::HEADERS)?;
    for row in rows {
        out.write_record(row.cells())?;
    }
    out.flush()?;
    Ok(())
}
