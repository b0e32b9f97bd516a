use super::{plan_rows, ExportError};
use crate::models::WeeklyPlan;
use csv::Writer;
use std::io::Write;
use std::path::Path;

/// Write plan weeks as CSV, one row per prescribed exercise
pub fn write_plan<W: Write>(weeks: &[WeeklyPlan], writer: W) -> Result<(), ExportError> {
    let mut writer = Writer::from_writer(writer);
    for row in plan_rows(weeks) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Export plan weeks to a CSV file (suitable for spreadsheets)
pub fn export_plan<P: AsRef<Path>>(weeks: &[WeeklyPlan], output_path: P) -> Result<(), ExportError> {
    let file = std::fs::File::create(output_path)?;
    write_plan(weeks, file)
}
