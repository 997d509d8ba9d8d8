//! CSV writer: header row, then one record per report row.

use super::format::{render as render_cell, Target};
use crate::error::FormatError;
use crate::models::ReportTable;

pub fn render(table: &ReportTable) -> Result<Vec<u8>, FormatError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(table.columns.iter().map(|c| c.label.as_str()))
        .map_err(csv_error)?;

    for row in &table.rows {
        writer
            .write_record(row.cells.iter().map(|cell| render_cell(cell, Target::Csv)))
            .map_err(csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| FormatError::Workbook(e.to_string()))
}

fn csv_error(err: csv::Error) -> FormatError {
    FormatError::Workbook(err.to_string())
}
