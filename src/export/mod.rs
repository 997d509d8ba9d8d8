//! Export module - writes a report table to a spreadsheet file.
//!
//! Supported formats (picked from the output extension):
//! - `.xlsx` (also used when the path has no extension)
//! - `.csv`
//!
//! The whole file is rendered in memory and validated first, then written
//! atomically. A failed export leaves nothing at the output path.

pub mod csv;
pub mod format;
pub mod xlsx;

use crate::error::{ExportError, FormatError};
use crate::fs_util::write_atomic;
use crate::models::ReportTable;
use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use tracing::{debug, info};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Result<Self, FormatError> {
        match path.extension().and_then(|e| e.to_str()) {
            None => Ok(Self::Xlsx),
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => Ok(Self::Xlsx),
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(Self::Csv),
            Some(ext) => Err(FormatError::UnsupportedExtension(ext.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }
}

/// Writes report tables to disk.
#[derive(Debug, Clone)]
pub struct ReportExporter {
    created: NaiveDateTime,
}

impl Default for ReportExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportExporter {
    /// Exporter with a fixed workbook creation time.
    pub fn new() -> Self {
        let created = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self { created }
    }

    /// Record `created` as the workbook creation time.
    pub fn with_creation_time(mut self, created: NaiveDateTime) -> Self {
        self.created = created;
        self
    }

    /// Render `table` in the format implied by `output_path` and write it.
    pub fn export(&self, table: &ReportTable, output_path: &Path) -> Result<ExportFormat, ExportError> {
        let format = ExportFormat::from_path(output_path)?;
        format::validate(table, format == ExportFormat::Xlsx)?;

        let bytes = match format {
            ExportFormat::Xlsx => xlsx::render(table, self.created)?,
            ExportFormat::Csv => csv::render(table)?,
        };
        debug!(
            "Rendered {} rows as {} ({} bytes)",
            table.rows.len(),
            format.extension(),
            bytes.len()
        );

        write_atomic(output_path, &bytes, false).map_err(|source| ExportError::Io {
            path: output_path.to_path_buf(),
            source,
        })?;

        info!(
            "Exported {} tasks to {}",
            table.rows.len(),
            output_path.display()
        );
        Ok(format)
    }
}

/// Default report file name: `tasks_<project>_<YYYYMMDD_HHMMSS>.xlsx`.
///
/// The project name keeps letters, digits, `-` and `_`; spaces become `_`.
pub fn suggested_file_name(project_name: Option<&str>, now: NaiveDateTime) -> String {
    let timestamp = now.format("%Y%m%d_%H%M%S");

    let safe: String = project_name
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .replace(' ', "_");

    if safe.is_empty() {
        format!("tasks_{}.xlsx", timestamp)
    } else {
        format!("tasks_{}_{}.xlsx", safe, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CellValue, Column, FieldId, ReportRow};
    use tempfile::TempDir;

    fn table() -> ReportTable {
        ReportTable {
            columns: vec![
                Column { field: FieldId::Name, label: "Task Name".into() },
                Column { field: FieldId::Completed, label: "Completed".into() },
            ],
            rows: vec![
                ReportRow {
                    task_id: "1".into(),
                    cells: vec![CellValue::Text("a".into()), CellValue::Bool(true)],
                },
                ReportRow {
                    task_id: "2".into(),
                    cells: vec![CellValue::Text("b".into()), CellValue::Bool(false)],
                },
            ],
        }
    }

    fn leftovers(dir: &Path) -> std::io::Result<usize> {
        Ok(std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count())
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("a.xlsx")), Ok(ExportFormat::Xlsx));
        assert_eq!(ExportFormat::from_path(Path::new("a.CSV")), Ok(ExportFormat::Csv));
        assert_eq!(ExportFormat::from_path(Path::new("report")), Ok(ExportFormat::Xlsx));
        assert_eq!(
            ExportFormat::from_path(Path::new("a.pdf")),
            Err(FormatError::UnsupportedExtension("pdf".into()))
        );
    }

    #[test]
    fn test_empty_export_has_header_only() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("empty.csv");
        let mut empty = table();
        empty.rows.clear();

        ReportExporter::new().export(&empty, &path)?;

        assert_eq!(std::fs::read_to_string(&path)?, "Task Name,Completed\n");
        Ok(())
    }

    #[test]
    fn test_xlsx_export_is_byte_identical() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let first = temp_dir.path().join("first.xlsx");
        let second = temp_dir.path().join("second.xlsx");

        let exporter = ReportExporter::new();
        exporter.export(&table(), &first)?;
        exporter.export(&table(), &second)?;

        assert_eq!(std::fs::read(&first)?, std::fs::read(&second)?);
        assert_eq!(leftovers(temp_dir.path())?, 0);
        Ok(())
    }

    #[test]
    fn test_format_error_writes_nothing() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let fresh = temp_dir.path().join("fresh.xlsx");
        let existing = temp_dir.path().join("existing.xlsx");
        std::fs::write(&existing, b"previous report")?;

        let mut bad = table();
        bad.rows[1].cells[0] = CellValue::Number(f64::INFINITY);

        let exporter = ReportExporter::new();
        assert!(matches!(
            exporter.export(&bad, &fresh),
            Err(ExportError::Format(FormatError::Unrepresentable { row: 2, .. }))
        ));
        assert!(exporter.export(&bad, &existing).is_err());

        assert!(!fresh.exists());
        assert_eq!(std::fs::read(&existing)?, b"previous report");
        assert_eq!(leftovers(temp_dir.path())?, 0);
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_io_error() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("missing").join("out.csv");

        assert!(matches!(
            ReportExporter::new().export(&table(), &path),
            Err(ExportError::Io { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_suggested_file_name() {
        let now = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();

        assert_eq!(
            suggested_file_name(Some("Q2 Launch / Web!"), now),
            "tasks_Q2_Launch__Web_20240506_070809.xlsx"
        );
        assert_eq!(suggested_file_name(None, now), "tasks_20240506_070809.xlsx");
        assert_eq!(
            suggested_file_name(Some("営業 計画"), now),
            "tasks_営業_計画_20240506_070809.xlsx"
        );
    }
}
