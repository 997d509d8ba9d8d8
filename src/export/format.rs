//! Cell rendering rules shared by the XLSX and CSV writers.

use crate::error::FormatError;
use crate::models::{CellValue, ReportTable};
use chrono::Datelike;

/// Excel number formats.
pub const DATE_FORMAT: &str = "yyyy/mm/dd";
pub const DATETIME_FORMAT: &str = "yyyy/mm/dd hh:mm:ss";
pub const INTEGER_FORMAT: &str = "#,##0";
pub const DECIMAL_FORMAT: &str = "#,##0.00";

/// Longest string a worksheet cell can hold.
pub const XLSX_MAX_TEXT_CHARS: usize = 32_767;
/// Worksheet row limit, header included.
pub const XLSX_MAX_ROWS: usize = 1_048_576;
/// Text longer than this is wrapped.
pub const WRAP_THRESHOLD_CHARS: usize = 50;

/// Column width sampling and bounds.
pub const WIDTH_SAMPLE_ROWS: usize = 100;
pub const MIN_COLUMN_WIDTH: usize = 10;
pub const MAX_COLUMN_WIDTH: usize = 50;
const WIDTH_PADDING: usize = 2;

/// Where a rendered value ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Plain text for CSV: ISO dates, ungrouped numbers
    Csv,
    /// What a worksheet cell displays, used for sizing columns
    Sheet,
}

/// Sorted, deduplicated, comma-joined list.
pub fn join_list(values: &[String]) -> String {
    let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(", ")
}

pub fn bool_text(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// Whether `n` is shown without decimals.
pub fn is_integral(n: f64) -> bool {
    n.fract() == 0.0 && n.abs() < 1e15
}

/// `#,##0` / `#,##0.00` rendered as text.
fn grouped(n: f64) -> String {
    let decimals = if is_integral(n) { 0 } else { 2 };
    let plain = format!("{:.*}", decimals, n.abs());
    let (int_part, frac_part) = match plain.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (plain.as_str(), None),
    };

    let mut out = String::with_capacity(plain.len() + plain.len() / 3 + 1);
    if n.is_sign_negative() && n != 0.0 {
        out.push('-');
    }
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// Text form of a cell.
pub fn render(cell: &CellValue, target: Target) -> String {
    match (cell, target) {
        (CellValue::Empty, _) => String::new(),
        (CellValue::Text(s), _) => s.clone(),
        (CellValue::Bool(b), _) => bool_text(*b).to_string(),
        (CellValue::List(values), _) => join_list(values),
        (CellValue::Number(n), Target::Csv) => {
            if is_integral(*n) {
                format!("{:.0}", n)
            } else {
                n.to_string()
            }
        }
        (CellValue::Number(n), Target::Sheet) => grouped(*n),
        (CellValue::Date(d), Target::Csv) => d.format("%Y-%m-%d").to_string(),
        (CellValue::Date(d), Target::Sheet) => d.format("%Y/%m/%d").to_string(),
        (CellValue::DateTime(dt), Target::Csv) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        (CellValue::DateTime(dt), Target::Sheet) => dt.format("%Y/%m/%d %H:%M:%S").to_string(),
    }
}

/// Display width, counting kana, CJK ideographs and full-width forms as two.
pub fn display_width(text: &str) -> usize {
    text.chars()
        .map(|c| match c {
            '\u{3040}'..='\u{309F}'
            | '\u{30A0}'..='\u{30FF}'
            | '\u{4E00}'..='\u{9FAF}'
            | '\u{AC00}'..='\u{D7AF}'
            | '\u{FF01}'..='\u{FF60}' => 2,
            _ => 1,
        })
        .sum()
}

/// Width of column `col`: header plus the first rows, padded and clamped.
pub fn column_width(table: &ReportTable, col: usize) -> usize {
    let header = table
        .columns
        .get(col)
        .map(|c| display_width(&c.label))
        .unwrap_or(0);

    let widest = table
        .rows
        .iter()
        .take(WIDTH_SAMPLE_ROWS - 1)
        .filter_map(|row| row.cells.get(col))
        .map(|cell| display_width(&render(cell, Target::Sheet)))
        .fold(header, usize::max);

    (widest + WIDTH_PADDING).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
}

/// Reject anything the target format cannot hold, before a byte is written.
///
/// `row` in errors is 1-based over data rows.
pub fn validate(table: &ReportTable, target_is_xlsx: bool) -> Result<(), FormatError> {
    let width = table.columns.len();

    if target_is_xlsx && table.rows.len() + 1 > XLSX_MAX_ROWS {
        return Err(FormatError::Unrepresentable {
            row: table.rows.len(),
            column: String::new(),
            reason: format!("more than {} rows", XLSX_MAX_ROWS - 1),
        });
    }

    for (i, row) in table.rows.iter().enumerate() {
        let row_no = i + 1;
        if row.cells.len() != width {
            return Err(FormatError::Unrepresentable {
                row: row_no,
                column: String::new(),
                reason: format!("row has {} cells, expected {}", row.cells.len(), width),
            });
        }

        for (cell, column) in row.cells.iter().zip(&table.columns) {
            let problem = match cell {
                CellValue::Number(n) if !n.is_finite() => Some(format!("non-finite number {}", n)),
                CellValue::Text(s) if target_is_xlsx && s.chars().count() > XLSX_MAX_TEXT_CHARS => {
                    Some(format!("text longer than {} characters", XLSX_MAX_TEXT_CHARS))
                }
                CellValue::Date(d) if target_is_xlsx && !(1900..=9999).contains(&d.year()) => {
                    Some(format!("date {} outside the worksheet date range", d))
                }
                CellValue::DateTime(dt) if target_is_xlsx && !(1900..=9999).contains(&dt.year()) => {
                    Some(format!("date {} outside the worksheet date range", dt))
                }
                CellValue::List(values) if target_is_xlsx => {
                    let joined = join_list(values).chars().count();
                    (joined > XLSX_MAX_TEXT_CHARS)
                        .then(|| format!("text longer than {} characters", XLSX_MAX_TEXT_CHARS))
                }
                _ => None,
            };

            if let Some(reason) = problem {
                return Err(FormatError::Unrepresentable {
                    row: row_no,
                    column: column.label.clone(),
                    reason,
                });
            }
        }
    }

    Ok(())
}
