//! XLSX writer.
//!
//! One sheet named "Tasks": styled header row, bordered data rows with
//! alternating fill, type-aware number formats, frozen header, autofilter and
//! landscape A4 print setup.

use super::format::{
    bool_text, column_width, is_integral, join_list, DATETIME_FORMAT, DATE_FORMAT, DECIMAL_FORMAT,
    INTEGER_FORMAT, WRAP_THRESHOLD_CHARS,
};
use crate::error::FormatError;
use crate::models::{CellValue, ReportTable};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rust_xlsxwriter::{
    Color, ColNum, DocProperties, ExcelDateTime, Format, FormatAlign, FormatBorder, RowNum,
    Workbook, Worksheet, XlsxError,
};

pub const SHEET_NAME: &str = "Tasks";

const HEADER_FILL: u32 = 0x366092;
const STRIPE_FILL: u32 = 0xF2F2F2;
const HEADER_ROW_HEIGHT: f64 = 25.0;
const DATA_ROW_HEIGHT: f64 = 20.0;
/// A4 in the worksheet paper size table
const PAPER_A4: u8 = 9;

impl From<XlsxError> for FormatError {
    fn from(err: XlsxError) -> Self {
        FormatError::Workbook(err.to_string())
    }
}

/// Render `table` to workbook bytes. `created` is stored as the document
/// creation time, which keeps output identical for identical input.
pub fn render(table: &ReportTable, created: NaiveDateTime) -> Result<Vec<u8>, FormatError> {
    let mut workbook = Workbook::new();
    let properties = DocProperties::new().set_creation_datetime(&excel_datetime(created)?);
    workbook.set_properties(&properties);

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    write_header(worksheet, table)?;
    write_rows(worksheet, table)?;
    apply_layout(worksheet, table)?;

    Ok(workbook.save_to_buffer()?)
}

fn write_header(worksheet: &mut Worksheet, table: &ReportTable) -> Result<(), FormatError> {
    let header = Format::new()
        .set_bold()
        .set_font_size(12)
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Thin);

    for (col, column) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col_num(col)?, &column.label, &header)?;
    }
    worksheet.set_row_height(0, HEADER_ROW_HEIGHT)?;
    Ok(())
}

fn write_rows(worksheet: &mut Worksheet, table: &ReportTable) -> Result<(), FormatError> {
    for (i, row) in table.rows.iter().enumerate() {
        let sheet_row = row_num(i + 1)?;
        let striped = i % 2 == 1;

        for (col, cell) in row.cells.iter().enumerate() {
            let col = col_num(col)?;
            let base = cell_base(striped);

            match cell {
                CellValue::Empty => {
                    worksheet.write_blank(sheet_row, col, &base)?;
                }
                CellValue::Text(s) => {
                    worksheet.write_string_with_format(sheet_row, col, s, &text_format(base, s))?;
                }
                CellValue::List(values) => {
                    let joined = join_list(values);
                    worksheet.write_string_with_format(
                        sheet_row,
                        col,
                        &joined,
                        &text_format(base, &joined),
                    )?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_string_with_format(
                        sheet_row,
                        col,
                        bool_text(*b),
                        &base.set_align(FormatAlign::Center),
                    )?;
                }
                CellValue::Number(n) => {
                    let num_format = if is_integral(*n) {
                        INTEGER_FORMAT
                    } else {
                        DECIMAL_FORMAT
                    };
                    worksheet.write_number_with_format(
                        sheet_row,
                        col,
                        *n,
                        &base.set_num_format(num_format).set_align(FormatAlign::Right),
                    )?;
                }
                CellValue::Date(d) => {
                    worksheet.write_datetime_with_format(
                        sheet_row,
                        col,
                        &excel_date(*d)?,
                        &base.set_num_format(DATE_FORMAT).set_align(FormatAlign::Center),
                    )?;
                }
                CellValue::DateTime(dt) => {
                    worksheet.write_datetime_with_format(
                        sheet_row,
                        col,
                        &excel_datetime(dt.naive_utc())?,
                        &base
                            .set_num_format(DATETIME_FORMAT)
                            .set_align(FormatAlign::Center),
                    )?;
                }
            }
        }
        worksheet.set_row_height(sheet_row, DATA_ROW_HEIGHT)?;
    }
    Ok(())
}

fn apply_layout(worksheet: &mut Worksheet, table: &ReportTable) -> Result<(), FormatError> {
    for col in 0..table.columns.len() {
        worksheet.set_column_width(col_num(col)?, column_width(table, col) as f64)?;
    }

    worksheet.set_freeze_panes(1, 0)?;
    if !table.rows.is_empty() && !table.columns.is_empty() {
        worksheet.autofilter(
            0,
            0,
            row_num(table.rows.len())?,
            col_num(table.columns.len() - 1)?,
        )?;
    }

    worksheet
        .set_landscape()
        .set_paper_size(PAPER_A4)
        .set_print_fit_to_pages(1, 0)
        .set_margins(0.7, 0.7, 0.75, 0.75, 0.3, 0.3);
    Ok(())
}

fn cell_base(striped: bool) -> Format {
    let format = Format::new().set_border(FormatBorder::Thin);
    if striped {
        format.set_background_color(Color::RGB(STRIPE_FILL))
    } else {
        format
    }
}

fn text_format(base: Format, text: &str) -> Format {
    if text.chars().count() > WRAP_THRESHOLD_CHARS {
        base.set_text_wrap().set_align(FormatAlign::Top)
    } else {
        base.set_align(FormatAlign::VerticalCenter)
    }
}

fn row_num(index: usize) -> Result<RowNum, FormatError> {
    RowNum::try_from(index).map_err(|_| FormatError::Workbook(format!("row {} out of range", index)))
}

fn col_num(index: usize) -> Result<ColNum, FormatError> {
    ColNum::try_from(index)
        .map_err(|_| FormatError::Workbook(format!("column {} out of range", index)))
}

fn excel_date(date: NaiveDate) -> Result<ExcelDateTime, FormatError> {
    let year = u16::try_from(date.year())
        .map_err(|_| FormatError::Workbook(format!("year {} out of range", date.year())))?;
    Ok(ExcelDateTime::from_ymd(year, date.month() as u8, date.day() as u8)?)
}

fn excel_datetime(dt: NaiveDateTime) -> Result<ExcelDateTime, FormatError> {
    Ok(excel_date(dt.date())?.and_hms(dt.hour() as u16, dt.minute() as u8, dt.second())?)
}
