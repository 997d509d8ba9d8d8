//! Flattening tasks into report rows.

use crate::models::{CellValue, Column, CustomValue, FieldId, ReportRow, ReportTable, Task};
use std::collections::HashMap;

/// Columns for `fields`. Custom fields take the first name found in `tasks`.
pub fn build_columns(fields: &[FieldId], tasks: &[Task]) -> Vec<Column> {
    fields
        .iter()
        .map(|field| {
            let label = match field {
                FieldId::Custom(gid) => tasks
                    .iter()
                    .find_map(|t| t.custom_fields.get(gid))
                    .map(|cf| cf.name.clone())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| field.as_str()),
                builtin => builtin
                    .label()
                    .map(str::to_string)
                    .unwrap_or_else(|| builtin.as_str()),
            };
            Column {
                field: field.clone(),
                label,
            }
        })
        .collect()
}

/// One row per task, cells in `fields` order.
///
/// `project_names` maps project id to display name; unknown ids show the id.
pub fn project_row(
    task: &Task,
    fields: &[FieldId],
    project_names: &HashMap<String, String>,
) -> ReportRow {
    let cells = fields
        .iter()
        .map(|field| cell(task, field, project_names))
        .collect();

    ReportRow {
        task_id: task.id.clone(),
        cells,
    }
}

pub fn build_table(
    fields: &[FieldId],
    tasks: &[Task],
    project_names: &HashMap<String, String>,
) -> ReportTable {
    ReportTable {
        columns: build_columns(fields, tasks),
        rows: tasks
            .iter()
            .map(|t| project_row(t, fields, project_names))
            .collect(),
    }
}

fn text_or_empty(value: &str) -> CellValue {
    if value.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(value.to_string())
    }
}

fn list_or_empty(values: Vec<String>) -> CellValue {
    if values.is_empty() {
        CellValue::Empty
    } else {
        CellValue::List(values)
    }
}

fn cell(task: &Task, field: &FieldId, project_names: &HashMap<String, String>) -> CellValue {
    match field {
        FieldId::Id => CellValue::Text(task.id.clone()),
        FieldId::Name => text_or_empty(&task.name),
        FieldId::Project => {
            let name = project_names
                .get(&task.project_id)
                .unwrap_or(&task.project_id);
            text_or_empty(name)
        }
        FieldId::Assignee => task
            .assignee
            .as_deref()
            .map_or(CellValue::Empty, text_or_empty),
        FieldId::DueOn => task.due_on.map_or(CellValue::Empty, CellValue::Date),
        FieldId::Completed => CellValue::Bool(task.completed),
        FieldId::CreatedAt => task.created_at.map_or(CellValue::Empty, CellValue::DateTime),
        FieldId::ModifiedAt => task.modified_at.map_or(CellValue::Empty, CellValue::DateTime),
        FieldId::Notes => text_or_empty(&task.notes),
        FieldId::Tags => list_or_empty(task.tags.iter().cloned().collect()),
        FieldId::Custom(gid) => match task.custom_fields.get(gid).map(|cf| &cf.value) {
            None | Some(CustomValue::Empty) => CellValue::Empty,
            Some(CustomValue::Text(s)) | Some(CustomValue::Enum(s)) => text_or_empty(s),
            Some(CustomValue::Number(n)) => CellValue::Number(*n),
            Some(CustomValue::Date(d)) => CellValue::Date(*d),
            Some(CustomValue::MultiEnum(values)) | Some(CustomValue::People(values)) => {
                list_or_empty(values.clone())
            }
        },
    }
}
