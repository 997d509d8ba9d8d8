//! Wire shapes of the service's JSON API and their conversion to domain records.
//!
//! Every response is wrapped as `{ "data": ..., "next_page": { "offset": ... } }`.
//! Fields are optional on the wire; records without an id or a name are dropped.

use crate::models::{CustomField, CustomValue, Project, Task, Workspace};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::warn;

/// Fields requested for every task.
pub const TASK_OPT_FIELDS: &str = "name,assignee.name,due_on,completed,created_at,modified_at,\
notes,tags.name,custom_fields.gid,custom_fields.name,custom_fields.type,\
custom_fields.resource_subtype,custom_fields.text_value,custom_fields.number_value,\
custom_fields.enum_value.name,custom_fields.multi_enum_values.name,custom_fields.date_value,\
custom_fields.people_value.name,custom_fields.display_value";

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
    #[serde(default)]
    pub next_page: Option<NextPage>,
}

impl<T> Envelope<T> {
    /// Cursor for the following page, if there is one.
    pub fn next_offset(&self) -> Option<String> {
        self.next_page
            .as_ref()
            .and_then(|p| p.offset.clone())
            .filter(|o| !o.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NextPage {
    #[serde(default)]
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    message: Option<String>,
}

/// First `errors[].message` of an error body, if the body has one.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .errors
        .into_iter()
        .find_map(|e| e.message)
        .filter(|m| !m.is_empty())
}

/// Any `{gid, name}` reference: workspaces, projects, users, tags, enum options.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawRef {
    #[serde(default)]
    pub gid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RawRef {
    fn into_pair(self, kind: &str) -> Option<(String, String)> {
        match (self.gid, self.name) {
            (Some(gid), Some(name)) if !gid.is_empty() => Some((gid, name)),
            (gid, _) => {
                warn!("Skipping {} without id or name (gid: {:?})", kind, gid);
                None
            }
        }
    }

    pub fn into_workspace(self) -> Option<Workspace> {
        self.into_pair("workspace")
            .map(|(id, name)| Workspace { id, name })
    }

    pub fn into_project(self) -> Option<Project> {
        self.into_pair("project").map(|(id, name)| Project { id, name })
    }

    /// Display name, falling back to the id.
    fn display(self) -> Option<String> {
        self.name.filter(|n| !n.is_empty()).or(self.gid)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTask {
    #[serde(default)]
    gid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    assignee: Option<RawRef>,
    #[serde(default)]
    due_on: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    tags: Option<Vec<RawRef>>,
    #[serde(default)]
    custom_fields: Option<Vec<RawCustomField>>,
}

#[derive(Debug, Deserialize)]
struct RawCustomField {
    #[serde(default)]
    gid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    field_type: Option<String>,
    #[serde(default)]
    resource_subtype: Option<String>,
    #[serde(default)]
    text_value: Option<String>,
    #[serde(default)]
    number_value: Option<f64>,
    #[serde(default)]
    enum_value: Option<RawRef>,
    #[serde(default)]
    multi_enum_values: Option<Vec<RawRef>>,
    /// Either `{ "date": "YYYY-MM-DD", ... }` or a bare date string
    #[serde(default)]
    date_value: Option<serde_json::Value>,
    #[serde(default)]
    people_value: Option<Vec<RawRef>>,
    /// Server-rendered text, present for every type
    #[serde(default)]
    display_value: Option<String>,
}

impl RawTask {
    /// Convert to a `Task` of `project_id`, or `None` if the record has no id or name.
    pub fn into_task(self, project_id: &str) -> Option<Task> {
        let (id, name) = match (self.gid, self.name) {
            (Some(gid), Some(name)) if !gid.is_empty() => (gid, name),
            (gid, _) => {
                warn!(
                    "Skipping task without id or name in project {} (gid: {:?})",
                    project_id, gid
                );
                return None;
            }
        };

        let mut task = Task::new(id, project_id, name);
        task.assignee = self.assignee.and_then(RawRef::display);
        task.completed = self.completed.unwrap_or(false);
        task.notes = self.notes.unwrap_or_default();
        task.due_on = self
            .due_on
            .as_deref()
            .and_then(|s| parse_date(s, "due_on", &task.id));
        task.created_at = self
            .created_at
            .as_deref()
            .and_then(|s| parse_datetime(s, "created_at", &task.id));
        task.modified_at = self
            .modified_at
            .as_deref()
            .and_then(|s| parse_datetime(s, "modified_at", &task.id));

        task.tags = self
            .tags
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| t.name)
            .filter(|n| !n.is_empty())
            .collect();

        for raw in self.custom_fields.unwrap_or_default() {
            if let Some((gid, field)) = raw.into_custom_field(&task.id) {
                task.custom_fields.insert(gid, field);
            }
        }

        Some(task)
    }
}

impl RawCustomField {
    fn into_custom_field(self, task_id: &str) -> Option<(String, CustomField)> {
        let gid = self.gid.filter(|g| !g.is_empty())?;
        let name = self.name.unwrap_or_else(|| gid.clone());
        let kind = self.field_type.or(self.resource_subtype).unwrap_or_default();

        let display = self.display_value.filter(|d| !d.is_empty());

        let value = match kind.as_str() {
            "text" => self
                .text_value
                .or(display)
                .map_or(CustomValue::Empty, CustomValue::Text),
            "number" => self.number_value.map_or(CustomValue::Empty, CustomValue::Number),
            "enum" => self
                .enum_value
                .and_then(|e| e.name)
                .map_or(CustomValue::Empty, CustomValue::Enum),
            "multi_enum" => names(self.multi_enum_values).map_or(CustomValue::Empty, CustomValue::MultiEnum),
            "people" => names(self.people_value).map_or(CustomValue::Empty, CustomValue::People),
            "date" => self
                .date_value
                .as_ref()
                .and_then(date_value_str)
                .and_then(|s| parse_date(s, &gid, task_id))
                .map_or(CustomValue::Empty, CustomValue::Date),
            other => match display {
                Some(text) => CustomValue::Text(text),
                None => {
                    warn!(
                        "Custom field {} on task {} has unsupported type '{}' and no display value",
                        gid, task_id, other
                    );
                    CustomValue::Empty
                }
            },
        };

        Some((gid, CustomField { name, value }))
    }
}

fn names(refs: Option<Vec<RawRef>>) -> Option<Vec<String>> {
    let names: Vec<String> = refs?
        .into_iter()
        .filter_map(RawRef::display)
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

fn date_value_str(value: &serde_json::Value) -> Option<&str> {
    match value {
        serde_json::Value::String(s) => Some(s.as_str()),
        serde_json::Value::Object(map) => map.get("date").and_then(|d| d.as_str()),
        _ => None,
    }
}

fn parse_date(value: &str, field: &str, task_id: &str) -> Option<NaiveDate> {
    // date_value may carry a time component; the date part is what counts
    let date_part = value.get(..10).unwrap_or(value);
    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            warn!("Task {} has unparseable {} '{}'", task_id, field, value);
            None
        }
    }
}

fn parse_datetime(value: &str, field: &str, task_id: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            warn!("Task {} has unparseable {} '{}'", task_id, field, value);
            None
        }
    }
}
