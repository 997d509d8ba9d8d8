//! Domain records pulled from the service and the report shapes built from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// A workspace the token can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
}

/// A project inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// Typed value of a custom field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CustomValue {
    Text(String),
    Number(f64),
    Enum(String),
    MultiEnum(Vec<String>),
    Date(NaiveDate),
    People(Vec<String>),
    Empty,
}

/// Custom field attached to a task, keyed by its gid in `Task::custom_fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    pub value: CustomValue,
}

/// A task as normalized from the service payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique on the remote side
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub assignee: Option<String>,
    pub due_on: Option<NaiveDate>,
    pub completed: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, CustomField>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Task {
    /// Minimal task, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            assignee: None,
            due_on: None,
            completed: false,
            created_at: None,
            modified_at: None,
            notes: String::new(),
            custom_fields: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }
}

/// Prefix of custom field ids in the selected-field vocabulary.
pub const CUSTOM_FIELD_PREFIX: &str = "custom_";

/// A column the report can contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    Id,
    Name,
    Project,
    Assignee,
    DueOn,
    Completed,
    CreatedAt,
    ModifiedAt,
    Notes,
    Tags,
    /// Custom field by gid
    Custom(String),
}

/// Field names older settings files used for the same columns.
const FIELD_ALIASES: &[(&str, FieldId)] = &[("due_date", FieldId::DueOn), ("projects", FieldId::Project)];

/// Field names older settings files used for columns that no longer exist.
const LEGACY_FIELDS: &[&str] = &["parent", "subtasks", "dependencies", "custom_fields"];

/// Unknown selected-field name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field id '{0}'")]
pub struct UnknownField(pub String);

impl FieldId {
    /// All built-in fields in their canonical order.
    pub const BUILTIN: [FieldId; 10] = [
        FieldId::Id,
        FieldId::Name,
        FieldId::Project,
        FieldId::Assignee,
        FieldId::DueOn,
        FieldId::Completed,
        FieldId::CreatedAt,
        FieldId::ModifiedAt,
        FieldId::Notes,
        FieldId::Tags,
    ];

    /// Selection used when a fresh config is created.
    pub fn default_selection() -> Vec<FieldId> {
        vec![
            FieldId::Name,
            FieldId::Project,
            FieldId::Assignee,
            FieldId::Completed,
            FieldId::DueOn,
        ]
    }

    pub fn as_str(&self) -> String {
        match self {
            FieldId::Custom(gid) => format!("{}{}", CUSTOM_FIELD_PREFIX, gid),
            other => other.builtin_str().to_string(),
        }
    }

    fn builtin_str(&self) -> &'static str {
        match self {
            FieldId::Id => "id",
            FieldId::Name => "name",
            FieldId::Project => "project",
            FieldId::Assignee => "assignee",
            FieldId::DueOn => "due_on",
            FieldId::Completed => "completed",
            FieldId::CreatedAt => "created_at",
            FieldId::ModifiedAt => "modified_at",
            FieldId::Notes => "notes",
            FieldId::Tags => "tags",
            FieldId::Custom(_) => "custom",
        }
    }

    /// Header label for built-in fields. Custom fields are labelled from task data.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            FieldId::Id => Some("Task ID"),
            FieldId::Name => Some("Task Name"),
            FieldId::Project => Some("Project"),
            FieldId::Assignee => Some("Assignee"),
            FieldId::DueOn => Some("Due Date"),
            FieldId::Completed => Some("Completed"),
            FieldId::CreatedAt => Some("Created At"),
            FieldId::ModifiedAt => Some("Modified At"),
            FieldId::Notes => Some("Notes"),
            FieldId::Tags => Some("Tags"),
            FieldId::Custom(_) => None,
        }
    }

    /// Canonical field an old alias stands for, if `name` is an alias.
    pub fn alias_target(name: &str) -> Option<FieldId> {
        FIELD_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, field)| field.clone())
    }

    /// Whether `name` belongs to the retired vocabulary that is dropped on load.
    pub fn is_legacy(name: &str) -> bool {
        LEGACY_FIELDS.contains(&name)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl FromStr for FieldId {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(field) = FieldId::BUILTIN.iter().find(|f| f.builtin_str() == s) {
            return Ok(field.clone());
        }
        if let Some(field) = FieldId::alias_target(s) {
            return Ok(field);
        }
        if let Some(gid) = s.strip_prefix(CUSTOM_FIELD_PREFIX) {
            if !gid.is_empty() && gid.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Ok(FieldId::Custom(gid.to_string()));
            }
        }
        Err(UnknownField(s.to_string()))
    }
}

impl Serialize for FieldId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One cell of a report row.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    /// Multi-valued field; sorted and joined when rendered
    List(Vec<String>),
}

/// Report column: which field and the header it is shown under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub field: FieldId,
    pub label: String,
}

/// Flattened projection of one task, cells in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub task_id: String,
    pub cells: Vec<CellValue>,
}

/// Columns plus rows, the exporter's input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportTable {
    pub columns: Vec<Column>,
    pub rows: Vec<ReportRow>,
}

impl ReportTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_id_roundtrip_strings() {
        for field in FieldId::BUILTIN.iter() {
            let parsed: FieldId = field.as_str().parse().unwrap();
            assert_eq!(&parsed, field);
        }
        let custom: FieldId = "custom_12345".parse().unwrap();
        assert_eq!(custom, FieldId::Custom("12345".to_string()));
        assert_eq!(custom.to_string(), "custom_12345");
    }

    #[test]
    fn test_field_id_aliases() {
        assert_eq!("due_date".parse::<FieldId>().unwrap(), FieldId::DueOn);
        assert_eq!("projects".parse::<FieldId>().unwrap(), FieldId::Project);
    }

    #[test]
    fn test_field_id_rejects_unknown() {
        assert!("priority".parse::<FieldId>().is_err());
        assert!("custom_".parse::<FieldId>().is_err());
        assert!("custom_12-3".parse::<FieldId>().is_err());
        // Legacy names are recognized but are not fields
        assert!(FieldId::is_legacy("subtasks"));
        assert!("subtasks".parse::<FieldId>().is_err());
    }

    #[test]
    fn test_field_id_serde_as_string() {
        let fields = vec![FieldId::Name, FieldId::Custom("77".to_string())];
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"["name","custom_77"]"#);
        let back: Vec<FieldId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fields);
    }
}
