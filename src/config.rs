//! Config module - Manages taskport settings (config.toml) and the vault file.
//!
//! Configuration directory contains:
//! - `config.toml`: non-secret settings (workspace, output, fields, tuning)
//! - `vault.json`: the encrypted API token record
//!
//! Both files are written atomically with 0600 permissions on Unix.

use crate::client::RetryPolicy;
use crate::error::ConfigError;
use crate::fs_util::write_atomic;
use crate::models::{FieldId, CUSTOM_FIELD_PREFIX};
use crate::vault::Credential;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current config file format.
pub const CONFIG_VERSION: u32 = 1;

const CONFIG_FILE: &str = "config.toml";
const VAULT_FILE: &str = "vault.json";

/// Top-level keys from the older settings layout. Ignored on load.
const LEGACY_KEYS: &[&str] = &[
    "asana",
    "export",
    "ui",
    "access_token",
    "default_date_range",
    "selected_project_id",
    "selected_project_name",
    "window_size",
    "last_export_path",
    "output_directory",
];

/// Main taskport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Config format version
    pub version: u32,

    /// Workspace to export from
    pub workspace_id: String,

    /// Report destination; extension picks the format
    pub output_path: PathBuf,

    /// Report columns, in order
    pub selected_fields: Vec<FieldId>,

    /// Items requested per page (1..=100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Projects fetched in parallel (1..=16)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Service base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Restrict the export to these projects (empty = all projects)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_ids: Vec<String>,

    /// Only keep tasks created within this many days (1..=365)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_within_days: Option<u32>,
}

fn default_page_size() -> u32 {
    100
}

fn default_concurrency() -> usize {
    4
}

pub fn default_api_base() -> String {
    "https://app.asana.com/api/1.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Config with default tuning and the default column selection.
    pub fn new(workspace_id: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            version: CONFIG_VERSION,
            workspace_id: workspace_id.into(),
            output_path: output_path.into(),
            selected_fields: FieldId::default_selection(),
            page_size: default_page_size(),
            retry_policy: RetryPolicy::default(),
            concurrency: default_concurrency(),
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
            project_ids: Vec::new(),
            created_within_days: None,
        }
    }

    /// Check every invariant a saved config must hold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.version != CONFIG_VERSION {
            return invalid(format!(
                "version must be {}, got {}",
                CONFIG_VERSION, self.version
            ));
        }
        if self.workspace_id.trim().is_empty() {
            return invalid("workspace_id must not be empty".to_string());
        }
        if self.output_path.as_os_str().is_empty() {
            return invalid("output_path must not be empty".to_string());
        }
        if self.selected_fields.is_empty() {
            return invalid("selected_fields must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for field in &self.selected_fields {
            if let FieldId::Custom(gid) = field {
                if gid.is_empty() || !gid.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return invalid(format!(
                        "custom field id '{}{}' is not valid",
                        CUSTOM_FIELD_PREFIX, gid
                    ));
                }
            }
            if !seen.insert(field) {
                return invalid(format!("field '{}' is selected twice", field));
            }
        }

        if !(1..=100).contains(&self.page_size) {
            return invalid(format!("page_size must be 1..=100, got {}", self.page_size));
        }
        if !(1..=16).contains(&self.concurrency) {
            return invalid(format!(
                "concurrency must be 1..=16, got {}",
                self.concurrency
            ));
        }
        if self.retry_policy.max_attempts == 0 {
            return invalid("retry_policy.max_attempts must be at least 1".to_string());
        }
        if self.retry_policy.base_delay_ms > self.retry_policy.max_delay_ms {
            return invalid("retry_policy.base_delay_ms exceeds max_delay_ms".to_string());
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be positive".to_string());
        }
        if self.api_base.trim().is_empty() {
            return invalid("api_base must not be empty".to_string());
        }
        if let Some(days) = self.created_within_days {
            if !(1..=365).contains(&days) {
                return invalid(format!("created_within_days must be 1..=365, got {}", days));
            }
        }
        if self.project_ids.iter().any(|id| id.trim().is_empty()) {
            return invalid("project_ids must not contain empty ids".to_string());
        }

        Ok(())
    }
}

/// Reads and writes the files in one configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the platform config directory (~/.config/taskport/).
    pub fn default_location() -> Self {
        let dir = dirs::config_dir()
            .map(|d| d.join("taskport"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn vault_path(&self) -> PathBuf {
        self.dir.join(VAULT_FILE)
    }

    /// Whether a config file has been written.
    pub fn exists(&self) -> bool {
        self.config_path().exists()
    }

    /// Load and validate the config file.
    ///
    /// Never falls back to defaults: anything short of a complete, valid file
    /// is an error.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let path = self.config_path();
        let content = read_existing(&path)?;

        let malformed = |reason: String| ConfigError::Malformed {
            path: path.clone(),
            reason,
        };

        let mut value: toml::Value = toml::from_str(&content).map_err(|e| malformed(e.to_string()))?;
        let table = value
            .as_table_mut()
            .ok_or_else(|| malformed("top level is not a table".to_string()))?;

        strip_legacy_keys(table);

        match table.get("version").and_then(|v| v.as_integer()) {
            Some(v) if v > CONFIG_VERSION as i64 => {
                return Err(malformed(format!(
                    "version {} is newer than supported version {}",
                    v, CONFIG_VERSION
                )));
            }
            Some(v) if v < 1 => return Err(malformed(format!("invalid version {}", v))),
            Some(_) => {}
            None => return Err(malformed("missing or non-integer 'version'".to_string())),
        }

        if let Some(fields) = table.get_mut("selected_fields") {
            migrate_field_names(fields);
        }

        let config: Config = value.try_into().map_err(|e: toml::de::Error| malformed(e.to_string()))?;
        config.validate().map_err(|e| malformed(e.to_string()))?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Validate and atomically write the config file.
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        config.validate()?;

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialize config: {}", e)))?;

        let path = self.config_path();
        self.write_private(&path, content.as_bytes())?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Load the encrypted token record.
    pub fn load_credential(&self) -> Result<Credential, ConfigError> {
        let path = self.vault_path();
        let content = read_existing(&path)?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })
    }

    /// Atomically write the encrypted token record.
    pub fn save_credential(&self, credential: &Credential) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(credential)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialize vault: {}", e)))?;

        let path = self.vault_path();
        self.write_private(&path, content.as_bytes())?;

        debug!("Saved vault to {}", path.display());
        Ok(())
    }

    fn write_private(&self, path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
        let write_failed = |source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(write_failed)?;
        write_atomic(path, bytes, true).map_err(write_failed)
    }
}

fn read_existing(path: &Path) -> Result<String, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::Missing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ConfigError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

fn strip_legacy_keys(table: &mut toml::map::Map<String, toml::Value>) {
    for key in LEGACY_KEYS {
        if table.remove(*key).is_some() {
            warn!("Ignoring legacy config key '{}'", key);
        }
    }
}

/// Drop retired field names and rewrite aliases to their canonical form.
/// Unknown names are left for deserialization to reject.
fn migrate_field_names(fields: &mut toml::Value) {
    let Some(items) = fields.as_array_mut() else {
        return;
    };

    items.retain(|item| match item.as_str() {
        Some(name) if FieldId::is_legacy(name) => {
            warn!("Ignoring legacy field '{}'", name);
            false
        }
        _ => true,
    });

    for item in items.iter_mut() {
        let target = item.as_str().and_then(|name| {
            FieldId::alias_target(name).map(|field| (name.to_string(), field))
        });
        if let Some((alias, field)) = target {
            warn!("Field '{}' is deprecated, using '{}'", alias, field);
            *item = toml::Value::String(field.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> Config {
        let mut config = Config::new("1200000000000", "/tmp/report.xlsx");
        config.selected_fields.push(FieldId::Custom("98765".to_string()));
        config.project_ids = vec!["111".to_string(), "222".to_string()];
        config.created_within_days = Some(30);
        config
    }

    fn write_raw(store: &ConfigStore, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(store.dir())?;
        std::fs::write(store.config_path(), content)
    }

    #[test]
    fn test_save_and_load() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path().join("taskport"));

        assert!(!store.exists());
        let config = sample_config();
        store.save(&config)?;

        assert!(store.exists());
        assert_eq!(store.load()?, config);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_save_permissions() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path());

        store.save(&sample_config())?;

        let mode = std::fs::metadata(store.config_path())?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "Config file should have 0600 permissions");
        Ok(())
    }

    #[test]
    fn test_missing_file() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path());

        assert!(matches!(store.load(), Err(ConfigError::Missing { .. })));
        assert!(matches!(
            store.load_credential(),
            Err(ConfigError::Missing { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_partial_file_is_malformed() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path());

        write_raw(&store, "version = 1\nworkspace_id = \"123\"\n")?;
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));

        write_raw(&store, "this is = = not toml")?;
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));
        Ok(())
    }

    #[test]
    fn test_version_checks() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path());
        let body = "workspace_id = \"1\"\noutput_path = \"out.xlsx\"\nselected_fields = [\"name\"]\n";

        write_raw(&store, &format!("version = 2\n{}", body))?;
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));

        write_raw(&store, body)?;
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));

        write_raw(&store, &format!("version = 1\n{}", body))?;
        assert_eq!(store.load()?.selected_fields, vec![FieldId::Name]);
        Ok(())
    }

    #[test]
    fn test_unknown_keys_and_fields_rejected() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path());

        write_raw(
            &store,
            "version = 1\nworkspace_id = \"1\"\noutput_path = \"o.xlsx\"\nselected_fields = [\"name\"]\ncolour = \"blue\"\n",
        )?;
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));

        write_raw(
            &store,
            "version = 1\nworkspace_id = \"1\"\noutput_path = \"o.xlsx\"\nselected_fields = [\"name\", \"priority\"]\n",
        )?;
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));
        Ok(())
    }

    #[test]
    fn test_legacy_layout_is_migrated() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path());

        write_raw(
            &store,
            r#"
version = 1
workspace_id = "42"
output_path = "tasks.csv"
selected_fields = ["name", "due_date", "subtasks", "projects", "custom_fields"]
access_token = "should-be-ignored"

[asana]
selected_project_id = "7"

[ui]
window_size = "800x600"
"#,
        )?;

        let config = store.load()?;
        assert_eq!(
            config.selected_fields,
            vec![FieldId::Name, FieldId::DueOn, FieldId::Project]
        );
        assert_eq!(config.page_size, 100);
        assert_eq!(config.retry_policy, RetryPolicy::default());
        Ok(())
    }

    #[test]
    fn test_save_rejects_invalid() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path());

        let mut config = sample_config();
        config.page_size = 0;
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.selected_fields = vec![FieldId::Name, FieldId::Name];
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.selected_fields.clear();
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.selected_fields = vec![FieldId::Custom("12-3".to_string())];
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.concurrency = 17;
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.retry_policy.base_delay_ms = 60_000;
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.created_within_days = Some(400);
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        let mut config = sample_config();
        config.workspace_id = "  ".to_string();
        assert!(matches!(store.save(&config), Err(ConfigError::Invalid(_))));

        // Nothing was written by any of the rejected saves
        assert!(!store.exists());
        Ok(())
    }

    #[test]
    fn test_credential_roundtrip() -> anyhow::Result<()> {
        use crate::crypto::KdfAlgorithm;
        use crate::vault::CredentialVault;

        let temp_dir = TempDir::new()?;
        let store = ConfigStore::new(temp_dir.path().join("nested"));

        let vault = CredentialVault::with_params(KdfAlgorithm::Pbkdf2Sha256, 1_000);
        let credential = vault.store("token-value", "pw")?;
        store.save_credential(&credential)?;

        assert_ne!(store.vault_path(), store.config_path());
        let loaded = store.load_credential()?;
        assert_eq!(loaded, credential);
        assert_eq!(vault.load(&loaded, "pw")?.expose(), "token-value");

        std::fs::write(store.vault_path(), "{\"version\": 1}")?;
        assert!(matches!(
            store.load_credential(),
            Err(ConfigError::Malformed { .. })
        ));
        Ok(())
    }
}
