//! taskport core library
//!
//! Exports tasks from a project-management REST service into spreadsheet
//! reports:
//! - Keeps the service API token encrypted at rest behind a passphrase
//! - Fetches projects and tasks with pagination, retry and rate-limit handling
//! - Maps tasks into report rows and writes XLSX or CSV files
//!
//! Pipeline: Unlock (vault) -> Sync (client + engine) -> Export (xlsx/csv)

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod fs_util;
pub mod models;
pub mod pipeline;
pub mod sync;
pub mod vault;

// Re-export main types
pub use client::{CancelToken, ServiceClient};
pub use config::{Config, ConfigStore};
pub use error::{ApiError, ApiErrorCode, AuthError, ConfigError, Error, ExportError, FormatError};
pub use export::{ExportFormat, ReportExporter};
pub use models::{CellValue, FieldId, ReportTable, Task};
pub use sync::{SyncEngine, SyncEvent, SyncReport, SyncState};
pub use vault::{ApiToken, Credential, CredentialVault};
