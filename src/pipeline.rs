//! End-to-end export: unlock the token, synchronize, write the report.
//!
//! Stages run strictly in order and the first failure stops the run with its
//! own error kind. Nothing is written to the output path unless the sync
//! reached `Done`.

use crate::client::{CancelToken, ServiceClient};
use crate::config::{Config, ConfigStore};
use crate::error::{Error, ExportError};
use crate::export::{ExportFormat, ReportExporter};
use crate::sync::{SyncEngine, SyncEvent, SyncReport};
use crate::vault::{ApiToken, CredentialVault};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::info;

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub output_path: PathBuf,
    pub format: ExportFormat,
    pub rows: usize,
    pub report: SyncReport,
}

/// Knobs the caller may set for one run.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// Overrides `Config::output_path`
    pub output_path: Option<PathBuf>,
    pub events: Option<Sender<SyncEvent>>,
    pub cancel: CancelToken,
}

/// Decrypt the stored token, re-sealing the vault first if it was written
/// with weaker KDF parameters than `vault` uses.
pub fn unlock(
    store: &ConfigStore,
    vault: &CredentialVault,
    passphrase: &str,
) -> Result<ApiToken, Error> {
    let credential = store.load_credential()?;
    let token = vault.load(&credential, passphrase)?;

    if vault.needs_upgrade(&credential) {
        info!(
            "Upgrading vault from {} x{} to {} x{}",
            credential.kdf.as_str(),
            credential.kdf_iterations,
            vault.kdf().as_str(),
            vault.iterations()
        );
        let upgraded = vault.upgrade(&credential, passphrase)?;
        store.save_credential(&upgraded)?;
    }

    Ok(token)
}

/// Load config and vault from `store`, then run [`run_with_client`] against
/// the live service.
pub fn export_workspace(
    store: &ConfigStore,
    passphrase: &str,
    options: RunOptions,
) -> Result<ExportSummary, Error> {
    let config = store.load()?;
    let token = unlock(store, &CredentialVault::new(), passphrase)?;

    let client = ServiceClient::from_config(&config, Arc::new(token), options.cancel.clone())?;
    run_with_client(client, config, &ReportExporter::new(), options)
}

/// Synchronize `config.workspace_id` through `client` and export the table.
pub fn run_with_client(
    client: ServiceClient,
    config: Config,
    exporter: &ReportExporter,
    options: RunOptions,
) -> Result<ExportSummary, Error> {
    let output_path = options
        .output_path
        .unwrap_or_else(|| config.output_path.clone());
    // Fail on a bad extension before spending time on the network.
    ExportFormat::from_path(&output_path).map_err(ExportError::from)?;

    let workspace_id = config.workspace_id.clone();
    let client = client.with_cancel_token(options.cancel);
    let mut engine = SyncEngine::new(client, Arc::new(config));
    if let Some(events) = options.events {
        engine = engine.with_events(events);
    }

    let outcome = engine.synchronize(&workspace_id);
    let report = outcome.report.clone();

    let table = outcome.into_table()?;
    let format = exporter.export(&table, &output_path)?;

    Ok(ExportSummary {
        output_path,
        format,
        rows: table.rows.len(),
        report,
    })
}
