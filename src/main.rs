//! taskport CLI - export project tasks to spreadsheet reports
//!
//! Usage:
//!   taskport set-token    - Encrypt and store the service API token
//!   taskport workspaces   - List workspaces visible to the token
//!   taskport init         - Write the config file
//!   taskport projects     - List projects of the configured workspace
//!   taskport fields       - Show selectable report columns
//!   taskport export       - Sync tasks and write the report

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use taskport::client::ReqwestTransport;
use taskport::config::default_api_base;
use taskport::export::suggested_file_name;
use taskport::pipeline::{self, RunOptions};
use taskport::{
    ApiToken, CancelToken, Config, ConfigStore, CredentialVault, FieldId, ServiceClient, SyncEvent,
    SyncState,
};
use zeroize::Zeroizing;

const PASSPHRASE_ENV: &str = "TASKPORT_PASSPHRASE";

/// taskport - Export project tasks to XLSX/CSV reports
#[derive(Parser)]
#[command(name = "taskport")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory (default: platform config dir + /taskport)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new config file
    Init {
        /// Workspace to export from
        #[arg(short, long)]
        workspace: String,

        /// Report path (.xlsx or .csv); a directory gets a generated file name
        #[arg(short, long)]
        output: PathBuf,

        /// Report columns, comma separated (see `taskport fields`)
        #[arg(short, long, value_delimiter = ',')]
        fields: Vec<FieldId>,

        /// Only export these projects (repeatable)
        #[arg(short, long = "project")]
        projects: Vec<String>,

        /// Only keep tasks created within this many days
        #[arg(long)]
        days: Option<u32>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Encrypt and store the API token
    SetToken {
        /// Store without checking the token against the service
        #[arg(long)]
        skip_verify: bool,
    },

    /// List workspaces visible to the stored token
    Workspaces,

    /// List projects of a workspace
    Projects {
        /// Workspace id (default: the configured workspace)
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Show selectable report columns
    Fields,

    /// Sync tasks and write the report
    Export {
        /// Report path, overriding the config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("taskport={}", log_level).parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let store = match cli.config_dir {
        Some(dir) => ConfigStore::new(dir),
        None => ConfigStore::default_location(),
    };

    match cli.command {
        Commands::Init {
            workspace,
            output,
            fields,
            projects,
            days,
            force,
        } => cmd_init(&store, workspace, output, fields, projects, days, force),
        Commands::SetToken { skip_verify } => cmd_set_token(&store, skip_verify),
        Commands::Workspaces => cmd_workspaces(&store),
        Commands::Projects { workspace } => cmd_projects(&store, workspace),
        Commands::Fields => cmd_fields(&store),
        Commands::Export { output } => cmd_export(&store, output),
    }
}

// ============ SECRETS ============

/// Passphrase from `TASKPORT_PASSPHRASE`, or prompted without echo.
fn read_passphrase(confirm: bool) -> Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(PASSPHRASE_ENV) {
        if !value.is_empty() {
            return Ok(Zeroizing::new(value));
        }
    }

    let passphrase = Zeroizing::new(
        rpassword::prompt_password("Vault passphrase: ").context("Cannot read passphrase")?,
    );
    if passphrase.is_empty() {
        bail!("Passphrase cannot be empty");
    }

    if confirm {
        let again = Zeroizing::new(
            rpassword::prompt_password("Repeat passphrase: ").context("Cannot read passphrase")?,
        );
        if *again != *passphrase {
            bail!("Passphrases do not match");
        }
    }

    Ok(passphrase)
}

fn unlock_token(store: &ConfigStore) -> Result<ApiToken> {
    if !store.vault_path().exists() {
        bail!(
            "No API token stored. Run {} first.",
            "taskport set-token".cyan()
        );
    }
    let passphrase = read_passphrase(false)?;
    let token = pipeline::unlock(store, &CredentialVault::new(), &passphrase)
        .context("Cannot unlock API token")?;
    Ok(token)
}

/// Client from the config file, or with default settings before `init`.
fn service_client(store: &ConfigStore, token: ApiToken) -> Result<ServiceClient> {
    let token = Arc::new(token);
    if store.exists() {
        let config = store.load()?;
        return Ok(ServiceClient::from_config(&config, token, CancelToken::new())?);
    }

    let transport = ReqwestTransport::new(Duration::from_secs(30))?;
    Ok(ServiceClient::new(Arc::new(transport), token).with_api_base(&default_api_base()))
}

// ============ INIT COMMAND ============

fn cmd_init(
    store: &ConfigStore,
    workspace: String,
    output: PathBuf,
    fields: Vec<FieldId>,
    projects: Vec<String>,
    days: Option<u32>,
    force: bool,
) -> Result<()> {
    if store.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            store.config_path().display()
        );
    }

    let mut config = Config::new(workspace, output);
    if !fields.is_empty() {
        config.selected_fields = fields;
    }
    config.project_ids = projects;
    config.created_within_days = days;

    store.save(&config).context("Cannot save config")?;

    println!(
        "{} Config written to {}",
        "✓".green(),
        store.config_path().display().to_string().dimmed()
    );
    Ok(())
}

// ============ SET-TOKEN COMMAND ============

fn cmd_set_token(store: &ConfigStore, skip_verify: bool) -> Result<()> {
    println!("{}", "Store API token".bold().cyan());

    let token = Zeroizing::new(
        rpassword::prompt_password("API token: ").context("Cannot read token")?,
    );
    let token = token.trim();
    if token.is_empty() {
        bail!("Token cannot be empty");
    }

    if !skip_verify {
        let client = service_client(store, ApiToken::new(token))?;
        let user = client.verify_token().context("Token check failed")?;
        println!("  {} Token belongs to {}", "✓".green(), user.bold());
    }

    let passphrase = read_passphrase(true)?;
    let credential = CredentialVault::new()
        .store(token, &passphrase)
        .context("Cannot encrypt token")?;
    store
        .save_credential(&credential)
        .context("Cannot save vault")?;

    println!(
        "  {} Token encrypted to {}",
        "✓".green(),
        store.vault_path().display().to_string().dimmed()
    );
    Ok(())
}

// ============ LIST COMMANDS ============

fn cmd_workspaces(store: &ConfigStore) -> Result<()> {
    let client = service_client(store, unlock_token(store)?)?;
    let workspaces = client.fetch_workspaces()?;

    if workspaces.is_empty() {
        println!("{}", "No workspaces visible to this token.".yellow());
        return Ok(());
    }

    for workspace in &workspaces {
        println!("  {}  {}", workspace.id.cyan(), workspace.name.bold());
    }
    Ok(())
}

fn cmd_projects(store: &ConfigStore, workspace: Option<String>) -> Result<()> {
    let workspace = match workspace {
        Some(id) => id,
        None if store.exists() => store.load()?.workspace_id,
        None => bail!("No workspace given and no config found. Pass --workspace."),
    };

    let client = service_client(store, unlock_token(store)?)?;
    let projects = client.fetch_projects(&workspace)?;

    println!(
        "{} {} project(s) in workspace {}:\n",
        "Found".green(),
        projects.len().to_string().green().bold(),
        workspace.cyan()
    );
    for project in &projects {
        println!("  {}  {}", project.id.cyan(), project.name.bold());
    }
    Ok(())
}

fn cmd_fields(store: &ConfigStore) -> Result<()> {
    let selected = if store.exists() {
        store.load()?.selected_fields
    } else {
        FieldId::default_selection()
    };

    for field in FieldId::BUILTIN.iter() {
        let mark = if selected.contains(field) {
            "✓".green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "  {} {:<12} {}",
            mark,
            field.as_str(),
            field.label().unwrap_or_default().dimmed()
        );
    }
    for field in selected.iter().filter(|f| matches!(f, FieldId::Custom(_))) {
        println!("  {} {}", "✓".green(), field.as_str());
    }
    println!(
        "\nCustom fields are selected as {}.",
        "custom_<field id>".cyan()
    );
    Ok(())
}

// ============ EXPORT COMMAND ============

fn cmd_export(store: &ConfigStore, output: Option<PathBuf>) -> Result<()> {
    println!("{}", "Exporting tasks".bold().cyan());

    let config = store.load().context("Cannot load config")?;
    let output = resolve_output(output.as_deref().unwrap_or(&config.output_path));
    let token = unlock_token(store)?;

    let cancel = CancelToken::new();
    let client = ServiceClient::from_config(&config, Arc::new(token), cancel.clone())?;

    let (tx, rx) = mpsc::channel();
    let progress = std::thread::spawn(move || show_progress(rx));

    let result = pipeline::run_with_client(
        client,
        config,
        &taskport::ReportExporter::new(),
        RunOptions {
            output_path: Some(output),
            events: Some(tx),
            cancel,
        },
    );
    // The sender is gone once the run returns, which ends the progress loop.
    let _ = progress.join();

    let summary = result?;
    for failure in &summary.report.errors {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failure
                .project_name
                .as_deref()
                .unwrap_or(&failure.project_id),
            failure.error
        );
    }
    if summary.report.duplicates_dropped > 0 {
        println!(
            "  {} duplicate task(s) merged",
            summary.report.duplicates_dropped
        );
    }
    if summary.report.tasks_filtered > 0 {
        println!(
            "  {} task(s) outside the date window",
            summary.report.tasks_filtered
        );
    }
    println!(
        "  {} {} tasks from {}/{} projects written to {}",
        "✓".green(),
        summary.rows.to_string().bold(),
        summary.report.projects_synced,
        summary.report.projects_total,
        summary.output_path.display().to_string().cyan()
    );
    Ok(())
}

/// A directory output gets a timestamped file name inside it.
fn resolve_output(path: &Path) -> PathBuf {
    if path.is_dir() {
        let now = chrono::Local::now().naive_local();
        path.join(suggested_file_name(None, now))
    } else {
        path.to_path_buf()
    }
}

fn show_progress(rx: mpsc::Receiver<SyncEvent>) {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Listing projects...");

    for event in rx {
        match event {
            SyncEvent::State(SyncState::FetchingTasks { done, total }) => {
                if pb.length() != Some(total as u64) {
                    pb.set_length(total as u64);
                    if let Ok(style) =
                        ProgressStyle::with_template("  [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    {
                        pb.set_style(style.progress_chars("█▓░"));
                    }
                }
                pb.set_position(done as u64);
                pb.set_message("projects");
            }
            SyncEvent::State(SyncState::Normalizing) => pb.set_message("building report..."),
            SyncEvent::State(_) => {}
            SyncEvent::ProjectFinished { project_id, tasks } => {
                pb.set_message(format!("{} ({} tasks)", project_id, tasks));
            }
            SyncEvent::ProjectFailed(failure) => {
                pb.set_message(format!("{} failed", failure.project_id));
            }
        }
    }

    pb.finish_and_clear();
}
