//! Sync module - pulls a consistent task set for a workspace.
//!
//! Flow:
//! 1. List the workspace's projects (failure here fails the run)
//! 2. Fetch each project's task pages on a bounded worker pool
//! 3. Merge in project-list order, dropping duplicate task ids
//! 4. Project the merged tasks into report rows

pub mod engine;
pub mod projection;

pub use engine::{SyncEngine, SyncOutcome};

use crate::error::FetchError;
use crate::models::ReportTable;
use chrono::{DateTime, Utc};

/// Where a run is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    FetchingProjects,
    FetchingTasks {
        done: usize,
        total: usize,
    },
    Normalizing,
    Done,
    Failed(FetchError),
    Cancelled,
}

impl SyncState {
    /// Whether the run has stopped, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Cancelled)
    }
}

/// A project that was left out of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectError {
    pub project_id: String,
    /// `None` when the project was not found in the workspace
    pub project_name: Option<String>,
    pub error: FetchError,
}

/// Progress and outcome of one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncReport {
    pub state: SyncState,
    pub projects_total: usize,
    pub projects_synced: usize,
    pub tasks_fetched: usize,
    pub duplicates_dropped: usize,
    /// Tasks left out by the creation date window
    pub tasks_filtered: usize,
    pub errors: Vec<ProjectError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Progress notifications sent while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    State(SyncState),
    ProjectFinished {
        project_id: String,
        tasks: usize,
    },
    ProjectFailed(ProjectError),
}

impl SyncOutcome {
    pub fn is_done(&self) -> bool {
        self.report.state == SyncState::Done
    }

    /// The table if the run completed, or the error that stopped it.
    pub fn into_table(self) -> Result<ReportTable, FetchError> {
        match self.report.state {
            SyncState::Done => Ok(self.table),
            SyncState::Failed(err) => Err(err),
            SyncState::Cancelled => Err(FetchError::Cancelled),
            other => Err(FetchError::Api(crate::error::ApiError::new(
                None,
                crate::error::ApiErrorCode::Unexpected,
                format!("sync stopped in state {:?}", other),
            ))),
        }
    }
}
