//! Sync engine - drives the client over every project of a workspace.

use super::projection::build_table;
use super::{ProjectError, SyncEvent, SyncReport, SyncState};
use crate::client::{CancelToken, ServiceClient};
use crate::config::Config;
use crate::error::{ApiError, ApiErrorCode, FetchError};
use crate::models::{Project, ReportTable, Task};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// What a finished run hands to the exporter.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Empty unless the run reached `Done`
    pub table: ReportTable,
    pub report: SyncReport,
}

/// Tasks keyed by id, in first-seen order. A repeated id replaces the earlier
/// task in place.
#[derive(Debug, Default)]
struct TaskSet {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskSet {
    /// Returns `true` if `task` replaced one with the same id.
    fn insert(&mut self, task: Task) -> bool {
        match self.index.get(&task.id) {
            Some(&pos) => {
                self.tasks[pos] = task;
                true
            }
            None => {
                self.index.insert(task.id.clone(), self.tasks.len());
                self.tasks.push(task);
                false
            }
        }
    }
}

/// One project's fetched tasks.
struct ProjectTasks {
    tasks: Vec<Task>,
    fetched: usize,
    duplicates: usize,
}

pub struct SyncEngine {
    client: ServiceClient,
    config: Arc<Config>,
    events: Option<Sender<SyncEvent>>,
    report: Mutex<SyncReport>,
    reference_time: Option<DateTime<Utc>>,
}

impl SyncEngine {
    pub fn new(client: ServiceClient, config: Arc<Config>) -> Self {
        Self {
            client,
            config,
            events: None,
            report: Mutex::new(SyncReport::default()),
            reference_time: None,
        }
    }

    /// Send progress events to `events`. A dropped receiver is ignored.
    pub fn with_events(mut self, events: Sender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Fix "now" for the creation date window instead of reading the clock.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.client.cancel_token()
    }

    /// Current progress, safe to poll from another thread.
    pub fn snapshot(&self) -> SyncReport {
        self.lock_report().clone()
    }

    /// Fetch, deduplicate and project every task of `workspace_id`.
    ///
    /// Per-project API failures are recorded in the report and the run goes on.
    /// A failed project listing or a rejected token fails the whole run.
    pub fn synchronize(&self, workspace_id: &str) -> SyncOutcome {
        *self.lock_report() = SyncReport {
            started_at: Some(Utc::now()),
            ..SyncReport::default()
        };
        info!("Synchronizing workspace {}", workspace_id);

        self.set_state(SyncState::FetchingProjects);
        let listed = match self.client.fetch_projects(workspace_id) {
            Ok(projects) => projects,
            Err(e) => return self.stop(e),
        };

        let projects = self.select_projects(workspace_id, &listed);
        let total = projects.len();
        self.lock_report().projects_total = total;
        self.set_state(SyncState::FetchingTasks { done: 0, total });

        let results = self.fetch_projects_tasks(&projects);

        let mut merged = TaskSet::default();
        let mut cancelled = false;
        for (project, result) in projects.iter().zip(results) {
            match result {
                Ok(fetched) => {
                    let mut duplicates = fetched.duplicates;
                    for task in fetched.tasks {
                        if merged.insert(task) {
                            duplicates += 1;
                        }
                    }
                    let mut report = self.lock_report();
                    report.projects_synced += 1;
                    report.tasks_fetched += fetched.fetched;
                    report.duplicates_dropped += duplicates;
                }
                Err(FetchError::Cancelled) => cancelled = true,
                Err(err @ FetchError::Auth(_)) => return self.stop(err),
                Err(err @ FetchError::Api(_)) => {
                    warn!("Skipping project {} ({}): {}", project.name, project.id, err);
                    self.record_error(ProjectError {
                        project_id: project.id.clone(),
                        project_name: Some(project.name.clone()),
                        error: err,
                    });
                }
            }
        }

        if cancelled || self.cancel_token().is_cancelled() {
            return self.stop(FetchError::Cancelled);
        }

        self.set_state(SyncState::Normalizing);
        let mut tasks = merged.tasks;
        self.apply_date_window(&mut tasks);

        let project_names: HashMap<String, String> = listed
            .iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect();
        let table = build_table(&self.config.selected_fields, &tasks, &project_names);

        self.set_state(SyncState::Done);
        let report = self.finish();
        info!(
            "Synchronized {} tasks from {}/{} projects ({} duplicates dropped, {} errors)",
            table.rows.len(),
            report.projects_synced,
            report.projects_total,
            report.duplicates_dropped,
            report.errors.len()
        );

        SyncOutcome { table, report }
    }

    /// Projects to fetch, in configured order when a filter is set.
    fn select_projects(&self, workspace_id: &str, listed: &[Project]) -> Vec<Project> {
        if self.config.project_ids.is_empty() {
            return listed.to_vec();
        }

        let mut selected: Vec<Project> = Vec::new();
        for id in &self.config.project_ids {
            match listed.iter().find(|p| &p.id == id) {
                Some(project) => {
                    if !selected.iter().any(|p| p.id == project.id) {
                        selected.push(project.clone());
                    }
                }
                None => {
                    warn!("Project {} is not in workspace {}", id, workspace_id);
                    self.record_error(ProjectError {
                        project_id: id.clone(),
                        project_name: None,
                        error: FetchError::Api(ApiError::new(
                            None,
                            ApiErrorCode::NotFound,
                            format!("project {} not found in workspace {}", id, workspace_id),
                        )),
                    });
                }
            }
        }
        selected
    }

    /// Results in the same order as `projects`, whatever order workers finish in.
    fn fetch_projects_tasks(&self, projects: &[Project]) -> Vec<Result<ProjectTasks, FetchError>> {
        let num_threads = self.config.concurrency.min(projects.len()).max(1);

        match rayon::ThreadPoolBuilder::new().num_threads(num_threads).build() {
            Ok(pool) => pool.install(|| {
                projects
                    .par_iter()
                    .map(|project| self.fetch_project(project))
                    .collect()
            }),
            Err(e) => {
                warn!("Cannot build worker pool ({}), fetching sequentially", e);
                projects
                    .iter()
                    .map(|project| self.fetch_project(project))
                    .collect()
            }
        }
    }

    /// Fetch one project and count it as done, whatever the result.
    ///
    /// A rejected token cancels the run so other workers stop sending requests.
    fn fetch_project(&self, project: &Project) -> Result<ProjectTasks, FetchError> {
        let result = self.fetch_project_pages(project);

        if let Err(FetchError::Auth(e)) = &result {
            warn!("{} while fetching project {}, stopping all requests", e, project.id);
            self.cancel_token().cancel();
        }

        let state = {
            let mut report = self.lock_report();
            if let SyncState::FetchingTasks { done, .. } = &mut report.state {
                *done += 1;
            }
            report.state.clone()
        };
        if let Ok(fetched) = &result {
            self.emit(SyncEvent::ProjectFinished {
                project_id: project.id.clone(),
                tasks: fetched.tasks.len(),
            });
        }
        self.emit(SyncEvent::State(state));

        result
    }

    fn fetch_project_pages(&self, project: &Project) -> Result<ProjectTasks, FetchError> {
        debug!("Fetching tasks of project {} ({})", project.name, project.id);

        let mut set = TaskSet::default();
        let mut fetched = 0;
        let mut duplicates = 0;
        for page in self.client.task_pages(&project.id) {
            for task in page? {
                fetched += 1;
                if set.insert(task) {
                    duplicates += 1;
                }
            }
        }

        Ok(ProjectTasks {
            tasks: set.tasks,
            fetched,
            duplicates,
        })
    }

    fn apply_date_window(&self, tasks: &mut Vec<Task>) {
        let Some(days) = self.config.created_within_days else {
            return;
        };

        let now = self.reference_time.unwrap_or_else(Utc::now);
        let cutoff = now - chrono::Duration::days(i64::from(days));
        let before = tasks.len();
        tasks.retain(|t| t.created_at.is_some_and(|created| created >= cutoff));

        let filtered = before - tasks.len();
        if filtered > 0 {
            debug!("{} tasks created before {} left out", filtered, cutoff);
        }
        self.lock_report().tasks_filtered = filtered;
    }

    fn record_error(&self, error: ProjectError) {
        self.lock_report().errors.push(error.clone());
        self.emit(SyncEvent::ProjectFailed(error));
    }

    /// End the run in `Cancelled` or `Failed`, with no rows.
    fn stop(&self, err: FetchError) -> SyncOutcome {
        let state = match err {
            FetchError::Cancelled => {
                info!("Synchronization cancelled");
                SyncState::Cancelled
            }
            other => {
                warn!("Synchronization failed: {}", other);
                SyncState::Failed(other)
            }
        };
        self.set_state(state);

        SyncOutcome {
            table: ReportTable::default(),
            report: self.finish(),
        }
    }

    fn finish(&self) -> SyncReport {
        let mut report = self.lock_report();
        report.finished_at = Some(Utc::now());
        report.clone()
    }

    fn set_state(&self, state: SyncState) {
        debug!("Sync state: {:?}", state);
        self.lock_report().state = state.clone();
        self.emit(SyncEvent::State(state));
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn lock_report(&self) -> MutexGuard<'_, SyncReport> {
        self.report.lock().unwrap_or_else(|e| e.into_inner())
    }
}
