//! Service client - authenticated, paginated, retrying GET requests.
//!
//! Every request goes through one retry loop:
//! - 2xx: decode the JSON envelope
//! - 401: the token is rejected, never retried
//! - 429: wait `Retry-After` (or backoff) and retry
//! - 5xx, timeouts, connection failures: backoff and retry
//! - any other status: surfaced as `ApiError` immediately
//!
//! Waits are cancellable through the shared `CancelToken`.

pub mod payload;
pub mod retry;
pub mod transport;

pub use retry::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper};
pub use transport::{HttpResponse, ReqwestTransport, Transport, TransportError};

use crate::config::Config;
use crate::error::{ApiError, ApiErrorCode, AuthError, FetchError};
use crate::models::{Project, Task, Workspace};
use crate::vault::ApiToken;
use payload::{Envelope, RawRef, RawTask, RawUser, TASK_OPT_FIELDS};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Failure worth another attempt. Absorbed by the retry loop; surfaces only
/// as `ApiError` once attempts run out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
}

impl TransientError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn exhausted(self, attempts: u32) -> ApiError {
        match self {
            Self::RateLimited { .. } => ApiError::new(
                Some(429),
                ApiErrorCode::RateLimited,
                format!("still rate limited after {} attempts", attempts),
            ),
            Self::Server { status, message } => ApiError::new(
                Some(status),
                ApiErrorCode::RetriesExhausted,
                format!("{} (gave up after {} attempts)", message, attempts),
            ),
            Self::Transport(e) => ApiError::new(
                None,
                ApiErrorCode::RetriesExhausted,
                format!("{} (gave up after {} attempts)", e, attempts),
            ),
        }
    }
}

/// One page of tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// Cursor for the next page; `None` on the last page
    pub next_page_token: Option<String>,
}

/// Client for the remote task service.
#[derive(Clone)]
pub struct ServiceClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    token: Arc<ApiToken>,
    api_base: String,
    page_size: u32,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl ServiceClient {
    /// Client over an arbitrary transport with default settings.
    pub fn new(transport: Arc<dyn Transport>, token: Arc<ApiToken>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(ThreadSleeper),
            token,
            api_base: crate::config::default_api_base(),
            page_size: 100,
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Reqwest-backed client configured from `config`.
    pub fn from_config(
        config: &Config,
        token: Arc<ApiToken>,
        cancel: CancelToken,
    ) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs))
            .map_err(|e| ApiError::new(None, ApiErrorCode::Unexpected, e.to_string()))?;

        Ok(Self::new(Arc::new(transport), token)
            .with_api_base(&config.api_base)
            .with_page_size(config.page_size)
            .with_retry_policy(config.retry_policy)
            .with_cancel_token(cancel))
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 100);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Check the token by asking who it belongs to.
    pub fn verify_token(&self) -> Result<String, FetchError> {
        let envelope: Envelope<RawUser> = self.get("users/me", &[])?;
        let user = envelope.data;
        Ok(user
            .name
            .or(user.email)
            .unwrap_or_else(|| "unknown user".to_string()))
    }

    /// All workspaces visible to the token.
    pub fn fetch_workspaces(&self) -> Result<Vec<Workspace>, FetchError> {
        let refs = self.fetch_all("workspaces", Vec::new())?;
        Ok(refs.into_iter().filter_map(RawRef::into_workspace).collect())
    }

    /// All projects of a workspace, following cursors to the end.
    pub fn fetch_projects(&self, workspace_id: &str) -> Result<Vec<Project>, FetchError> {
        let refs = self.fetch_all(
            "projects",
            vec![
                ("workspace", workspace_id.to_string()),
                ("opt_fields", "name".to_string()),
            ],
        )?;
        let projects: Vec<Project> = refs.into_iter().filter_map(RawRef::into_project).collect();

        debug!(
            "Workspace {} has {} projects",
            workspace_id,
            projects.len()
        );
        Ok(projects)
    }

    /// One page of a project's tasks, starting at `page_token` (or the beginning).
    pub fn fetch_tasks(
        &self,
        project_id: &str,
        page_token: Option<&str>,
    ) -> Result<TaskPage, FetchError> {
        let mut query = vec![
            ("limit", self.page_size.to_string()),
            ("opt_fields", TASK_OPT_FIELDS.to_string()),
        ];
        if let Some(offset) = page_token {
            query.push(("offset", offset.to_string()));
        }

        let path = format!("projects/{}/tasks", project_id);
        let envelope: Envelope<Vec<RawTask>> = self.get(&path, &query)?;
        let next_page_token = envelope.next_offset();
        let tasks = envelope
            .data
            .into_iter()
            .filter_map(|raw| raw.into_task(project_id))
            .collect();

        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }

    /// Lazy iterator over a project's task pages, in cursor order.
    ///
    /// Each call starts again from the first page.
    pub fn task_pages<'a>(&'a self, project_id: &'a str) -> TaskPages<'a> {
        TaskPages {
            client: self,
            project_id,
            next: Some(None),
        }
    }

    fn fetch_all(
        &self,
        path: &str,
        base_query: Vec<(&str, String)>,
    ) -> Result<Vec<RawRef>, FetchError> {
        let mut items = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = base_query.clone();
            query.push(("limit", self.page_size.to_string()));
            if let Some(ref o) = offset {
                query.push(("offset", o.clone()));
            }

            let envelope: Envelope<Vec<RawRef>> = self.get(path, &query)?;
            offset = envelope.next_offset();
            items.extend(envelope.data);

            if offset.is_none() {
                return Ok(items);
            }
        }
    }

    /// GET `path` and decode the body, retrying transient failures.
    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}/{}", self.api_base, path);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            attempt += 1;

            let failure = match self.transport.get(&url, query, &self.token) {
                Ok(response) => match classify(response) {
                    Ok(body) => {
                        return serde_json::from_str(&body).map_err(|e| {
                            ApiError::malformed(format!("cannot decode {} response: {}", path, e))
                                .into()
                        });
                    }
                    Err(Classified::Fatal(err)) => return Err(err),
                    Err(Classified::Transient(t)) => t,
                },
                Err(e) => TransientError::Transport(e),
            };

            if attempt >= max_attempts {
                warn!("GET {} failed after {} attempts: {}", path, attempt, failure);
                return Err(failure.exhausted(attempt).into());
            }

            let delay = failure
                .retry_after()
                .unwrap_or_else(|| self.retry.backoff_delay(attempt));
            warn!(
                "GET {} failed ({}), retrying in {:?} (attempt {}/{})",
                path, failure, delay, attempt, max_attempts
            );
            self.sleeper.sleep(delay, &self.cancel)?;
        }
    }
}

enum Classified {
    Fatal(FetchError),
    Transient(TransientError),
}

/// Success body, or what kind of failure the status represents.
fn classify(response: HttpResponse) -> Result<String, Classified> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(response.body);
    }

    let message = payload::error_message(&response.body)
        .unwrap_or_else(|| format!("HTTP {}", status));

    Err(match status {
        401 => Classified::Fatal(AuthError::TokenRejected.into()),
        429 => Classified::Transient(TransientError::RateLimited {
            retry_after: response.retry_after,
        }),
        500..=599 => Classified::Transient(TransientError::Server { status, message }),
        _ => Classified::Fatal(ApiError::from_status(status, message).into()),
    })
}

/// Iterator returned by `ServiceClient::task_pages`.
///
/// Yields `Err` at most once, then ends.
pub struct TaskPages<'a> {
    client: &'a ServiceClient,
    project_id: &'a str,
    /// `Some(cursor)` while pages remain; `Some(None)` is the first page
    next: Option<Option<String>>,
}

impl Iterator for TaskPages<'_> {
    type Item = Result<Vec<Task>, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.next.take()?;

        match self.client.fetch_tasks(self.project_id, cursor.as_deref()) {
            Ok(page) => {
                self.next = page.next_page_token.map(Some);
                Some(Ok(page.tasks))
            }
            Err(e) => Some(Err(e)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    fn setup() -> (Arc<ScriptedTransport>, Arc<RecordingSleeper>, ServiceClient) {
        let transport = ScriptedTransport::new();
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client(transport.clone(), sleeper.clone());
        (transport, sleeper, client)
    }

    #[test]
    fn test_fetch_projects_follows_cursors() -> anyhow::Result<()> {
        let (transport, _, client) = setup();
        transport.ok(
            "projects",
            json!({"data": [{"gid": "1", "name": "Alpha"}], "next_page": {"offset": "c1"}}),
        );
        transport.ok(
            "projects",
            json!({"data": [{"gid": "2", "name": "Beta"}, {"name": "no id"}], "next_page": null}),
        );

        let projects = client.fetch_projects("ws")?;
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);

        let requests = transport.requests_to("projects");
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains(&("workspace".to_string(), "ws".to_string())));
        assert!(!requests[0].iter().any(|(k, _)| k == "offset"));
        assert!(requests[1].contains(&("offset".to_string(), "c1".to_string())));
        Ok(())
    }

    #[test]
    fn test_task_pages_in_order_and_restartable() -> anyhow::Result<()> {
        let (transport, _, client) = setup();
        for _ in 0..2 {
            transport.ok(
                "projects/p1/tasks",
                page(vec![task_json("1", "a"), task_json("2", "b")], Some("next")),
            );
            transport.ok("projects/p1/tasks", page(vec![task_json("3", "c")], None));
        }

        let pages: Vec<Vec<Task>> = client.task_pages("p1").collect::<Result<_, _>>()?;
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 2);
        assert_eq!(pages[1][0].id, "3");

        // A second iterator starts from the first page again
        let again: Vec<Vec<Task>> = client.task_pages("p1").collect::<Result<_, _>>()?;
        assert_eq!(again, pages);
        assert!(!transport.requests_to("projects/p1/tasks")[2]
            .iter()
            .any(|(k, _)| k == "offset"));
        Ok(())
    }

    #[test]
    fn test_rate_limit_honours_retry_after() -> anyhow::Result<()> {
        let (transport, sleeper, client) = setup();
        transport.push(
            "workspaces",
            Ok(HttpResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(2)),
                body: String::new(),
            }),
        );
        transport.ok("workspaces", json!({"data": [{"gid": "w", "name": "Main"}]}));

        let workspaces = client.fetch_workspaces()?;
        assert_eq!(workspaces.len(), 1);
        assert_eq!(*sleeper.waits.lock().unwrap(), vec![Duration::from_secs(2)]);
        Ok(())
    }

    #[test]
    fn test_server_errors_retry_with_backoff() -> anyhow::Result<()> {
        let (transport, sleeper, client) = setup();
        transport.status("workspaces", 503, "");
        transport.push("workspaces", Err(TransportError::Timeout));
        transport.ok("workspaces", json!({"data": []}));

        assert!(client.fetch_workspaces()?.is_empty());

        let waits = sleeper.waits.lock().unwrap().clone();
        assert_eq!(waits.len(), 2);
        assert!(waits[0] >= Duration::from_millis(800) && waits[0] <= Duration::from_millis(1_200));
        assert!(waits[1] >= Duration::from_millis(1_600) && waits[1] <= Duration::from_millis(2_400));
        Ok(())
    }

    #[test]
    fn test_retries_exhausted() {
        let (transport, sleeper, client) = setup();
        for _ in 0..3 {
            transport.status("workspaces", 500, r#"{"errors":[{"message":"Server Error"}]}"#);
        }

        let err = client.fetch_workspaces().unwrap_err();
        match err {
            FetchError::Api(api) => {
                assert_eq!(api.code, ApiErrorCode::RetriesExhausted);
                assert_eq!(api.status, Some(500));
                assert!(api.message.contains("Server Error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sleeper.waits.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_rate_limit_exhausted() {
        let (transport, _, client) = setup();
        for _ in 0..3 {
            transport.status("workspaces", 429, "");
        }

        match client.fetch_workspaces().unwrap_err() {
            FetchError::Api(api) => {
                assert_eq!(api.code, ApiErrorCode::RateLimited);
                assert_eq!(api.status, Some(429));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unauthorized_is_auth_error() {
        let (transport, sleeper, client) = setup();
        transport.status("users/me", 401, r#"{"errors":[{"message":"Not Authorized"}]}"#);

        assert_eq!(
            client.verify_token().unwrap_err(),
            FetchError::Auth(AuthError::TokenRejected)
        );
        assert!(sleeper.waits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_client_errors_not_retried() {
        let (transport, sleeper, client) = setup();
        transport.status(
            "projects/nope/tasks",
            404,
            r#"{"errors":[{"message":"project: Not a recognized ID: nope"}]}"#,
        );
        transport.status("projects/bad/tasks", 400, "{}");

        match client.fetch_tasks("nope", None).unwrap_err() {
            FetchError::Api(api) => {
                assert_eq!(api.code, ApiErrorCode::NotFound);
                assert_eq!(api.status, Some(404));
                assert_eq!(api.message, "project: Not a recognized ID: nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match client.fetch_tasks("bad", None).unwrap_err() {
            FetchError::Api(api) => {
                assert_eq!(api.code, ApiErrorCode::BadRequest);
                assert_eq!(api.message, "HTTP 400");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests_to("projects/nope/tasks").len(), 1);
        assert!(sleeper.waits.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_body() {
        let (transport, _, client) = setup();
        transport.status("workspaces", 200, "not json");

        match client.fetch_workspaces().unwrap_err() {
            FetchError::Api(api) => assert_eq!(api.code, ApiErrorCode::MalformedResponse),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_before_request() {
        let (transport, _, client) = setup();
        client.cancel_token().cancel();

        assert_eq!(client.fetch_workspaces().unwrap_err(), FetchError::Cancelled);
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    /// Cancels the run while "waiting", as a user would mid-backoff.
    struct CancellingSleeper;

    impl Sleeper for CancellingSleeper {
        fn sleep(&self, _duration: Duration, cancel: &CancelToken) -> Result<(), FetchError> {
            cancel.cancel();
            Err(FetchError::Cancelled)
        }
    }

    #[test]
    fn test_cancel_during_backoff() {
        let (transport, _, client) = setup();
        transport.status("workspaces", 503, "");
        transport.status("workspaces", 503, "");

        let client = client.with_sleeper(Arc::new(CancellingSleeper));

        assert_eq!(client.fetch_workspaces().unwrap_err(), FetchError::Cancelled);
        assert!(client.cancel_token().is_cancelled());
        // No request is issued after the cancelled wait
        assert_eq!(transport.requests_to("workspaces").len(), 1);
    }

    #[test]
    fn test_verify_token() -> anyhow::Result<()> {
        let (transport, _, client) = setup();
        transport.ok("users/me", json!({"data": {"gid": "1", "name": "Linh", "email": "l@x.io"}}));

        assert_eq!(client.verify_token()?, "Linh");
        Ok(())
    }
}
