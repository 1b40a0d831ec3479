use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Form, Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::cookies;
use super::stream::{self, PlainTextError};
use crate::config::PployConfig;
use crate::deploy::Deployer;
use crate::deploy_log::{DeployLogs, LogReader};
use crate::errors::PployError;
use crate::git::{self, Commit};
use crate::locks::LockTable;
use crate::notify::NotifierSet;
use crate::project::{Project, ProjectResolver};
use crate::runner::ProcessRunner;
use crate::users::UserDirectory;
use crate::workdir::Workdir;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: PployConfig,
    pub workdir: Workdir,
    pub locks: Arc<LockTable>,
    pub projects: ProjectResolver,
    pub deployer: Deployer,
    pub users: UserDirectory,
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: PployConfig, workdir: Workdir) -> Self {
        let notifier = NotifierSet::from_config(&config);
        let locks = Arc::new(LockTable::new(
            config.locks.duration.as_duration(),
            notifier.clone(),
        ));
        let projects = ProjectResolver::new(workdir.clone(), Arc::clone(&locks));
        let deployer = Deployer::new(
            ProcessRunner::new(config.runner.max_concurrent),
            DeployLogs::new(workdir.clone(), config.logs.max_generations, config.logs.head_bytes),
            notifier,
        );
        let users = UserDirectory::from_config(&config.users);
        Self {
            config,
            workdir,
            locks,
            projects,
            deployer,
            users,
            started_at: Instant::now(),
        }
    }

    pub fn path_prefix(&self) -> &str {
        &self.config.server.path_prefix
    }

    fn project_url(&self, name: &str) -> String {
        format!("{}{}", self.path_prefix(), name)
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LockForm {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub operation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOperation {
    Gain,
    Release,
    Extend,
}

impl FromStr for LockOperation {
    type Err = PployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gain" => Ok(LockOperation::Gain),
            "release" => Ok(LockOperation::Release),
            "extend" => Ok(LockOperation::Extend),
            "" => Err(PployError::Validation("operation is required".to_string())),
            other => Err(PployError::Validation(format!(
                "unknown lock operation '{}', expected gain, release or extend",
                other
            ))),
        }
    }
}

#[derive(Deserialize)]
pub struct CheckoutForm {
    #[serde(default, rename = "ref")]
    pub reference: String,
}

#[derive(Deserialize)]
pub struct DeployForm {
    #[serde(default)]
    pub target: String,
}

#[derive(Deserialize)]
pub struct CreateForm {
    #[serde(default)]
    pub url: String,
}

#[derive(Deserialize, Default)]
pub struct LogsQuery {
    pub full: Option<String>,
    pub generation: Option<usize>,
}

// ── Response types ────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub message: String,
    pub all_projects: Vec<Project>,
    pub current_project: Option<Project>,
    pub all_users: Vec<String>,
    pub current_user: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub uptime_secs: u64,
    pub running_processes: usize,
    pub max_concurrent: usize,
    pub active_locks: usize,
    pub projects: usize,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(self) -> String {
        match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl From<PployError> for ApiError {
    fn from(err: PployError) -> Self {
        let message = format!("{:#}", err);
        match err {
            PployError::ProjectNotFound { .. } => ApiError::NotFound(message),
            PployError::Validation(_) => ApiError::BadRequest(message),
            PployError::Conflict { .. } | PployError::NotHeld { .. } => ApiError::Conflict(message),
            PployError::Busy { .. } => ApiError::Unavailable(message),
            PployError::Spawn { .. } | PployError::Io { .. } | PployError::Other(_) => {
                tracing::error!("request failed: {}", message);
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({"error": self.message()}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// Routes under `prefix`, which starts and ends with `/`.
pub fn api_router(prefix: &str) -> Router<SharedState> {
    let at = |path: &str| format!("{}{}", prefix, path);
    Router::new()
        .route(&at("health"), get(health_check))
        .route(&at("api/status/"), get(status_all))
        .route(&at("api/status/{project}"), get(status_project))
        .route(&at("api/commits/{project}"), get(commits))
        .route(&at("api/_stats"), get(stats))
        .route(&at("_create"), post(create_project))
        .route(&at("{project}/lock"), post(lock))
        .route(&at("{project}/logs"), get(logs))
        .route(&at("{project}/checkout"), post(checkout))
        .route(&at("{project}/deploy"), post(deploy))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// `302 Found`, optionally setting a cookie on the way.
fn redirect(location: &str, cookie: Option<HeaderValue>) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(_) => {
            tracing::warn!(location, "redirect target is not a valid header value");
            response
                .headers_mut()
                .insert(header::LOCATION, HeaderValue::from_static("/"));
        }
    }
    if let Some(cookie) = cookie {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

fn redirect_with_flash(location: &str, message: &str) -> Response {
    redirect(location, Some(cookies::flash_cookie(message)))
}

async fn status_response(state: &AppState, headers: &HeaderMap, project: Option<&str>) -> Response {
    let flash = cookies::read(headers, cookies::FLASH_COOKIE);
    let had_flash = flash.is_some();

    let current_project = match project {
        Some(name) => state.projects.full(name).await.ok(),
        None => None,
    };
    let (all_projects, message) = match state.projects.list() {
        Ok(projects) => (projects, flash.unwrap_or_default()),
        Err(e) => (Vec::new(), e.to_string()),
    };

    let status = Status {
        message,
        all_projects,
        current_project,
        all_users: state.users.all().await,
        current_user: cookies::current_user(headers),
    };
    let mut response = Json(status).into_response();
    if had_flash {
        response
            .headers_mut()
            .append(header::SET_COOKIE, cookies::clear_flash_cookie());
    }
    response
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn status_all(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    status_response(&state, &headers, None).await
}

async fn status_project(
    State(state): State<SharedState>,
    Path(project): Path<String>,
    headers: HeaderMap,
) -> Response {
    status_response(&state, &headers, Some(&project)).await
}

async fn commits(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<Json<Vec<Commit>>, ApiError> {
    let dir = state.projects.resolve(&project)?;
    let limit = state.config.git.recent_commits;
    let commits = tokio::task::spawn_blocking(move || git::recent_commits(&dir, limit))
        .await
        .map_err(|e| ApiError::Internal(format!("commit listing panicked: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(commits))
}

async fn stats(State(state): State<SharedState>) -> Result<Json<Stats>, ApiError> {
    let runner = state.deployer.runner();
    let projects = state
        .workdir
        .project_names()
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?
        .len();
    Ok(Json(Stats {
        uptime_secs: state.started_at.elapsed().as_secs(),
        running_processes: runner.running(),
        max_concurrent: runner.max_concurrent(),
        active_locks: state.locks.active_count(Utc::now()),
        projects,
    }))
}

async fn create_project(State(state): State<SharedState>, Form(form): Form<CreateForm>) -> Response {
    match state
        .projects
        .clone_repo(&form.url, state.config.git.clone_depth)
        .await
    {
        Ok(project) => redirect(&state.project_url(&project.name), None),
        Err(e) => {
            tracing::warn!(url = %form.url, "clone failed: {}", e);
            redirect_with_flash(state.path_prefix(), &e.to_string())
        }
    }
}

async fn lock(
    State(state): State<SharedState>,
    Path(project): Path<String>,
    Form(form): Form<LockForm>,
) -> Response {
    if let Err(e) = state.projects.resolve(&project) {
        return redirect_with_flash(state.path_prefix(), &e.to_string());
    }
    let back = state.project_url(&project);

    let user = form.user.trim();
    if user.is_empty() {
        return redirect_with_flash(&back, "user is required");
    }
    let operation = match form.operation.parse::<LockOperation>() {
        Ok(operation) => operation,
        Err(e) => return redirect_with_flash(&back, &e.to_string()),
    };

    let now = Utc::now();
    let result = match operation {
        LockOperation::Gain => state.locks.gain(&project, user, now).map(|_| ()),
        LockOperation::Extend => state.locks.extend(&project, user, now).map(|_| ()),
        LockOperation::Release => state.locks.release(&project, user, now),
    };
    match result {
        Ok(()) => redirect(&back, Some(cookies::user_cookie(user))),
        Err(e) => redirect_with_flash(&back, &e.to_string()),
    }
}

async fn logs(
    State(state): State<SharedState>,
    Path(project): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, PlainTextError> {
    state.projects.resolve(&project)?;
    let full = query.full.as_deref() == Some("1");
    let generation = query.generation.unwrap_or(0);

    let body = match state.deployer.logs().open(&project, generation, full).await? {
        None => Body::empty(),
        Some(LogReader::Full(file)) => Body::from_stream(ReaderStream::new(file)),
        Some(LogReader::Head(head)) => Body::from_stream(ReaderStream::new(head)),
    };
    Ok(stream::text_response(body))
}

async fn checkout(
    State(state): State<SharedState>,
    Path(project): Path<String>,
    Form(form): Form<CheckoutForm>,
) -> Result<Response, PlainTextError> {
    let dir = state.projects.resolve(&project)?;
    let reference = form.reference.trim();
    if reference.is_empty() {
        return Err(PployError::Validation("ref is required".to_string()).into());
    }
    let running = state.deployer.checkout(&project, &dir, reference)?;
    // the fetch may move origin/HEAD; forget the cached branch once it has run
    let completion = running.completion;
    tokio::spawn(async move {
        let _ = completion.await;
        state.projects.invalidate_default_branch(&project);
    });
    Ok(stream::process_output(running.output))
}

async fn deploy(
    State(state): State<SharedState>,
    Path(project): Path<String>,
    headers: HeaderMap,
    Form(form): Form<DeployForm>,
) -> Result<Response, PlainTextError> {
    let dir = state.projects.resolve(&project)?;
    let user = cookies::current_user(&headers)
        .ok_or_else(|| PployError::Validation("user cookie not set".to_string()))?;
    let target = form.target.trim();
    if target.is_empty() {
        return Err(PployError::Validation("target is required".to_string()).into());
    }
    let running = state.deployer.deploy(&project, &dir, target, &user).await?;
    Ok(stream::process_output(running.output))
}

// ── Tests ─────────────────────────────────────────────────────────────
