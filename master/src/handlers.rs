use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::{
    DfsError, FileStatus, FsckReport, JobInfo, JobRequest, JobResults, NodeReport, Task,
    WriteSummary,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{dfs::DfsClient, state::AppState};

/// Header con el usuario que hace la petición.
pub const USER_HEADER: &str = "x-minidfs-user";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_job).get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/results", get(get_job_results))
        .route("/api/v1/jobs/:id/tasks", get(get_job_tasks))
        .route("/api/v1/fs", axum::routing::delete(delete_path))
        .route("/api/v1/fs/status", get(file_status))
        .route("/api/v1/fs/list", get(list_path))
        .route(
            "/api/v1/fs/file",
            get(read_file)
                .put(write_file)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/api/v1/fs/mkdirs", post(mkdirs))
        .route("/api/v1/fs/rename", post(rename))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/fsck", get(fsck))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- errores ---------------- */

pub struct ApiError(DfsError);

impl From<DfsError> for ApiError {
    fn from(e: DfsError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(e: &DfsError) -> StatusCode {
    match e {
        DfsError::NotFound(_)
        | DfsError::ParentMissing(_)
        | DfsError::UnknownJob(_)
        | DfsError::BlockNotFound(_) => StatusCode::NOT_FOUND,
        DfsError::AlreadyExists(_) | DfsError::NotEmpty(_) => StatusCode::CONFLICT,
        DfsError::NotADirectory(_)
        | DfsError::NotAFile(_)
        | DfsError::InvalidPath(_)
        | DfsError::InvalidArgument(_)
        | DfsError::UnknownFunction(_) => StatusCode::BAD_REQUEST,
        DfsError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        DfsError::Corrupted { .. }
        | DfsError::QuorumNotReached { .. }
        | DfsError::NoEligibleNodes => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!("error interno: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Corre una operación del DFS (bloqueante) fuera del runtime.
async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DfsError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res.map_err(ApiError),
        Err(e) => Err(ApiError(DfsError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        )))),
    }
}

fn caller(state: &AppState, headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(&state.superuser)
        .to_string()
}

fn fs_for(state: &AppState, headers: &HeaderMap) -> DfsClient {
    state.fs_for(&caller(state, headers))
}

/* ---------------- jobs ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Valida y lanza un job; devuelve su info en PENDING
async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JobRequest>,
) -> ApiResult<Json<JobInfo>> {
    let user = caller(&state, &headers);
    let job_id = state.jobs.submit_job_as(&user, req)?;
    info!("{} lanzó el job {}", user, job_id);
    Ok(Json(state.jobs.job_info(&job_id)?))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobInfo>> {
    Json(state.jobs.list_jobs())
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobInfo>> {
    Ok(Json(state.jobs.job_info(&id)?))
}

async fn get_job_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Task>>> {
    state.jobs.job_info(&id)?;
    Ok(Json(state.jobs.tasks(&id)))
}

// Lista los part-r-NNNNN de un job terminado
async fn get_job_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResults>> {
    let jobs = state.jobs.clone();
    let results = run_blocking(move || jobs.job_results(&id)).await?;
    Ok(Json(results))
}

/* ---------------- sistema de archivos ---------------- */

#[derive(Debug, Deserialize)]
struct PathQuery {
    path: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    overwrite: bool,
}

#[derive(Debug, Deserialize)]
struct RenameQuery {
    src: String,
    dst: String,
}

#[derive(Debug, Deserialize)]
struct FsckQuery {
    #[serde(default)]
    repair: bool,
}

async fn file_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PathQuery>,
) -> ApiResult<Json<FileStatus>> {
    let fs = fs_for(&state, &headers);
    Ok(Json(run_blocking(move || fs.get_file_status(&q.path)).await?))
}

async fn list_path(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PathQuery>,
) -> ApiResult<Json<Vec<FileStatus>>> {
    let fs = fs_for(&state, &headers);
    let listed = run_blocking(move || {
        if q.recursive {
            fs.list_files(&q.path, true)?.collect::<Result<Vec<_>, _>>()
        } else {
            fs.list_status(&q.path)
        }
    })
    .await?;
    Ok(Json(listed))
}

async fn write_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PathQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WriteSummary>)> {
    let fs = fs_for(&state, &headers);
    let summary = run_blocking(move || fs.write_all_to(&q.path, &body, q.overwrite)).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn read_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PathQuery>,
) -> ApiResult<Vec<u8>> {
    let fs = fs_for(&state, &headers);
    run_blocking(move || fs.read_to_vec(&q.path)).await
}

async fn mkdirs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PathQuery>,
) -> ApiResult<Json<FileStatus>> {
    let fs = fs_for(&state, &headers);
    Ok(Json(run_blocking(move || fs.mkdirs(&q.path)).await?))
}

async fn rename(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<RenameQuery>,
) -> ApiResult<StatusCode> {
    let fs = fs_for(&state, &headers);
    run_blocking(move || fs.rename(&q.src, &q.dst)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_path(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PathQuery>,
) -> ApiResult<StatusCode> {
    let fs = fs_for(&state, &headers);
    run_blocking(move || fs.delete(&q.path, q.recursive)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/* ---------------- clúster ---------------- */

async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeReport>> {
    Json(state.fs.nodes())
}

async fn fsck(
    State(state): State<AppState>,
    Query(q): Query<FsckQuery>,
) -> ApiResult<Json<FsckReport>> {
    let fs = state.fs.clone();
    Ok(Json(run_blocking(move || fs.fsck(q.repair)).await?))
}
