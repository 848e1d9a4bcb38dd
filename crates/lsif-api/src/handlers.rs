use crate::upload as staging;
use crate::{quota, ApiError, ApiResult, AppState};
use axum::{
    body::Body,
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    HeaderMap,
};
use lsif_core::{LsifError, Position, QueryMethod, RepositoryCommit};
use lsif_storage::BackendKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Serialize)]
pub struct PingResponse {
    pub pong: &'static str,
}

/// `?repository=<name>&commit=<40 hex>`
#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    pub repository: Option<String>,
    pub commit: Option<String>,
}

impl TargetQuery {
    pub fn target(&self) -> ApiResult<RepositoryCommit> {
        Ok(RepositoryCommit::new(
            self.repository.clone().unwrap_or_default(),
            self.commit.clone().unwrap_or_default(),
        )?)
    }
}

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    #[serde(flatten)]
    pub target: TargetQuery,
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub path: String,
    pub position: Position,
    pub method: String,
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { pong: "pong" })
}

pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<&'static str> {
    let bytes = match receive_upload(&state, &query, &headers, body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            state.metrics.failed_uploads.inc();
            return Err(e);
        }
    };
    state.metrics.uploads.inc();
    state.metrics.upload_bytes.inc_by(bytes);

    let max = state.settings.storage.soft_max_bytes.saturating_sub(bytes);
    match quota::enforce_disk_quota(&state.databases, max).await {
        Ok(report) => {
            state.metrics.set_disk_bytes(report.total_bytes);
            if !report.deleted.is_empty() {
                info!(
                    deleted = report.deleted.len(),
                    remaining_bytes = report.total_bytes,
                    "Enforced disk quota"
                );
            }
        }
        Err(e) => warn!(error = %e, "Disk quota enforcement failed"),
    }

    Ok("Upload successful.")
}

/// Stage, validate and store one upload; returns the dump size.
async fn receive_upload(
    state: &AppState,
    query: &TargetQuery,
    headers: &HeaderMap,
    body: Body,
) -> ApiResult<u64> {
    let target = query.target()?;
    let limit = state.settings.storage.max_upload_bytes;
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(length) = declared.filter(|length| *length > limit) {
        return Err(staging::too_large(length, limit, true));
    }

    let staged = staging::temp_path(state.databases.root(), BackendKind::Json.extension());
    let outcome = async {
        let bytes = staging::receive(body, &staged, limit).await?;
        info!(database = %target, bytes, "Received upload");
        staging::store(state, &target, &staged).await?;
        Ok::<u64, ApiError>(bytes)
    }
    .await;
    staging::discard(vec![staged]).await;
    outcome
}

pub async fn exists(
    State(state): State<AppState>,
    Query(query): Query<ExistsQuery>,
) -> ApiResult<Json<bool>> {
    let target = query.target.target()?;
    if !state.databases.has_data(&target).await {
        return Ok(Json(false));
    }
    let Some(file) = query.file.filter(|f| !f.is_empty()) else {
        return Ok(Json(true));
    };

    let found = match state.databases.get(&target).await {
        Ok(db) => db.exists(&file).await,
        Err(e) => Err(e),
    };
    match found {
        Ok(found) => Ok(Json(found)),
        Err(e) if e.is_not_found() => Ok(Json(false)),
        Err(e) => Err(e.into()),
    }
}

pub async fn request(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<QueryRequest>,
) -> ApiResult<Json<Value>> {
    let target = query.target()?;
    let method = QueryMethod::parse(&body.method).ok_or_else(|| {
        let names: Vec<&str> = QueryMethod::ALL.iter().map(|m| m.name()).collect();
        ApiError::Unprocessable(format!("Method must be one of {}", names.join(", ")))
    })?;

    let started = Instant::now();
    let result = answer(&state, &target, method, &body).await;
    state
        .metrics
        .observe_query(method, result.is_ok(), started.elapsed().as_secs_f64());
    Ok(Json(result?))
}

async fn answer(
    state: &AppState,
    target: &RepositoryCommit,
    method: QueryMethod,
    body: &QueryRequest,
) -> ApiResult<Value> {
    let db = state.databases.get(target).await.map_err(|e| {
        if e.is_not_found() {
            ApiError::NotFound(format!("No LSIF data available for {}.", target))
        } else {
            e.into()
        }
    })?;

    let (path, position) = (body.path.as_str(), body.position);
    let result = match method {
        QueryMethod::Hover => serde_json::to_value(db.hover(path, position).await?),
        QueryMethod::Definitions => serde_json::to_value(db.definitions(path, position).await?),
        QueryMethod::References => serde_json::to_value(db.references(path, position).await?),
    }
    .map_err(LsifError::from)?;
    Ok(result)
}

pub async fn metrics_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.metrics.render(&state.databases)?;
    Ok(([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
