//! HTTP handlers and routing.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::schema::{
    Area, AreaRequest, CreateProcessRequest, Process, ProcessFields, UpdateProcessRequest,
};
use crate::store::CatalogStore;
use crate::tree::{flatten, DisplayEntry, ExpandedIds, Forest};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
}

impl AppState {
    pub fn new(store: impl CatalogStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/processes", get(list_processes).post(create_process))
        .route("/api/processes/tree", get(process_tree))
        .route("/api/processes/area/:area_id", get(processes_by_area))
        .route(
            "/api/processes/:id",
            get(get_process).put(update_process).delete(delete_process),
        )
        .route("/api/processes/:id/children", get(list_children))
        .route("/api/areas", get(list_areas).post(create_area))
        .route(
            "/api/areas/:id",
            get(get_area).put(update_area).delete(delete_area),
        )
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

async fn list_processes(State(state): State<AppState>) -> Result<Json<Vec<Process>>, ApiError> {
    Ok(Json(state.store.list_processes().await?))
}

#[derive(Debug, Default, Deserialize)]
struct TreeQuery {
    /// Comma-separated ids, e.g. `1,4,9`
    expanded: Option<String>,
    area_id: Option<i64>,
}

#[derive(Serialize)]
struct TreeView<'a> {
    entries: Vec<DisplayEntry<'a, Process>>,
    detached: &'a [i64],
}

/// Materialize the hierarchy into the rows a tree table renders.
async fn process_tree(
    State(state): State<AppState>,
    query: Result<Query<TreeQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let expanded = parse_expanded(query.expanded.as_deref())?;

    let records = match query.area_id {
        Some(area_id) => {
            require_area(&state, area_id).await?;
            state.store.list_processes_by_area(area_id).await?
        }
        None => state.store.list_processes().await?,
    };

    let forest = Forest::build(&records);
    let view = TreeView {
        entries: flatten(&forest, &expanded),
        detached: forest.detached_ids(),
    };
    debug!(
        records = records.len(),
        visible = view.entries.len(),
        expanded = expanded.len(),
        "Rendered process tree"
    );
    Ok(Json(view).into_response())
}

async fn processes_by_area(
    State(state): State<AppState>,
    Path(area_id): Path<String>,
) -> Result<Json<Vec<Process>>, ApiError> {
    let area_id = parse_area_id(&area_id)?;
    Ok(Json(state.store.list_processes_by_area(area_id).await?))
}

async fn get_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Process>, ApiError> {
    let id = parse_process_id(&id)?;
    Ok(Json(find_process(&state, id).await?))
}

/// Direct children of a process.
async fn list_children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Process>>, ApiError> {
    let id = parse_process_id(&id)?;
    find_process(&state, id).await?;
    Ok(Json(state.store.list_children(id).await?))
}

async fn create_process(
    State(state): State<AppState>,
    body: Result<Json<CreateProcessRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Process>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let (Some(name), Some(area_id), Some(status), Some(priority)) = (
        non_blank(req.name),
        req.area_id,
        non_blank(req.status),
        non_blank(req.priority),
    ) else {
        return Err(ApiError::bad_request(
            "Missing required fields: name, area_id, status, priority",
        ));
    };

    require_known_area(&state, area_id).await?;
    if let Some(parent) = req.parent_process_id {
        require_parent(&state, parent).await?;
    }

    let fields = ProcessFields {
        name,
        parent_process_id: req.parent_process_id,
        description: req.description,
        area_id: Some(area_id),
        related_tools: req.related_tools,
        related_users: req.related_users,
        status,
        priority,
    };
    let process = state.store.create_process(&fields).await?;
    Ok((StatusCode::CREATED, Json(process)))
}

/// Partial update: fields left out of the body keep their stored value.
async fn update_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateProcessRequest>, JsonRejection>,
) -> Result<Json<Process>, ApiError> {
    let id = parse_process_id(&id)?;
    let current = find_process(&state, id).await?;
    let Json(patch) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    if patch.has_blank_required() {
        return Err(ApiError::bad_request(
            "Required fields cannot be empty if provided for update.",
        ));
    }

    if let Some(Some(parent)) = patch.parent_process_id {
        if parent == id {
            return Err(ApiError::bad_request("A process cannot be its own parent"));
        }
        require_parent(&state, parent).await?;
        if state.store.ancestor_ids(parent).await?.contains(&id) {
            return Err(ApiError::bad_request(
                "A process cannot be moved under one of its descendants",
            ));
        }
    }

    if let Some(area_id) = patch.area_id {
        require_known_area(&state, area_id).await?;
    }

    let fields = patch.apply(&current);
    state
        .store
        .update_process(id, &fields)
        .await?
        .map(Json)
        .ok_or_else(|| process_not_found(id))
}

async fn delete_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_process_id(&id)?;
    if !state.store.delete_process(id).await? {
        return Err(process_not_found(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_areas(State(state): State<AppState>) -> Result<Json<Vec<Area>>, ApiError> {
    Ok(Json(state.store.list_areas().await?))
}

async fn get_area(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Area>, ApiError> {
    let id = parse_area_id(&id)?;
    Ok(Json(require_area(&state, id).await?))
}

async fn create_area(
    State(state): State<AppState>,
    body: Result<Json<AreaRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Area>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let name = non_blank(req.name)
        .ok_or_else(|| ApiError::bad_request("Missing required field: name"))?;
    let area = state.store.create_area(&name).await?;
    Ok((StatusCode::CREATED, Json(area)))
}

async fn update_area(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AreaRequest>, JsonRejection>,
) -> Result<Json<Area>, ApiError> {
    let id = parse_area_id(&id)?;
    require_area(&state, id).await?;
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let name = non_blank(req.name)
        .ok_or_else(|| ApiError::bad_request("Missing required field: name"))?;
    state
        .store
        .update_area(id, &name)
        .await?
        .map(Json)
        .ok_or_else(|| area_not_found(id))
}

async fn delete_area(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_area_id(&id)?;
    if !state.store.delete_area(id).await? {
        return Err(area_not_found(id));
    }
    info!(id, "Area removed, its processes are now unassigned");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helper functions
// ============================================================================

fn parse_process_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid process ID format."))
}

fn parse_area_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid area ID format."))
}

/// Parse `1,2, 3` into an expanded-id set. Blank segments are skipped.
fn parse_expanded(raw: Option<&str>) -> Result<ExpandedIds, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("Invalid expanded id: {}", s)))
        })
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn process_not_found(id: i64) -> ApiError {
    ApiError::not_found(format!("Process with ID {} not found.", id))
}

fn area_not_found(id: i64) -> ApiError {
    ApiError::not_found(format!("Area with ID {} not found.", id))
}

async fn find_process(state: &AppState, id: i64) -> Result<Process, ApiError> {
    state
        .store
        .get_process(id)
        .await?
        .ok_or_else(|| process_not_found(id))
}

async fn require_area(state: &AppState, id: i64) -> Result<Area, ApiError> {
    state
        .store
        .get_area(id)
        .await?
        .ok_or_else(|| area_not_found(id))
}

/// Like [`require_area`], for an area referenced from a request body.
async fn require_known_area(state: &AppState, id: i64) -> Result<(), ApiError> {
    match state.store.get_area(id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::bad_request("Area does not exist")),
    }
}

async fn require_parent(state: &AppState, id: i64) -> Result<(), ApiError> {
    match state.store.get_process(id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::bad_request("Parent process does not exist")),
    }
}
