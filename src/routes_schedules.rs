// --------------------------------------------------
// Handles API endpoints for schedule CRUD operations.
//
// Responsibilities:
// - List schedules (all / limit / quota / currently active)
// - Create / update / delete schedules
// - Enable / disable schedules
//
// Every successful mutation wakes the watcher so activation
// decisions follow the store immediately.
// --------------------------------------------------

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::activation::{self, ScheduleFilter};
use crate::models::Schedule;
use crate::store::ScheduleInput;
use crate::watcher::local_now;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: ScheduleFilter,
    pub at: Option<String>, // "YYYY-MM-DDTHH:MM", defaults to now
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub now: NaiveDateTime,
    pub schedules: Vec<Schedule>,
}

fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

// -----------------------------
// GET /api/schedules?filter=active
// -----------------------------
pub async fn list_schedules(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let now = match q.at.as_deref().map(activation::parse_instant) {
        Some(Ok(at)) => at,
        Some(Err(e)) => return e.into_response(),
        None => local_now(),
    };

    let all = match state.store.list().await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    let schedules = activation::filter_schedules(&all, q.filter, &now)
        .into_iter()
        .cloned()
        .collect();

    Json(ListResponse { now, schedules }).into_response()
}

// -----------------------------
// POST /api/schedules
// -----------------------------
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(input): Json<ScheduleInput>,
) -> impl IntoResponse {
    match state.store.create(input).await {
        Ok(schedule) => {
            state.recheck.notify_one();
            (StatusCode::CREATED, Json(schedule)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "create schedule rejected");
            e.into_response()
        }
    }
}

// -----------------------------
// PUT /api/schedules/:id
// -----------------------------
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ScheduleInput>,
) -> impl IntoResponse {
    let Some(id) = parse_id(&id) else {
        return (StatusCode::BAD_REQUEST, "invalid id").into_response();
    };

    match state.store.update(id, input).await {
        Ok(schedule) => {
            state.recheck.notify_one();
            Json(schedule).into_response()
        }
        Err(e) => {
            warn!(error = %e, id = %id, "update schedule rejected");
            e.into_response()
        }
    }
}

// -----------------------------
// DELETE /api/schedules/:id
// -----------------------------
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(id) = parse_id(&id) else {
        return (StatusCode::BAD_REQUEST, "invalid id").into_response();
    };

    match state.store.delete(id).await {
        Ok(()) => {
            state.recheck.notify_one();
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleInput {
    pub enabled: Option<bool>,
}

// -----------------------------
// POST /api/schedules/:id/toggle
// Body {"enabled": bool} sets the flag; no body flips it
// -----------------------------
pub async fn toggle_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ToggleInput>>,
) -> impl IntoResponse {
    let Some(id) = parse_id(&id) else {
        return (StatusCode::BAD_REQUEST, "invalid id").into_response();
    };
    let enabled = body.and_then(|Json(t)| t.enabled);

    match state.store.set_enabled(id, enabled).await {
        Ok(schedule) => {
            state.recheck.notify_one();
            Json(schedule).into_response()
        }
        Err(e) => e.into_response(),
    }
}
