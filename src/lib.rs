//! Schedule activation engine and schedule service for the bandwidth dashboard.
//!
//! [`activation`] answers "is this schedule in force right now" and "which
//! schedules fall on this date" as pure functions. The remaining modules wrap
//! it in a small HTTP service with a JSON-file schedule store and a periodic
//! re-evaluation loop.

pub mod activation;
pub mod config;
pub mod error;
pub mod models;
pub mod routes_activation;
pub mod routes_schedules;
pub mod store;
pub mod watcher;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::sync::{Notify, RwLock};

use crate::store::ScheduleStore;
use crate::watcher::ActivationSnapshot;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<ScheduleStore>,
    pub snapshot: Arc<RwLock<ActivationSnapshot>>,
    /// Wakes the watcher after a mutation.
    pub recheck: Arc<Notify>,
}

impl AppState {
    pub fn new(store: ScheduleStore) -> Self {
        Self {
            store: Arc::new(store),
            snapshot: Arc::new(RwLock::new(ActivationSnapshot::default())),
            recheck: Arc::new(Notify::new()),
        }
    }
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // schedules
        .route(
            "/schedules",
            get(routes_schedules::list_schedules).post(routes_schedules::create_schedule),
        )
        .route(
            "/schedules/:id",
            put(routes_schedules::update_schedule).delete(routes_schedules::delete_schedule),
        )
        .route("/schedules/:id/toggle", post(routes_schedules::toggle_schedule))
        // activation
        .route("/schedules/active", get(routes_activation::get_active))
        .route("/calendar/day", get(routes_activation::get_calendar_day))
        .route("/calendar/month", get(routes_activation::get_calendar_month))
        .route("/activations", get(routes_activation::get_activations))
        .with_state(state)
}
