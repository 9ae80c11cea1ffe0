use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activation::{self, CalendarDay};
use crate::models::Schedule;
use crate::watcher::local_now;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    pub at: Option<String>, // "YYYY-MM-DDTHH:MM", defaults to now
}

#[derive(Debug, Serialize)]
pub struct ActiveResponse {
    pub at: NaiveDateTime,
    pub schedules: Vec<Schedule>,
    pub by_device: BTreeMap<String, Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: String, // "YYYY-MM-DD"
}

#[derive(Debug, Serialize)]
pub struct DayResponse {
    pub date: NaiveDate,
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32, // 1..=12
}

#[derive(Debug, Serialize)]
pub struct MonthResponse {
    pub year: i32,
    pub month: u32,
    pub days: Vec<CalendarDay>,
}

// GET /api/schedules/active?at=... -- every schedule in force at the instant
pub async fn get_active(
    State(state): State<AppState>,
    Query(q): Query<ActiveQuery>,
) -> impl IntoResponse {
    let at = match q.at.as_deref().map(activation::parse_instant) {
        Some(Ok(at)) => at,
        Some(Err(e)) => return e.into_response(),
        None => local_now(),
    };

    let all = match state.store.list().await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    Json(ActiveResponse {
        at,
        schedules: activation::active_at(&all, &at).into_iter().cloned().collect(),
        by_device: activation::active_by_device(&all, &at),
    })
    .into_response()
}

// GET /api/calendar/day?date=YYYY-MM-DD
pub async fn get_calendar_day(
    State(state): State<AppState>,
    Query(q): Query<DayQuery>,
) -> impl IntoResponse {
    let date = match activation::parse_date(&q.date) {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };

    let all = match state.store.list().await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    Json(DayResponse {
        date,
        schedules: activation::active_on(&all, date).into_iter().cloned().collect(),
    })
    .into_response()
}

// GET /api/calendar/month?year=2024&month=6
pub async fn get_calendar_month(
    State(state): State<AppState>,
    Query(q): Query<MonthQuery>,
) -> impl IntoResponse {
    let all = match state.store.list().await {
        Ok(s) => s,
        Err(e) => return e.into_response(),
    };

    match activation::calendar_month(&all, q.year, q.month) {
        Ok(days) => Json(MonthResponse {
            year: q.year,
            month: q.month,
            days,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

// GET /api/activations -- what the watcher last decided
pub async fn get_activations(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot.read().await.clone();
    Json(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Db, Enforcement, RepeatMode, RuleType, WeekdaySet};
    use crate::store::{save_db, ScheduleStore};
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::Response;

    fn schedule(name: &str, repeat_mode: RepeatMode, start: &str, end: &str) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rule_type: RuleType::Quota,
            device_ip: "192.168.12.40".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 10),
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            repeat_mode,
            custom_days: None,
            is_enabled: true,
            enforcement: Enforcement {
                quota_dl_bytes: Some(500 << 20),
                quota_ul_bytes: Some(100 << 20),
                ..Enforcement::default()
            },
        }
    }

    fn state_with(name: &str, schedules: Vec<Schedule>) -> AppState {
        let dir = std::env::temp_dir().join("bandwidth_scheduler_test_routes");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        save_db(&path, &Db { schedules, ..Db::default() }).unwrap();
        AppState::new(ScheduleStore::new(path))
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn active_at_instant() {
        let daily = schedule("daily", RepeatMode::Daily, "08:00", "20:00");
        let night = schedule("night", RepeatMode::Daily, "22:00", "06:00");
        let state = state_with("active.json", vec![daily.clone(), night]);

        let q = Query(ActiveQuery { at: Some("2024-06-10T12:00".to_string()) });
        let body = body_json(get_active(State(state.clone()), q).await.into_response()).await;
        assert_eq!(body["schedules"].as_array().unwrap().len(), 1);
        assert_eq!(body["schedules"][0]["name"], "daily");
        assert_eq!(body["by_device"]["192.168.12.40"][0], daily.id.to_string());

        // past end_date
        let q = Query(ActiveQuery { at: Some("2024-06-11T12:00".to_string()) });
        let body = body_json(get_active(State(state.clone()), q).await.into_response()).await;
        assert!(body["schedules"].as_array().unwrap().is_empty());

        let q = Query(ActiveQuery { at: Some("2024-06-11".to_string()) });
        let resp = get_active(State(state), q).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreadable_record_does_not_fail_the_query() {
        let daily = schedule("daily", RepeatMode::Daily, "08:00", "20:00");
        let mut broken = serde_json::to_value(schedule("broken", RepeatMode::Custom, "08:00", "20:00")).unwrap();
        broken["custom_days"] = serde_json::json!([7]);
        let doc = serde_json::json!({ "schedules": [serde_json::to_value(&daily).unwrap(), broken] });

        let dir = std::env::temp_dir().join("bandwidth_scheduler_test_routes");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("one_bad_record.json");
        std::fs::write(&path, doc.to_string()).unwrap();
        let state = AppState::new(ScheduleStore::new(path));

        let q = Query(ActiveQuery { at: Some("2024-06-10T12:00".to_string()) });
        let resp = get_active(State(state), q).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["schedules"].as_array().unwrap().len(), 1);
        assert_eq!(body["schedules"][0]["name"], "daily");
    }

    #[tokio::test]
    async fn calendar_day_and_month() {
        let mut custom = schedule("mwf", RepeatMode::Custom, "22:00", "05:00");
        custom.custom_days = Some(WeekdaySet::from_indices(&[1, 3, 5]).unwrap());
        let state = state_with("calendar.json", vec![custom.clone()]);

        // 2024-06-05 is a Wednesday; time of day plays no part
        let q = Query(DayQuery { date: "2024-06-05".to_string() });
        let body = body_json(get_calendar_day(State(state.clone()), q).await.into_response()).await;
        assert_eq!(body["schedules"][0]["id"], custom.id.to_string());

        let q = Query(DayQuery { date: "2024-06-06".to_string() });
        let body = body_json(get_calendar_day(State(state.clone()), q).await.into_response()).await;
        assert!(body["schedules"].as_array().unwrap().is_empty());

        let q = Query(MonthQuery { year: 2024, month: 6 });
        let body = body_json(get_calendar_month(State(state.clone()), q).await.into_response()).await;
        let days = body["days"].as_array().unwrap();
        assert_eq!(days.len(), 30);
        let marked: Vec<&str> = days
            .iter()
            .filter(|d| !d["schedule_ids"].as_array().unwrap().is_empty())
            .map(|d| d["date"].as_str().unwrap())
            .collect();
        // Mon/Wed/Fri between June 1 and June 10
        assert_eq!(marked, vec!["2024-06-03", "2024-06-05", "2024-06-07", "2024-06-10"]);

        let q = Query(MonthQuery { year: 2024, month: 0 });
        let resp = get_calendar_month(State(state), q).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn activations_reflect_watcher_snapshot() {
        let daily = schedule("daily", RepeatMode::Daily, "08:00", "20:00");
        let state = state_with("activations.json", vec![daily.clone()]);

        let at = activation::parse_instant("2024-06-03T09:30").unwrap();
        crate::watcher::check_once(&state.store, &state.snapshot, at).await;

        let body = body_json(get_activations(State(state)).await.into_response()).await;
        assert_eq!(body["evaluated_at"], "2024-06-03T09:30:00");
        assert_eq!(body["active"]["192.168.12.40"][0], daily.id.to_string());
    }
}
