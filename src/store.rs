use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activation::parse_date;
use crate::error::{StoreError, ValidationError};
use crate::models::{Db, Enforcement, RepeatMode, RuleType, Schedule, TimeOfDay, WeekdaySet};

pub const DEFAULT_DB_PATH: &str = "data/db.json";

#[derive(Deserialize)]
struct DbFile {
    #[serde(default)]
    schedules: Vec<serde_json::Value>,
}

// A missing file is an empty store. Each record decodes on its own: one that
// fails is logged and set aside in `Db::rejected`, the others still load.
// Only a document that is not valid JSON at all is an error.
pub fn load_db(path: &Path) -> Result<Db, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Db::default()),
        Err(e) => return Err(e.into()),
    };
    let file: DbFile = serde_json::from_str(&text)?;

    let mut db = Db::default();
    for (index, raw) in file.schedules.into_iter().enumerate() {
        match Schedule::deserialize(&raw) {
            Ok(schedule) => db.schedules.push(schedule),
            Err(e) => {
                warn!(index, id = %raw["id"], error = %e, "skipping unreadable schedule record");
                db.rejected.push(raw);
            }
        }
    }
    Ok(db)
}

// Rejected records are written back untouched so a save never destroys them.
pub fn save_db(path: &Path, db: &Db) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let mut records = db
        .schedules
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    records.extend(db.rejected.iter().cloned());
    let text = serde_json::to_string_pretty(&serde_json::json!({ "schedules": records }))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&tmp_path, text)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Body of create/update requests. Dates and times arrive as strings so
/// that bad values surface as validation errors with the offending field.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleInput {
    pub name: String,
    pub rule_type: RuleType,
    pub device_ip: String,
    pub start_date: Option<String>, // "YYYY-MM-DD"
    pub end_date: Option<String>,   // "YYYY-MM-DD", "" or null for open-ended
    pub start_time: String,         // "HH:MM"
    pub end_time: String,           // "HH:MM"
    pub repeat_mode: RepeatMode,
    #[serde(default)]
    pub custom_days: Option<Vec<u8>>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
    #[serde(flatten)]
    pub enforcement: Enforcement,
}

impl ScheduleInput {
    /// Validate the form and build the record stored under `id`.
    ///
    /// Payload fields that do not belong to the rule type are dropped, as is
    /// `custom_days` for any repeat mode other than custom.
    pub fn into_schedule(self, id: Uuid) -> Result<Schedule, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::Missing("name"));
        }
        let device_ip = self.device_ip.trim();
        if device_ip.is_empty() {
            return Err(ValidationError::Missing("device_ip"));
        }

        let start_date = match self.start_date.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => parse_date(s)?,
            _ => return Err(ValidationError::Missing("start_date")),
        };
        let end_date = match self.end_date.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(parse_date(s)?),
            _ => None,
        };
        if end_date.is_some_and(|end| end < start_date) {
            return Err(ValidationError::Invalid("end_date before start_date"));
        }

        let start_time: TimeOfDay = self.start_time.parse()?;
        let end_time: TimeOfDay = self.end_time.parse()?;

        let custom_days = match self.repeat_mode {
            RepeatMode::Custom => {
                let days = WeekdaySet::from_indices(self.custom_days.as_deref().unwrap_or(&[]))?;
                if days.is_empty() {
                    return Err(ValidationError::Missing("custom_days"));
                }
                Some(days)
            }
            _ => None,
        };

        let e = self.enforcement;
        let enforcement = match self.rule_type {
            RuleType::Limit => {
                if !e.limit_dl_kbps.is_some_and(|v| v > 0) {
                    return Err(ValidationError::Invalid("limit_dl_kbps must be positive"));
                }
                if !e.limit_ul_kbps.is_some_and(|v| v > 0) {
                    return Err(ValidationError::Invalid("limit_ul_kbps must be positive"));
                }
                if !e.priority.is_some_and(|p| p <= 7) {
                    return Err(ValidationError::Invalid("priority must be 0..=7"));
                }
                Enforcement {
                    limit_dl_kbps: e.limit_dl_kbps,
                    limit_ul_kbps: e.limit_ul_kbps,
                    priority: e.priority,
                    ..Enforcement::default()
                }
            }
            RuleType::Quota => {
                if !e.quota_dl_bytes.is_some_and(|v| v > 0) {
                    return Err(ValidationError::Invalid("quota_dl_bytes must be positive"));
                }
                if !e.quota_ul_bytes.is_some_and(|v| v > 0) {
                    return Err(ValidationError::Invalid("quota_ul_bytes must be positive"));
                }
                Enforcement {
                    quota_dl_bytes: e.quota_dl_bytes,
                    quota_ul_bytes: e.quota_ul_bytes,
                    ..Enforcement::default()
                }
            }
        };

        Ok(Schedule {
            id,
            name: name.to_string(),
            rule_type: self.rule_type,
            device_ip: device_ip.to_string(),
            start_date: Some(start_date),
            end_date,
            start_time,
            end_time,
            repeat_mode: self.repeat_mode,
            custom_days,
            is_enabled: self.is_enabled.unwrap_or(true),
            enforcement,
        })
    }
}

/// JSON-file backed schedule collection. Every mutation is a
/// load-modify-save cycle; the mutex keeps those cycles from interleaving.
#[derive(Debug)]
pub struct ScheduleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Db, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || load_db(&path)).await?
    }

    async fn save(&self, db: Db) -> Result<(), StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_db(&path, &db)).await?
    }

    pub async fn list(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self.load().await?.schedules)
    }

    pub async fn create(&self, input: ScheduleInput) -> Result<Schedule, StoreError> {
        let schedule = input.into_schedule(Uuid::new_v4())?;

        let _guard = self.write_lock.lock().await;
        let mut db = self.load().await?;
        db.schedules.push(schedule.clone());
        self.save(db).await?;

        info!(id = %schedule.id, name = %schedule.name, device = %schedule.device_ip, "schedule created");
        Ok(schedule)
    }

    pub async fn update(&self, id: Uuid, input: ScheduleInput) -> Result<Schedule, StoreError> {
        let updated = input.into_schedule(id)?;

        let _guard = self.write_lock.lock().await;
        let mut db = self.load().await?;
        let Some(slot) = db.schedules.iter_mut().find(|s| s.id == id) else {
            return Err(StoreError::NotFound(id));
        };
        *slot = updated.clone();
        self.save(db).await?;

        info!(id = %id, name = %updated.name, "schedule updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut db = self.load().await?;

        let before = db.schedules.len();
        db.schedules.retain(|s| s.id != id);
        if db.schedules.len() == before {
            return Err(StoreError::NotFound(id));
        }
        self.save(db).await?;

        info!(id = %id, "schedule deleted");
        Ok(())
    }

    // Set the enabled flag, or flip it when `enabled` is None.
    pub async fn set_enabled(&self, id: Uuid, enabled: Option<bool>) -> Result<Schedule, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut db = self.load().await?;

        let Some(s) = db.schedules.iter_mut().find(|s| s.id == id) else {
            return Err(StoreError::NotFound(id));
        };
        s.is_enabled = enabled.unwrap_or(!s.is_enabled);
        let updated = s.clone();
        self.save(db).await?;

        debug!(id = %id, enabled = updated.is_enabled, "schedule toggled");
        Ok(updated)
    }
}
