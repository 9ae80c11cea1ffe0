//! Periodic re-evaluation of the schedule collection.
//!
//! The activation engine has no notion of time passing; this loop asks it
//! again on every tick (and whenever the store changes) and records which
//! schedules hold on which device, logging each transition for the
//! enforcement side to act on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::activation;
use crate::models::Schedule;
use crate::store::ScheduleStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationSnapshot {
    pub evaluated_at: Option<NaiveDateTime>,
    /// device_ip -> active schedule ids, every overlap included
    pub active: BTreeMap<String, Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Activated { device_ip: String, schedule_id: Uuid },
    Deactivated { device_ip: String, schedule_id: Uuid },
}

pub fn evaluate(schedules: &[Schedule], now: NaiveDateTime) -> ActivationSnapshot {
    ActivationSnapshot {
        evaluated_at: Some(now),
        active: activation::active_by_device(schedules, &now),
    }
}

/// Deactivations first, then activations, each sorted by device and id.
pub fn diff_snapshots(prev: &ActivationSnapshot, next: &ActivationSnapshot) -> Vec<Transition> {
    let pairs = |snap: &ActivationSnapshot| -> BTreeSet<(String, Uuid)> {
        snap.active
            .iter()
            .flat_map(|(dev, ids)| ids.iter().map(move |id| (dev.clone(), *id)))
            .collect()
    };
    let before = pairs(prev);
    let after = pairs(next);

    let ended = before.difference(&after).map(|(d, id)| Transition::Deactivated {
        device_ip: d.clone(),
        schedule_id: *id,
    });
    let started = after.difference(&before).map(|(d, id)| Transition::Activated {
        device_ip: d.clone(),
        schedule_id: *id,
    });
    ended.chain(started).collect()
}

pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// One evaluation pass. Unreadable records are already dropped by the
/// store; if the store as a whole cannot be read, every activation is
/// released rather than left in force on stale data.
pub async fn check_once(
    store: &ScheduleStore,
    snapshot: &RwLock<ActivationSnapshot>,
    now: NaiveDateTime,
) -> Vec<Transition> {
    let next = match store.list().await {
        Ok(schedules) => evaluate(&schedules, now),
        Err(e) => {
            error!(error = %e, path = %store.path().display(), "schedule store unreadable, releasing all activations");
            evaluate(&[], now)
        }
    };

    let mut current = snapshot.write().await;
    let transitions = diff_snapshots(&current, &next);
    for t in &transitions {
        match t {
            Transition::Activated { device_ip, schedule_id } => {
                info!(device = %device_ip, schedule = %schedule_id, "schedule activated")
            }
            Transition::Deactivated { device_ip, schedule_id } => {
                info!(device = %device_ip, schedule = %schedule_id, "schedule deactivated")
            }
        }
    }
    for (device, ids) in next.active.iter().filter(|(_, ids)| ids.len() > 1) {
        warn!(device = %device, count = ids.len(), "overlapping schedules active on device");
    }
    *current = next;
    transitions
}

/// Runs until the task is aborted.
pub async fn run(
    store: Arc<ScheduleStore>,
    snapshot: Arc<RwLock<ActivationSnapshot>>,
    recheck: Arc<Notify>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "schedule watcher started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = recheck.notified() => {}
        }
        check_once(&store, &snapshot, local_now()).await;
    }
}
