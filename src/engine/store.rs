use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

/// All reservations of one facility on one date, keyed by start hour.
#[derive(Debug, Default)]
pub struct DayState {
    pub reservations: BTreeMap<HourMinute, Reservation>,
}

impl DayState {
    pub fn holder_of(&self, hour: HourMinute) -> Option<&Reservation> {
        self.reservations.get(&hour)
    }

    pub fn find(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.values().find(|r| r.id == *id)
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

pub type SharedDay = Arc<RwLock<DayState>>;

pub struct InMemoryStore {
    days: DashMap<DayKey, SharedDay>,
    /// Reservation id → the day partition holding it.
    by_id: DashMap<ReservationId, DayKey>,
    by_member: DashMap<String, Vec<ReservationId>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            by_id: DashMap::new(),
            by_member: DashMap::new(),
        }
    }

    // ── Day partitions ───────────────────────────────────────

    pub fn get_day(&self, key: &DayKey) -> Option<SharedDay> {
        self.days.get(key).map(|e| e.value().clone())
    }

    pub fn day_or_insert(&self, key: DayKey) -> SharedDay {
        self.days.entry(key).or_default().value().clone()
    }

    /// Forget partitions without reservations. The caller must keep creates
    /// out (exclusive commit gate) while this runs.
    pub fn prune_empty_days(&self) -> usize {
        let before = self.days.len();
        self.days
            .retain(|_, day| day.try_read().map_or(true, |d| !d.is_empty()));
        before - self.days.len()
    }

    /// Snapshot of the partition handles; no locks are held on return.
    pub fn all_days(&self) -> Vec<SharedDay> {
        self.days.iter().map(|e| e.value().clone()).collect()
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn locate(&self, id: &ReservationId) -> Option<DayKey> {
        self.by_id.get(id).map(|e| *e.value())
    }

    pub fn member_reservation_ids(&self, member_id: &str) -> Vec<ReservationId> {
        self.by_member
            .get(member_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn reservation_count(&self) -> usize {
        self.by_id.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to its (already locked) partition and the indexes.
    pub fn apply_event(&self, day: &mut DayState, event: &Event) {
        match event {
            Event::ReservationCreated(r) => {
                self.by_id.insert(r.id, (r.facility_id, r.date));
                self.by_member.entry(r.member_id.clone()).or_default().push(r.id);
                day.reservations.insert(r.hour, r.clone());
            }
            Event::ReservationDeleted { id, .. } => {
                self.by_id.remove(id);
                let Some(hour) = day.find(id).map(|r| r.hour) else {
                    return;
                };
                if let Some(removed) = day.reservations.remove(&hour) {
                    self.unlink_member(&removed.member_id, id);
                }
            }
        }
    }

    fn unlink_member(&self, member_id: &str, id: &ReservationId) {
        if let Some(mut ids) = self.by_member.get_mut(member_id) {
            ids.retain(|r| r != id);
        }
        self.by_member.remove_if(member_id, |_, ids| ids.is_empty());
    }
}
