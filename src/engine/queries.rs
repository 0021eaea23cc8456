use std::collections::HashSet;

use chrono::NaiveDate;

use crate::model::*;

use super::Engine;

impl Engine {
    /// Start hours taken at `facility_id` on `date`. Not linearizable with
    /// concurrent creates; the create path re-checks.
    pub async fn reserved_hours(&self, facility_id: FacilityId, date: NaiveDate) -> HashSet<HourMinute> {
        let Some(day) = self.store.get_day(&(facility_id, date)) else {
            return HashSet::new();
        };
        let guard = day.read().await;
        guard.reservations.keys().copied().collect()
    }

    /// A day's reservations in hour order.
    pub async fn reservations_on(&self, facility_id: FacilityId, date: NaiveDate) -> Vec<Reservation> {
        let Some(day) = self.store.get_day(&(facility_id, date)) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard.reservations.values().cloned().collect()
    }

    pub async fn get_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        let key = self.store.locate(id)?;
        let day = self.store.get_day(&key)?;
        let guard = day.read().await;
        guard.find(id).cloned()
    }

    /// Member's reservations: latest date first, then by hour, then facility.
    pub async fn reservations_for_member(&self, member_id: &str) -> Vec<Reservation> {
        let mut found = Vec::new();
        for id in self.store.member_reservation_ids(member_id) {
            if let Some(r) = self.get_reservation(&id).await {
                found.push(r);
            }
        }
        found.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(a.hour.cmp(&b.hour))
                .then(a.facility_id.cmp(&b.facility_id))
        });
        found
    }

    pub fn reservation_count(&self) -> usize {
        self.store.reservation_count()
    }
}
