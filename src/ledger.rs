use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::engine::LedgerError;
use crate::model::*;

/// The authoritative reservation store.
///
/// Implementations must let at most one reservation exist per
/// (facility, date, hour). `create` re-checks that under the same critical
/// section as the write and reports `Conflict` when it lost the race.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Hours already taken at `facility_id` on `date`.
    async fn list_reserved_hours(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
    ) -> Result<HashSet<HourMinute>, LedgerError>;

    async fn create(&self, reservation: NewReservation) -> Result<ReservationId, LedgerError>;

    /// Newest date first; hours ascending within a date.
    async fn list_by_member(&self, member_id: &str) -> Result<Vec<Reservation>, LedgerError>;

    /// Returns the removed reservation.
    async fn delete(&self, id: ReservationId) -> Result<Reservation, LedgerError>;
}
