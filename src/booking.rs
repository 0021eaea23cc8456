use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::availability::resolve;
use crate::catalog::FacilityCatalog;
use crate::engine::LedgerError;
use crate::ledger::ReservationLedger;
use crate::model::*;
use crate::slots::{compute_slots, ScheduleError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    /// Caller bug; never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    InvalidConfiguration(#[from] ScheduleError),
    /// The slot was taken first. Pick another one.
    #[error("slot {hour} on {date} is no longer available")]
    Conflict { date: NaiveDate, hour: HourMinute },
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    /// Safe to retry the whole operation.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<LedgerError> for BookingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Conflict { date, hour, .. } => BookingError::Conflict { date, hour },
            LedgerError::NotFound(id) => BookingError::NotFound(id),
            LedgerError::StorageUnavailable(msg) => BookingError::StorageUnavailable(msg),
            LedgerError::LimitExceeded(what) => BookingError::InvalidRequest(what.to_string()),
        }
    }
}

impl BookingError {
    pub fn outcome_label(&self) -> &'static str {
        match self {
            BookingError::InvalidRequest(_) => "invalid_request",
            BookingError::InvalidConfiguration(_) => "invalid_configuration",
            BookingError::Conflict { .. } => "conflict",
            BookingError::NotFound(_) => "not_found",
            BookingError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

/// A committed reservation, returned so the host can trigger reminders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booked {
    pub reservation: Reservation,
}

/// Books and cancels slots against the ledger.
///
/// Holds no reservation state of its own; every call goes to the ledger.
pub struct BookingService {
    ledger: Arc<dyn ReservationLedger>,
    catalog: Arc<dyn FacilityCatalog>,
}

impl BookingService {
    pub fn new(ledger: Arc<dyn ReservationLedger>, catalog: Arc<dyn FacilityCatalog>) -> Self {
        Self { ledger, catalog }
    }

    /// Slot statuses for the booking screen.
    pub async fn availability(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<Vec<ResolvedSlot>, BookingError> {
        let facility = self.facility(facility_id)?;
        let reserved = self.ledger.list_reserved_hours(facility_id, date).await?;
        Ok(resolve(&facility, date, &reserved, now)?)
    }

    /// Reserve `hour` at `facility_id` on `date` for `member_id`.
    ///
    /// Checks reserved hours first to turn away obvious conflicts without a
    /// write; the ledger's create-time check is the one that counts.
    pub async fn book(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
        hour: &str,
        member_id: &str,
    ) -> Result<Booked, BookingError> {
        let started = Instant::now();
        let result = self.try_book(facility_id, date, hour, member_id).await;
        let outcome = match &result {
            Ok(_) => "booked",
            Err(e) => e.outcome_label(),
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(crate::observability::BOOK_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(b) => info!(
                "booked facility {facility_id} on {date} at {} for {member_id} ({})",
                b.reservation.hour, b.reservation.id
            ),
            Err(e @ BookingError::Conflict { .. }) => warn!("booking for {member_id} rejected: {e}"),
            Err(e) => warn!("booking facility {facility_id} on {date} at {hour:?} failed: {e}"),
        }
        result
    }

    async fn try_book(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
        hour: &str,
        member_id: &str,
    ) -> Result<Booked, BookingError> {
        // Validating
        if facility_id <= 0 {
            return Err(BookingError::InvalidRequest(format!("facility id must be positive, got {facility_id}")));
        }
        let hour = HourMinute::parse_strict(hour)
            .map_err(|e| BookingError::InvalidRequest(e.to_string()))?;
        if member_id.trim().is_empty() {
            return Err(BookingError::InvalidRequest("member id is empty".into()));
        }
        let facility = self.facility(facility_id)?;
        if !facility.bookable {
            return Err(BookingError::InvalidRequest(ScheduleError::NotBookable(facility_id).to_string()));
        }
        let starts = compute_slots(facility.opens_at, facility.closes_at, facility.slot_minutes)?;
        if !starts.contains(&hour) {
            return Err(BookingError::InvalidRequest(format!(
                "{hour} is not a slot of facility {facility_id}"
            )));
        }

        let reserved = self.ledger.list_reserved_hours(facility_id, date).await?;
        if reserved.contains(&hour) {
            debug!("facility {facility_id} {date} {hour} already taken, skipping write");
            return Err(BookingError::Conflict { date, hour });
        }

        // Committing
        let new = NewReservation::new(facility_id, date, hour, member_id).with_staff(facility.staff_id);
        let id = self.ledger.create(new.clone()).await?;
        Ok(Booked {
            reservation: Reservation {
                id,
                facility_id,
                date,
                hour,
                member_id: new.member_id,
                staff_id: new.staff_id,
            },
        })
    }

    /// Remove a reservation. `NotFound` means there was nothing to cancel.
    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation, BookingError> {
        let result = self.ledger.delete(id).await.map_err(BookingError::from);
        let outcome = match &result {
            Ok(_) => "cancelled",
            Err(e) => e.outcome_label(),
        };
        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    pub async fn member_reservations(&self, member_id: &str) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.ledger.list_by_member(member_id).await?)
    }

    fn facility(&self, id: FacilityId) -> Result<Facility, BookingError> {
        self.catalog
            .get_facility(id)
            .ok_or_else(|| BookingError::InvalidRequest(format!("unknown facility {id}")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};
    use ulid::Ulid;

    use super::*;
    use crate::catalog::JsonCatalog;
    use crate::engine::Engine;

    const CLUB: &str = r#"[
        {"id": 1, "name": "Tennis 1", "opens_at": "09:00", "closes_at": "13:00",
         "slot_minutes": 60, "staff_id": 5},
        {"id": 2, "name": "Broken", "opens_at": "13:00", "closes_at": "09:00", "slot_minutes": 60},
        {"id": 3, "name": "Closed pool", "opens_at": "09:00", "closes_at": "13:00",
         "slot_minutes": 60, "bookable": false}
    ]"#;

    fn catalog() -> Arc<dyn FacilityCatalog> {
        Arc::new(JsonCatalog::from_json(CLUB).unwrap())
    }

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("clubslot_test_booking");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn service(name: &str) -> (BookingService, Arc<Engine>) {
        let engine = Arc::new(Engine::new(test_wal_path(name)).unwrap());
        (BookingService::new(engine.clone(), catalog()), engine)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn before_day() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    /// Ledger whose storage is down.
    struct DownLedger;

    #[async_trait]
    impl ReservationLedger for DownLedger {
        async fn list_reserved_hours(&self, _: FacilityId, _: NaiveDate) -> Result<HashSet<HourMinute>, LedgerError> {
            Err(LedgerError::StorageUnavailable("connection refused".into()))
        }
        async fn create(&self, _: NewReservation) -> Result<ReservationId, LedgerError> {
            Err(LedgerError::StorageUnavailable("connection refused".into()))
        }
        async fn list_by_member(&self, _: &str) -> Result<Vec<Reservation>, LedgerError> {
            Err(LedgerError::StorageUnavailable("connection refused".into()))
        }
        async fn delete(&self, _: ReservationId) -> Result<Reservation, LedgerError> {
            Err(LedgerError::StorageUnavailable("connection refused".into()))
        }
    }

    /// Reports every hour free, but someone else always wins the write.
    struct LosingLedger {
        creates: AtomicUsize,
    }

    #[async_trait]
    impl ReservationLedger for LosingLedger {
        async fn list_reserved_hours(&self, _: FacilityId, _: NaiveDate) -> Result<HashSet<HourMinute>, LedgerError> {
            Ok(HashSet::new())
        }
        async fn create(&self, r: NewReservation) -> Result<ReservationId, LedgerError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Conflict {
                facility_id: r.facility_id,
                date: r.date,
                hour: r.hour,
                existing: Ulid::new(),
            })
        }
        async fn list_by_member(&self, _: &str) -> Result<Vec<Reservation>, LedgerError> {
            Ok(Vec::new())
        }
        async fn delete(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
            Err(LedgerError::NotFound(id))
        }
    }

    #[tokio::test]
    async fn book_then_slot_shows_booked() {
        let (svc, _) = service("book_shows_booked.wal");
        let booked = assert_ok!(svc.book(1, day(), "10:00", "A").await);
        assert_eq!(booked.reservation.hour.to_string(), "10:00");
        assert_eq!(booked.reservation.staff_id, Some(5));

        let statuses: Vec<SlotStatus> = svc
            .availability(1, day(), before_day())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![SlotStatus::Free, SlotStatus::Booked, SlotStatus::Free, SlotStatus::Free]
        );
    }

    #[tokio::test]
    async fn taken_slot_short_circuits_to_conflict() {
        let (svc, engine) = service("precheck_conflict.wal");
        svc.book(1, day(), "10:00", "A").await.unwrap();
        let appends = engine.wal_appends_since_compact().await;

        let err = assert_err!(svc.book(1, day(), "10:00", "B").await);
        assert_eq!(err, BookingError::Conflict { date: day(), hour: HourMinute::new(10, 0).unwrap() });
        assert_eq!(engine.wal_appends_since_compact().await, appends);
    }

    #[tokio::test]
    async fn lost_race_at_write_time_is_conflict() {
        let ledger = Arc::new(LosingLedger { creates: AtomicUsize::new(0) });
        let svc = BookingService::new(ledger.clone(), catalog());
        let err = svc.book(1, day(), "11:00", "A").await.unwrap_err();
        assert!(matches!(err, BookingError::Conflict { .. }));
        assert_eq!(ledger.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn storage_failure_is_surfaced() {
        let svc = BookingService::new(Arc::new(DownLedger), catalog());
        assert!(matches!(
            svc.book(1, day(), "10:00", "A").await,
            Err(BookingError::StorageUnavailable(_))
        ));
        assert!(matches!(svc.cancel(Ulid::new()).await, Err(BookingError::StorageUnavailable(_))));
        assert!(matches!(svc.member_reservations("A").await, Err(BookingError::StorageUnavailable(_))));
        assert!(matches!(
            svc.availability(1, day(), before_day()).await,
            Err(BookingError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn malformed_input_is_invalid_request() {
        let (svc, engine) = service("invalid_input.wal");
        for (facility, hour, member) in [
            (0, "10:00", "A"),
            (-4, "10:00", "A"),
            (1, "10", "A"),
            (1, "9:00", "A"),
            (1, "10:00:00", "A"),
            (1, "24:00", "A"),
            (1, "10:00", ""),
            (1, "10:00", "   "),
            (99, "10:00", "A"),
            (1, "10:30", "A"),
            (1, "13:00", "A"),
        ] {
            let err = svc.book(facility, day(), hour, member).await.unwrap_err();
            assert!(
                matches!(err, BookingError::InvalidRequest(_)),
                "{facility} {hour:?} {member:?} gave {err:?}"
            );
        }
        assert_eq!(engine.reservation_count(), 0);
    }

    #[tokio::test]
    async fn misconfigured_facilities_are_not_bookable() {
        let (svc, _) = service("misconfigured.wal");
        assert!(matches!(
            svc.book(2, day(), "10:00", "A").await,
            Err(BookingError::InvalidConfiguration(ScheduleError::InvalidConfiguration { .. }))
        ));
        assert!(matches!(svc.book(3, day(), "10:00", "A").await, Err(BookingError::InvalidRequest(_))));
        assert_eq!(
            svc.availability(3, day(), before_day()).await.unwrap_err(),
            BookingError::InvalidConfiguration(ScheduleError::NotBookable(3))
        );
        assert!(matches!(
            svc.availability(2, day(), before_day()).await,
            Err(BookingError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn cancel_then_rebook() {
        let (svc, _) = service("cancel_rebook.wal");
        let booked = svc.book(1, day(), "12:00", "A").await.unwrap();
        let cancelled = svc.cancel(booked.reservation.id).await.unwrap();
        assert_eq!(cancelled, booked.reservation);
        assert_eq!(
            svc.cancel(booked.reservation.id).await.unwrap_err(),
            BookingError::NotFound(booked.reservation.id)
        );
        svc.book(1, day(), "12:00", "B").await.unwrap();
    }

    #[tokio::test]
    async fn member_reservations_come_from_ledger() {
        let (svc, _) = service("member_list.wal");
        let later = NaiveDate::from_ymd_opt(2024, 6, 8).unwrap();
        svc.book(1, day(), "09:00", "A").await.unwrap();
        svc.book(1, later, "11:00", "A").await.unwrap();
        svc.book(1, later, "09:00", "B").await.unwrap();

        let mine = svc.member_reservations("A").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].date, later);
        assert_eq!(mine[1].date, day());
    }

    #[tokio::test]
    async fn simultaneous_bookings_one_wins() {
        let (svc, engine) = service("two_members.wal");
        let svc = Arc::new(svc);
        let a = tokio::spawn({
            let svc = svc.clone();
            async move { svc.book(1, day(), "10:00", "A").await }
        });
        let b = tokio::spawn({
            let svc = svc.clone();
            async move { svc.book(1, day(), "10:00", "B").await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(BookingError::Conflict { .. })))
                .count(),
            1
        );
        assert_eq!(engine.reservations_on(1, day()).await.len(), 1);
    }
}
