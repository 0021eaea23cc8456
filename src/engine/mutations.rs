use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_hour_free, validate_new};
use super::{Engine, LedgerError, WalCommand};

impl Engine {
    /// Insert a reservation if its (facility, date, hour) is still free.
    ///
    /// The re-check and the write happen under the day's write lock, so of
    /// several concurrent creates for the same hour exactly one succeeds.
    pub async fn create_reservation(&self, new: NewReservation) -> Result<ReservationId, LedgerError> {
        validate_new(&new)?;
        let gate = self.enter_commit().await;
        let day = self.store.day_or_insert((new.facility_id, new.date));
        let guard = day.write_owned().await;

        if let Err(e) = check_hour_free(&guard, &new) {
            if matches!(e, LedgerError::Conflict { .. }) {
                metrics::counter!(crate::observability::LEDGER_CONFLICTS_TOTAL).increment(1);
                debug!("create rejected at write time: {e}");
            }
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            facility_id: new.facility_id,
            date: new.date,
            hour: new.hour,
            member_id: new.member_id,
            staff_id: new.staff_id,
        };
        let id = reservation.id;
        info!(
            "reserving facility {} on {} at {} for {} ({id})",
            reservation.facility_id, reservation.date, reservation.hour, reservation.member_id
        );
        self.persist_and_apply(gate, guard, Event::ReservationCreated(reservation))
            .await?;
        Ok(id)
    }

    pub async fn delete_reservation(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        let gate = self.enter_commit().await;
        let (facility_id, date) = self.store.locate(&id).ok_or(LedgerError::NotFound(id))?;
        let day = self
            .store
            .get_day(&(facility_id, date))
            .ok_or(LedgerError::NotFound(id))?;
        let guard = day.write_owned().await;
        // A concurrent delete may have won while we waited for the lock.
        let existing = guard.find(&id).cloned().ok_or(LedgerError::NotFound(id))?;

        let event = Event::ReservationDeleted { id, facility_id, date };
        self.persist_and_apply(gate, guard, event).await?;
        info!("cancelled reservation {id} (facility {facility_id} on {date} at {})", existing.hour);
        Ok(existing)
    }

    /// Rewrite the WAL as one create record per live reservation.
    /// Returns the number of records written.
    pub async fn compact_wal(&self) -> Result<usize, LedgerError> {
        let _exclusive = self.commit_gate.write().await;
        let pruned = self.store.prune_empty_days();

        let mut live = Vec::new();
        for day in self.store.all_days() {
            let guard = day.read().await;
            live.extend(guard.reservations.values().cloned());
        }
        live.sort_by(|a, b| {
            (a.facility_id, a.date, a.hour).cmp(&(b.facility_id, b.date, b.hour))
        });
        let written = live.len();
        let events = live.into_iter().map(Event::ReservationCreated).collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| LedgerError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| LedgerError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| LedgerError::StorageUnavailable(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted WAL to {written} records, dropped {pruned} empty days");
        Ok(written)
    }

    /// Compact once the log carries at least `threshold` records beyond the
    /// last snapshot. Returns whether a compaction ran.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, LedgerError> {
        if self.wal_appends_since_compact().await < threshold {
            return Ok(false);
        }
        self.compact_wal().await?;
        Ok(true)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
