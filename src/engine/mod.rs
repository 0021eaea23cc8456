mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::LedgerError;
pub use store::{DayState, InMemoryStore, SharedDay};

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, warn};

use crate::ledger::ReservationLedger;
use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::wal::{Wal, WalLock};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    /// Make the next fsync fail after the batch reached the file.
    #[cfg(test)]
    FailNextSync {
        response: oneshot::Sender<()>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // Nobody in the batch is acknowledged, so none of it may replay.
        if let Err(e) = wal.rollback() {
            error!("cannot roll back failed WAL batch, refusing further appends: {e}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::FailNextSync { response } => {
            wal.fail_next_sync = true;
            let _ = response.send(());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), LedgerError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| LedgerError::StorageUnavailable("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| LedgerError::StorageUnavailable("WAL writer dropped response".into()))?
        .map_err(|e| LedgerError::StorageUnavailable(e.to_string()))
}

/// WAL-backed reservation ledger.
///
/// Reservations live in memory, partitioned per (facility, date) behind one
/// async `RwLock` each. Every mutation is logged before it is applied.
pub struct Engine {
    pub(super) store: Arc<InMemoryStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an in-flight append. Always acquired
    /// before any day lock.
    pub(super) commit_gate: Arc<RwLock<()>>,
    /// Held by the engine and by every commit still running, so no other
    /// process appends to the log while either is alive.
    pub(super) lock: Arc<WalLock>,
}

impl Engine {
    /// Claim the log at `wal_path`, replay it and start its writer task.
    /// Fails with `StorageUnavailable` while another engine holds the log.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> Result<Self, LedgerError> {
        let lock = WalLock::acquire(&wal_path)?;
        let events = Wal::recover(&wal_path)?;
        let store = Arc::new(InMemoryStore::new());
        for event in &events {
            let day = store.day_or_insert(event.day_key());
            // Sole owner during replay, so this never waits.
            let Ok(mut guard) = day.try_write() else {
                warn!("replay: day {:?} is locked, record {event:?} not applied", event.day_key());
                continue;
            };
            if let Event::ReservationCreated(r) = event
                && let Some(holder) = guard.holder_of(r.hour)
            {
                warn!(
                    "replay: skipping {} for facility {} {} {}, held by {}",
                    r.id, r.facility_id, r.date, r.hour, holder.id
                );
                continue;
            }
            store.apply_event(&mut guard, event);
        }

        // Records that no longer describe a live reservation count toward
        // the next compaction.
        let backlog = events.len().saturating_sub(store.reservation_count()) as u64;
        let wal = Wal::open(&wal_path)?.with_backlog(backlog);
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            store,
            wal_tx,
            commit_gate: Arc::new(RwLock::new(())),
            lock: Arc::new(lock),
        })
    }

    #[cfg(test)]
    pub(super) async fn fail_next_wal_sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.wal_tx.send(WalCommand::FailNextSync { response: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub(super) async fn enter_commit(&self) -> OwnedRwLockReadGuard<()> {
        self.commit_gate.clone().read_owned().await
    }

    /// Log `event`, then apply it under the held day lock.
    ///
    /// The commit runs in its own task: if the caller is dropped mid-way the
    /// append still completes and is applied, so memory never falls behind
    /// the log.
    pub(super) async fn persist_and_apply(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        mut guard: OwnedRwLockWriteGuard<DayState>,
        event: Event,
    ) -> Result<(), LedgerError> {
        let store = self.store.clone();
        let wal_tx = self.wal_tx.clone();
        let lock = self.lock.clone();
        tokio::spawn(async move {
            let _lock = lock;
            let _gate = gate;
            wal_append(&wal_tx, &event).await?;
            store.apply_event(&mut guard, &event);
            Ok::<(), LedgerError>(())
        })
        .await
        .map_err(|e| LedgerError::StorageUnavailable(format!("commit task failed: {e}")))?
    }
}

#[async_trait]
impl ReservationLedger for Engine {
    async fn list_reserved_hours(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
    ) -> Result<HashSet<HourMinute>, LedgerError> {
        Ok(self.reserved_hours(facility_id, date).await)
    }

    async fn create(&self, reservation: NewReservation) -> Result<ReservationId, LedgerError> {
        self.create_reservation(reservation).await
    }

    async fn list_by_member(&self, member_id: &str) -> Result<Vec<Reservation>, LedgerError> {
        Ok(self.reservations_for_member(member_id).await)
    }

    async fn delete(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        self.delete_reservation(id).await
    }
}
