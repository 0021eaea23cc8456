use chrono::{Duration, NaiveDateTime};
use tracing::info;

use crate::model::{FacilityId, Reservation, ReservationId};

pub const DEFAULT_LEAD_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub reservation_id: ReservationId,
    pub facility_id: FacilityId,
    pub member_id: String,
    /// Slot start, local time.
    pub starts_at: NaiveDateTime,
    pub fire_at: NaiveDateTime,
}

impl Reminder {
    /// Reminder `lead_minutes` before the reserved slot, or `None` when that
    /// moment has already passed.
    pub fn for_reservation(reservation: &Reservation, lead_minutes: i64, now: NaiveDateTime) -> Option<Self> {
        let starts_at = reservation.date.and_time(reservation.hour.to_naive_time());
        let fire_at = starts_at - Duration::minutes(lead_minutes);
        if fire_at < now {
            return None;
        }
        Some(Self {
            reservation_id: reservation.id,
            facility_id: reservation.facility_id,
            member_id: reservation.member_id.clone(),
            starts_at,
            fire_at,
        })
    }
}

/// Fire-and-forget hand-off to whatever delivers notifications.
pub trait ReminderScheduler: Send + Sync {
    fn schedule(&self, reminder: Reminder);

    fn cancel(&self, reservation_id: ReservationId);
}

/// Logs reminders instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScheduler;

impl ReminderScheduler for LogScheduler {
    fn schedule(&self, reminder: Reminder) {
        info!(
            "reminder for {} at {}: facility {} starts {}",
            reminder.member_id, reminder.fire_at, reminder.facility_id, reminder.starts_at
        );
    }

    fn cancel(&self, reservation_id: ReservationId) {
        info!("reminder for reservation {reservation_id} cancelled");
    }
}
