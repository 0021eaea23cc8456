use chrono::NaiveDate;

use crate::model::{FacilityId, HourMinute, ReservationId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("facility {facility_id} at {hour} on {date} is already reserved ({existing})")]
    Conflict {
        facility_id: FacilityId,
        date: NaiveDate,
        hour: HourMinute,
        existing: ReservationId,
    },
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::StorageUnavailable(e.to_string())
    }
}
