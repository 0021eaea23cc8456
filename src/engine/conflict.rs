use crate::limits::*;
use crate::model::*;

use super::store::DayState;
use super::LedgerError;

pub(crate) fn validate_new(reservation: &NewReservation) -> Result<(), LedgerError> {
    if reservation.member_id.len() > MAX_MEMBER_ID_LEN {
        return Err(LedgerError::LimitExceeded("member id too long"));
    }
    Ok(())
}

/// Write-time re-check. Caller holds the day's write lock, so the answer
/// cannot go stale before the commit.
pub(crate) fn check_hour_free(day: &DayState, reservation: &NewReservation) -> Result<(), LedgerError> {
    if let Some(existing) = day.holder_of(reservation.hour) {
        return Err(LedgerError::Conflict {
            facility_id: reservation.facility_id,
            date: reservation.date,
            hour: reservation.hour,
            existing: existing.id,
        });
    }
    if day.len() >= MAX_RESERVATIONS_PER_DAY {
        return Err(LedgerError::LimitExceeded("too many reservations on this day"));
    }
    Ok(())
}
