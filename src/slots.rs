use crate::model::{FacilityId, HourMinute};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule: window {start}-{end}, slot length {slot_minutes} min")]
    InvalidConfiguration {
        start: HourMinute,
        end: HourMinute,
        slot_minutes: i32,
    },
    #[error("facility {0} is not bookable")]
    NotBookable(FacilityId),
}

/// Start times of the bookable slots in `[window_start, window_end)`.
///
/// A slot length that covers the whole window (or more) yields a single slot
/// at `window_start`. Otherwise slots are laid back to back and a trailing
/// slot that would run past `window_end` is dropped.
pub fn compute_slots(
    window_start: HourMinute,
    window_end: HourMinute,
    slot_minutes: i32,
) -> Result<Vec<HourMinute>, ScheduleError> {
    let start = window_start.minutes() as i32;
    let end = window_end.minutes() as i32;
    if start >= end || slot_minutes <= 0 {
        return Err(ScheduleError::InvalidConfiguration {
            start: window_start,
            end: window_end,
            slot_minutes,
        });
    }

    let window = end - start;
    if slot_minutes >= window {
        return Ok(vec![window_start]);
    }

    let count = window / slot_minutes;
    let mut slots = Vec::with_capacity(count as usize);
    for i in 0..count {
        let at = start + i * slot_minutes;
        if at + slot_minutes > end {
            break;
        }
        // `at < end <= 1439`, always representable.
        if let Some(hm) = HourMinute::from_minutes(at as u16) {
            slots.push(hm);
        }
    }
    Ok(slots)
}
