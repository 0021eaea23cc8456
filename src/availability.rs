use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};

use crate::model::*;
use crate::slots::{compute_slots, ScheduleError};

/// Tag each of the facility's slots on `date` as free, booked or elapsed.
///
/// `reserved` must already be normalized to `HourMinute`; `now` is the
/// caller's wall clock in the club's local time. Booked wins over elapsed.
pub fn resolve(
    facility: &Facility,
    date: NaiveDate,
    reserved: &HashSet<HourMinute>,
    now: NaiveDateTime,
) -> Result<Vec<ResolvedSlot>, ScheduleError> {
    if !facility.bookable {
        return Err(ScheduleError::NotBookable(facility.id));
    }
    let starts = compute_slots(facility.opens_at, facility.closes_at, facility.slot_minutes)?;
    let duration_minutes = facility.slot_minutes.clamp(0, MINUTES_PER_DAY as i32) as u16;

    let is_today = date == now.date();
    let current = HourMinute::from(now.time());

    Ok(starts
        .into_iter()
        .map(|start| {
            let status = if reserved.contains(&start) {
                SlotStatus::Booked
            } else if is_today && start <= current {
                SlotStatus::Elapsed
            } else {
                SlotStatus::Free
            };
            ResolvedSlot {
                slot: Slot {
                    facility_id: facility.id,
                    date,
                    start,
                    duration_minutes,
                },
                status,
            }
        })
        .collect())
}

/// Free slot start times only, in order.
pub fn free_starts(resolved: &[ResolvedSlot]) -> Vec<HourMinute> {
    resolved
        .iter()
        .filter(|r| r.status == SlotStatus::Free)
        .map(|r| r.slot.start)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(s: &str) -> HourMinute {
        HourMinute::parse_strict(s).unwrap()
    }

    fn facility(opens: &str, closes: &str, slot_minutes: i32) -> Facility {
        Facility {
            id: 1,
            name: "Tennis 1".into(),
            kind: Some("court".into()),
            capacity: 4,
            opens_at: hm(opens),
            closes_at: hm(closes),
            slot_minutes,
            bookable: true,
            staff_id: None,
            rental_price: 0.0,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(d: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        d.and_hms_opt(h, m, 0).unwrap()
    }

    fn statuses(resolved: &[ResolvedSlot]) -> Vec<(String, SlotStatus)> {
        resolved
            .iter()
            .map(|r| (r.slot.start.to_string(), r.status))
            .collect()
    }

    #[test]
    fn booked_slot_marked() {
        let day = date(2024, 6, 1);
        let reserved = HashSet::from([hm("10:00")]);
        let resolved = resolve(&facility("09:00", "13:00", 60), day, &reserved, at(date(2024, 5, 30), 8, 0)).unwrap();
        assert_eq!(
            statuses(&resolved),
            vec![
                ("09:00".to_string(), SlotStatus::Free),
                ("10:00".to_string(), SlotStatus::Booked),
                ("11:00".to_string(), SlotStatus::Free),
                ("12:00".to_string(), SlotStatus::Free),
            ]
        );
        assert!(resolved.iter().all(|r| r.slot.duration_minutes == 60 && r.slot.date == day));
    }

    #[test]
    fn elapsed_only_today_and_inclusive() {
        let day = date(2024, 6, 1);
        let resolved = resolve(&facility("09:00", "13:00", 60), day, &HashSet::new(), at(day, 10, 0)).unwrap();
        assert_eq!(
            resolved.iter().map(|r| r.status).collect::<Vec<_>>(),
            vec![SlotStatus::Elapsed, SlotStatus::Elapsed, SlotStatus::Free, SlotStatus::Free]
        );

        let tomorrow = date(2024, 6, 2);
        let resolved = resolve(&facility("09:00", "13:00", 60), tomorrow, &HashSet::new(), at(day, 23, 0)).unwrap();
        assert!(resolved.iter().all(|r| r.status == SlotStatus::Free));
    }

    #[test]
    fn elapsed_uses_minute_resolution() {
        let day = date(2024, 6, 1);
        let now = day.and_hms_opt(9, 59, 59).unwrap();
        let resolved = resolve(&facility("09:00", "11:00", 60), day, &HashSet::new(), now).unwrap();
        assert_eq!(resolved[1].status, SlotStatus::Free);
    }

    #[test]
    fn booked_takes_priority_over_elapsed() {
        let day = date(2024, 6, 1);
        let reserved = HashSet::from([hm("09:00")]);
        let resolved = resolve(&facility("09:00", "11:00", 60), day, &reserved, at(day, 12, 0)).unwrap();
        assert_eq!(resolved[0].status, SlotStatus::Booked);
        assert_eq!(resolved[1].status, SlotStatus::Elapsed);
    }

    #[test]
    fn reserved_hours_from_storage_match_after_normalization() {
        let day = date(2024, 6, 1);
        let reserved: HashSet<HourMinute> = ["10:00:00", "9:00"]
            .iter()
            .map(|raw| HourMinute::normalize(raw).unwrap())
            .collect();
        let resolved = resolve(&facility("09:00", "11:00", 60), day, &reserved, at(date(2024, 1, 1), 0, 0)).unwrap();
        assert!(resolved.iter().all(|r| r.status == SlotStatus::Booked));
    }

    #[test]
    fn misconfigured_facility_surfaces_error() {
        let day = date(2024, 6, 1);
        let err = resolve(&facility("13:00", "09:00", 60), day, &HashSet::new(), at(day, 0, 0)).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidConfiguration { .. }));
        let err = resolve(&facility("09:00", "13:00", 0), day, &HashSet::new(), at(day, 0, 0)).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidConfiguration { .. }));
    }

    #[test]
    fn not_bookable_facility() {
        let day = date(2024, 6, 1);
        let mut f = facility("09:00", "13:00", 60);
        f.bookable = false;
        let err = resolve(&f, day, &HashSet::new(), at(day, 0, 0)).unwrap_err();
        assert_eq!(err, ScheduleError::NotBookable(1));
    }

    #[test]
    fn free_starts_filters() {
        let day = date(2024, 6, 1);
        let reserved = HashSet::from([hm("11:00")]);
        let resolved = resolve(&facility("09:00", "13:00", 60), day, &reserved, at(day, 9, 30)).unwrap();
        assert_eq!(free_starts(&resolved), vec![hm("10:00"), hm("12:00")]);
    }
}
