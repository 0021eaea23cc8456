use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

pub type FacilityId = i64;
pub type StaffId = i64;
pub type ReservationId = Ulid;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Time of day at minute resolution. Renders as zero-padded `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HourMinute(u16);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed time of day: {0:?}")]
pub struct MalformedTime(pub String);

impl HourMinute {
    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self(hour * 60 + minute))
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }

    /// Strict `HH:MM`: exactly two digits on each side of the colon.
    pub fn parse_strict(raw: &str) -> Result<Self, MalformedTime> {
        let bad = || MalformedTime(raw.to_string());
        let bytes = raw.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(bad());
        }
        let hour = two_digits(&bytes[0..2]).ok_or_else(bad)?;
        let minute = two_digits(&bytes[3..5]).ok_or_else(bad)?;
        Self::new(hour, minute).ok_or_else(bad)
    }

    /// Lenient form used for stored values: accepts an unpadded hour and
    /// discards any seconds (`9:05`, `09:05:00`, `09:05:00.000`).
    pub fn normalize(raw: &str) -> Result<Self, MalformedTime> {
        let bad = || MalformedTime(raw.to_string());
        let mut parts = raw.trim().splitn(3, ':');
        let hour = parts.next().ok_or_else(bad)?;
        let minute = parts.next().ok_or_else(bad)?;
        if hour.is_empty() || hour.len() > 2 || !hour.bytes().all(|b| b.is_ascii_digit()) || minute.len() != 2 {
            return Err(bad());
        }
        if let Some(seconds) = parts.next() {
            let whole = seconds.split('.').next().unwrap_or_default();
            if whole.len() != 2 || !whole.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
        }
        let hour: u16 = hour.parse().map_err(|_| bad())?;
        let minute = two_digits(minute.as_bytes()).ok_or_else(bad)?;
        Self::new(hour, minute).ok_or_else(bad)
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour() as u32, self.minute() as u32, 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

fn two_digits(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => {
            Some(((a - b'0') * 10 + (b - b'0')) as u16)
        }
        _ => None,
    }
}

impl From<NaiveTime> for HourMinute {
    /// Seconds are truncated.
    fn from(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }
}

impl fmt::Display for HourMinute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for HourMinute {
    type Err = MalformedTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_strict(s)
    }
}

/// Serde helper for catalog files, which may carry SQL `TIME` strings.
pub fn deserialize_lenient_time<'de, D>(deserializer: D) -> Result<HourMinute, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    HourMinute::normalize(&raw).map_err(serde::de::Error::custom)
}

/// Read-only facility configuration owned by the catalog.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(deserialize_with = "deserialize_lenient_time")]
    pub opens_at: HourMinute,
    #[serde(deserialize_with = "deserialize_lenient_time")]
    pub closes_at: HourMinute,
    /// Slot length in minutes. Zero or negative means the facility is misconfigured.
    pub slot_minutes: i32,
    #[serde(default = "default_bookable")]
    pub bookable: bool,
    #[serde(default)]
    pub staff_id: Option<StaffId>,
    #[serde(default)]
    pub rental_price: f64,
}

fn default_capacity() -> u32 {
    1
}

fn default_bookable() -> bool {
    true
}

/// A bookable interval derived from facility config. Never persisted.
/// Equality ignores the duration.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Slot {
    pub facility_id: FacilityId,
    pub date: NaiveDate,
    pub start: HourMinute,
    pub duration_minutes: u16,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.facility_id == other.facility_id
            && self.date == other.date
            && self.start == other.start
    }
}

impl Hash for Slot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.facility_id.hash(state);
        self.date.hash(state);
        self.start.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    Free,
    Booked,
    /// Today's slot whose start time has already been reached.
    Elapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSlot {
    pub slot: Slot,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub facility_id: FacilityId,
    pub date: NaiveDate,
    pub hour: HourMinute,
    pub member_id: String,
    pub staff_id: Option<StaffId>,
}

/// Input to the ledger's create path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub facility_id: FacilityId,
    pub date: NaiveDate,
    pub hour: HourMinute,
    pub member_id: String,
    pub staff_id: Option<StaffId>,
}

impl NewReservation {
    pub fn new(facility_id: FacilityId, date: NaiveDate, hour: HourMinute, member_id: impl Into<String>) -> Self {
        Self {
            facility_id,
            date,
            hour,
            member_id: member_id.into(),
            staff_id: None,
        }
    }

    pub fn with_staff(mut self, staff_id: Option<StaffId>) -> Self {
        self.staff_id = staff_id;
        self
    }
}

/// Ledger record format, written to the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated(Reservation),
    ReservationDeleted {
        id: ReservationId,
        facility_id: FacilityId,
        date: NaiveDate,
    },
}

impl Event {
    pub fn day_key(&self) -> DayKey {
        match self {
            Event::ReservationCreated(r) => (r.facility_id, r.date),
            Event::ReservationDeleted { facility_id, date, .. } => (*facility_id, *date),
        }
    }
}

/// Reservations are partitioned per facility and calendar date.
pub type DayKey = (FacilityId, NaiveDate);
