use std::collections::BTreeMap;
use std::path::Path;

use crate::model::{Facility, FacilityId};

/// Read-only source of facility configuration.
pub trait FacilityCatalog: Send + Sync {
    fn get_facility(&self, id: FacilityId) -> Option<Facility>;

    fn list_facilities(&self) -> Vec<Facility>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate facility id {0}")]
    DuplicateId(FacilityId),
}

/// Facilities loaded once from a JSON array. Window bounds may be written
/// `HH:MM` or `HH:MM:SS`. Misconfigured windows are accepted here and
/// rejected when slots are computed.
#[derive(Debug, Default)]
pub struct JsonCatalog {
    facilities: BTreeMap<FacilityId, Facility>,
}

impl JsonCatalog {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let list: Vec<Facility> = serde_json::from_str(json)?;
        Self::from_facilities(list)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_facilities(list: Vec<Facility>) -> Result<Self, CatalogError> {
        let mut facilities = BTreeMap::new();
        for f in list {
            let id = f.id;
            if facilities.insert(id, f).is_some() {
                return Err(CatalogError::DuplicateId(id));
            }
        }
        Ok(Self { facilities })
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }
}

impl FacilityCatalog for JsonCatalog {
    fn get_facility(&self, id: FacilityId) -> Option<Facility> {
        self.facilities.get(&id).cloned()
    }

    fn list_facilities(&self) -> Vec<Facility> {
        self.facilities.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUB: &str = r#"[
        {"id": 2, "name": "Meeting room", "kind": "room", "capacity": 12,
         "opens_at": "08:00:00", "closes_at": "20:00:00", "slot_minutes": 120},
        {"id": 1, "name": "Tennis 1", "kind": "court", "capacity": 4,
         "opens_at": "09:00", "closes_at": "13:00", "slot_minutes": 60,
         "staff_id": 7, "rental_price": 12.5},
        {"id": 3, "name": "Old squash court", "opens_at": "10:00",
         "closes_at": "09:00", "slot_minutes": 45, "bookable": false}
    ]"#;

    #[test]
    fn loads_and_orders_by_id() {
        let catalog = JsonCatalog::from_json(CLUB).unwrap();
        assert_eq!(catalog.len(), 3);
        let ids: Vec<FacilityId> = catalog.list_facilities().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let tennis = catalog.get_facility(1).unwrap();
        assert_eq!(tennis.staff_id, Some(7));
        assert_eq!(tennis.opens_at.to_string(), "09:00");
        let room = catalog.get_facility(2).unwrap();
        assert_eq!(room.closes_at.to_string(), "20:00");
        assert!(catalog.get_facility(99).is_none());
    }

    #[test]
    fn misconfigured_facility_still_loads() {
        let catalog = JsonCatalog::from_json(CLUB).unwrap();
        let squash = catalog.get_facility(3).unwrap();
        assert!(!squash.bookable);
        assert!(squash.opens_at > squash.closes_at);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let json = r#"[
            {"id": 1, "name": "a", "opens_at": "09:00", "closes_at": "10:00", "slot_minutes": 60},
            {"id": 1, "name": "b", "opens_at": "09:00", "closes_at": "10:00", "slot_minutes": 60}
        ]"#;
        assert!(matches!(JsonCatalog::from_json(json), Err(CatalogError::DuplicateId(1))));
    }

    #[test]
    fn bad_time_is_parse_error() {
        let json = r#"[{"id": 1, "name": "a", "opens_at": "nine", "closes_at": "10:00", "slot_minutes": 60}]"#;
        assert!(matches!(JsonCatalog::from_json(json), Err(CatalogError::Parse(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("clubslot_no_such_catalog.json");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(JsonCatalog::load(&path), Err(CatalogError::Io { .. })));
    }
}
