pub mod availability;
pub mod booking;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reminder;
pub mod slots;
pub mod wal;
