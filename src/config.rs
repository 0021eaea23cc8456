use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::model::FacilityId;
use crate::reminder::DEFAULT_LEAD_MINUTES;

/// Facility booking for a club, backed by a local reservation log.
#[derive(Debug, Parser)]
#[command(name = "clubslot", version)]
pub struct Cli {
    /// Directory holding the reservation log.
    #[arg(long, env = "CLUBSLOT_DATA_DIR", default_value = "./data", global = true)]
    pub data_dir: PathBuf,

    /// Facility catalog (JSON). Defaults to `<data-dir>/facilities.json`.
    #[arg(long, env = "CLUBSLOT_CATALOG", global = true)]
    pub catalog: Option<PathBuf>,

    /// Log records written since the last compaction before compacting.
    #[arg(long, env = "CLUBSLOT_COMPACT_THRESHOLD", default_value_t = 1000, global = true)]
    pub compact_threshold: u64,

    /// How long before a slot starts the member is reminded.
    #[arg(long, env = "CLUBSLOT_REMINDER_LEAD_MINUTES", default_value_t = DEFAULT_LEAD_MINUTES, global = true)]
    pub reminder_lead_minutes: i64,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "CLUBSLOT_METRICS_PORT", global = true)]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List configured facilities.
    Facilities,
    /// Show the slots of a facility on a date.
    Slots {
        #[arg(long)]
        facility: FacilityId,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Reserve a slot.
    Book {
        #[arg(long)]
        facility: FacilityId,
        #[arg(long)]
        date: NaiveDate,
        /// Slot start as `HH:MM`.
        #[arg(long)]
        hour: String,
        #[arg(long)]
        member: String,
    },
    /// Cancel a reservation by id.
    Cancel {
        #[arg(long)]
        reservation: ulid::Ulid,
    },
    /// List a member's reservations, newest date first.
    Mine {
        #[arg(long)]
        member: String,
    },
}

impl Cli {
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| self.data_dir.join("facilities.json"))
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
