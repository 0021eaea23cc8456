use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clubslot::availability::free_starts;
use clubslot::booking::{BookingError, BookingService};
use clubslot::catalog::{FacilityCatalog, JsonCatalog};
use clubslot::config::{Cli, Command};
use clubslot::engine::{Engine, LedgerError};
use clubslot::model::SlotStatus;
use clubslot::reminder::{LogScheduler, Reminder, ReminderScheduler};

fn exit_code(err: &BookingError) -> u8 {
    match err {
        BookingError::InvalidRequest(_) | BookingError::InvalidConfiguration(_) => 2,
        BookingError::Conflict { .. } => 3,
        BookingError::NotFound(_) => 4,
        BookingError::StorageUnavailable(_) => 5,
    }
}

/// Exit status of a run. A failed end-of-run compaction is logged but does
/// not change the command's outcome.
fn finish(outcome: Result<(), BookingError>, compaction: Result<bool, LedgerError>) -> u8 {
    match compaction {
        Ok(true) => info!("reservation log compacted"),
        Ok(false) => {}
        Err(e) => error!("compaction failed, log left as is: {e}"),
    }
    match outcome {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            exit_code(&e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    clubslot::observability::init(cli.metrics_port)?;

    let catalog = Arc::new(JsonCatalog::load(&cli.catalog_path())?);
    std::fs::create_dir_all(&cli.data_dir)?;
    let engine = Arc::new(Engine::new(cli.wal_path())?);
    info!(
        "loaded {} facilities, {} reservations from {}",
        catalog.len(),
        engine.reservation_count(),
        cli.data_dir.display()
    );

    let service = BookingService::new(engine.clone(), catalog.clone());
    let reminders = LogScheduler;
    let now = chrono::Local::now().naive_local();

    let outcome = match cli.command {
        Command::Facilities => {
            for f in catalog.list_facilities() {
                println!(
                    "{:>4}  {:<24} {}-{} every {} min{}",
                    f.id,
                    f.name,
                    f.opens_at,
                    f.closes_at,
                    f.slot_minutes,
                    if f.bookable { "" } else { "  (not bookable)" }
                );
            }
            Ok(())
        }
        Command::Slots { facility, date } => service.availability(facility, date, now).await.map(|slots| {
            for s in &slots {
                let status = match s.status {
                    SlotStatus::Free => "free",
                    SlotStatus::Booked => "booked",
                    SlotStatus::Elapsed => "elapsed",
                };
                println!("{}  {status}", s.slot.start);
            }
            info!("{} of {} slots free", free_starts(&slots).len(), slots.len());
        }),
        Command::Book { facility, date, hour, member } => {
            service.book(facility, date, &hour, &member).await.map(|booked| {
                let r = &booked.reservation;
                println!("{}  facility {} on {} at {} for {}", r.id, r.facility_id, r.date, r.hour, r.member_id);
                if let Some(reminder) = Reminder::for_reservation(r, cli.reminder_lead_minutes, now) {
                    reminders.schedule(reminder);
                }
            })
        }
        Command::Cancel { reservation } => service.cancel(reservation).await.map(|r| {
            reminders.cancel(r.id);
            println!("cancelled {}  facility {} on {} at {}", r.id, r.facility_id, r.date, r.hour);
        }),
        Command::Mine { member } => service.member_reservations(&member).await.map(|list| {
            for r in list {
                println!("{}  facility {} on {} at {}", r.id, r.facility_id, r.date, r.hour);
            }
        }),
    };

    let compaction = engine.compact_if_needed(cli.compact_threshold).await;
    Ok(ExitCode::from(finish(outcome, compaction)))
}
