//! Ride subcommands: request, lifecycle transitions, list.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};

use anyhow::bail;

use ridesync_core::{RideId, RideRequest, RideTransition};
use ridesync_engine::dashboard::RideLine;
use ridesync_engine::{Notice, toast};

use crate::session::Session;

/// Which rides `list` prints.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListView {
    /// Requested, accepted or in progress.
    #[default]
    Active,
    Completed,
    Cancelled,
    /// Completed and cancelled.
    History,
    /// Created today, local time.
    Today,
    /// Waiting for a driver.
    Available,
    /// Requested or driven by the signed-in user.
    Mine,
    All,
}

pub async fn request(
    session: &Session,
    pickup: &str,
    destination: &str,
    passengers: Option<i64>,
) -> anyhow::Result<()> {
    let dashboard = session.dashboard().await?;
    let notice = dashboard.request(pickup, destination, passengers).await;
    dashboard.unmount().await;
    report(&notice)
}

/// Apply `transition` to ride `id` through the principal's dashboard.
pub async fn transition(
    session: &Session,
    transition: RideTransition,
    id: &str,
) -> anyhow::Result<()> {
    let id = RideId::from(id);
    let dashboard = session.dashboard().await?;
    let notice = match transition {
        RideTransition::Accept => dashboard.accept(&id).await,
        RideTransition::Start => dashboard.start(&id).await,
        RideTransition::Complete => dashboard.complete(&id).await,
        RideTransition::Cancel => dashboard.cancel(&id).await,
    };
    dashboard.unmount().await;
    report(&notice)
}

pub async fn list(session: &Session, view: ListView) -> anyhow::Result<()> {
    let me = session.principal()?.id;
    let engine = session.engine().await;
    let snapshot = engine.snapshot();
    engine.unmount().await;
    if let Some(e) = &snapshot.last_error {
        bail!(toast(e));
    }

    let rides = &snapshot.rides;
    let selected: Vec<&RideRequest> = match view {
        ListView::Active => rides.active(),
        ListView::Completed => rides.completed(),
        ListView::Cancelled => rides.cancelled(),
        ListView::History => rides.history(),
        ListView::Today => rides.today(),
        ListView::Available => rides.available(),
        ListView::Mine => rides
            .iter()
            .filter(|r| r.rider_id == me || r.is_driven_by(&me))
            .collect(),
        ListView::All => rides.iter().collect(),
    };

    let mut out = io::stdout();
    if selected.is_empty() {
        writeln!(out, "No rides")?;
        return Ok(());
    }
    for ride in selected {
        writeln!(out, "{}", RideLine(ride))?;
    }
    Ok(())
}

/// Print a notice; errors become the command's failure.
fn report(notice: &Notice) -> anyhow::Result<()> {
    if notice.is_error() {
        bail!("{notice}");
    }
    writeln!(io::stdout(), "{notice}")?;
    Ok(())
}
