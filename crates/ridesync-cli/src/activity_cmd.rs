//! Activity log and live dashboard subcommands.

use std::io::{self, Write};

use anyhow::bail;
use chrono::Local;
use tracing::info;

use ridesync_core::config::ActivityConfig;
use ridesync_engine::{ActivityFeed, toast};

use crate::session::Session;

/// Print the newest `limit` activity entries.
pub async fn recent(session: &Session, limit: usize) -> anyhow::Result<()> {
    let principal = session.principal()?;
    if !principal.can_view_activity() {
        bail!("The activity log is only visible to employers and admins");
    }

    let feed = ActivityFeed::mount(
        session.store(),
        session.identity().subscribe(),
        &session.config().sync,
        &ActivityConfig { window: limit },
    );
    let snapshot = feed.loaded().await;
    feed.unmount().await;
    if let Some(e) = &snapshot.last_error {
        bail!(toast(e));
    }

    let mut out = io::stdout();
    if snapshot.entries.is_empty() {
        writeln!(out, "No activity yet")?;
    }
    for entry in snapshot.entries.iter() {
        writeln!(
            out,
            "{}  {:<15}  {}",
            entry.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            entry.action_type.as_str(),
            entry.action_description
        )?;
    }
    Ok(())
}

/// Print the principal's dashboard, then again on every change until
/// Ctrl-C.
pub async fn watch(session: &Session) -> anyhow::Result<()> {
    let dashboard = session.dashboard().await?;
    let mut changes = dashboard.changes();
    let mut out = io::stdout();
    let mut shown = None;

    loop {
        let view = dashboard.view();
        if shown.as_ref() != Some(&view) {
            writeln!(out, "{view}")?;
            out.flush()?;
            shown = Some(view);
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            more = changes.next() => {
                if !more {
                    break;
                }
            }
        }
    }

    dashboard.unmount().await;
    Ok(())
}
