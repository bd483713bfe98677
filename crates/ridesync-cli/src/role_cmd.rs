//! Role subcommands: grant, revoke, show.
//!
//! Roles are managed out of band, directly against the database; no
//! principal is needed.

use std::io::{self, Write};

use ridesync_core::{Role, UserId};

use crate::session::Session;

pub async fn grant(session: &Session, user: &str, role: Role) -> anyhow::Result<()> {
    let user = UserId::from(user);
    let added = session.database().grant_role(&user, role).await?;
    let mut out = io::stdout();
    if added {
        writeln!(out, "Granted {role} to {user}")?;
    } else {
        writeln!(out, "{user} already has {role}")?;
    }
    Ok(())
}

pub async fn revoke(session: &Session, user: &str, role: Role) -> anyhow::Result<()> {
    let user = UserId::from(user);
    let removed = session.database().revoke_role(&user, role).await?;
    let mut out = io::stdout();
    if removed {
        writeln!(out, "Revoked {role} from {user}")?;
    } else {
        writeln!(out, "{user} does not have {role}")?;
    }
    Ok(())
}

pub async fn show(session: &Session, user: &str) -> anyhow::Result<()> {
    let user = UserId::from(user);
    let roles = session.database().roles_for(&user).await?;
    let mut out = io::stdout();
    if roles.is_empty() {
        writeln!(out, "{user} has no roles")?;
    } else {
        writeln!(out, "{user}: {roles}")?;
    }
    Ok(())
}
