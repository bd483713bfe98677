//! RideSync CLI
//!
//! Local front end over the ride store: manage roles, move rides through
//! their lifecycle and watch a role dashboard update live.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use ridesync_cli::ride_cmd::{self, ListView};
use ridesync_cli::session::Session;
use ridesync_cli::{activity_cmd, role_cmd};
use ridesync_core::config::load_config;
use ridesync_core::tracing_init::init_tracing;
use ridesync_core::{RideTransition, Role};

#[derive(Parser, Debug)]
#[command(name = "ridesync")]
#[command(version, about = "Ride coordination from the command line", long_about = None)]
struct Cli {
    /// Ride database (defaults to the per-user data directory)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "ridesync_engine=trace,sqlx=warn"
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// User to act as
    #[arg(long = "as", global = true, env = "RIDESYNC_USER", value_name = "USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Give a user a role.
    GrantRole { user: String, role: Role },
    /// Take a role away from a user.
    RevokeRole { user: String, role: Role },
    /// Show a user's roles.
    Roles { user: String },
    /// Request a ride as the current user.
    Request {
        #[arg(long)]
        pickup: String,
        #[arg(long)]
        destination: String,
        /// Defaults to 1.
        #[arg(long, allow_negative_numbers = true)]
        passengers: Option<i64>,
    },
    /// Accept a requested ride (drivers).
    Accept { id: String },
    /// Start an accepted ride (the assigned driver).
    Start { id: String },
    /// Complete a ride in progress (the assigned driver).
    Complete { id: String },
    /// Cancel a ride that has not finished.
    Cancel { id: String },
    /// List the rides visible to the current user.
    List {
        #[arg(long, value_enum, default_value_t = ListView::Active)]
        view: ListView,
    },
    /// Show the newest activity log entries (employers and admins).
    Activity {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show the current user's dashboard and follow changes until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let project_dir = std::env::current_dir().ok();
    let mut config = load_config(project_dir.as_deref())?;
    if let Some(path) = cli.db_path {
        config.store.database_path = Some(path);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_tracing(&config.log_level, cli.log_json)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ridesync");

    let session = Session::open(config, cli.user.as_deref()).await?;
    match cli.command {
        Commands::GrantRole { user, role } => role_cmd::grant(&session, &user, role).await,
        Commands::RevokeRole { user, role } => role_cmd::revoke(&session, &user, role).await,
        Commands::Roles { user } => role_cmd::show(&session, &user).await,
        Commands::Request {
            pickup,
            destination,
            passengers,
        } => ride_cmd::request(&session, &pickup, &destination, passengers).await,
        Commands::Accept { id } => {
            ride_cmd::transition(&session, RideTransition::Accept, &id).await
        }
        Commands::Start { id } => ride_cmd::transition(&session, RideTransition::Start, &id).await,
        Commands::Complete { id } => {
            ride_cmd::transition(&session, RideTransition::Complete, &id).await
        }
        Commands::Cancel { id } => {
            ride_cmd::transition(&session, RideTransition::Cancel, &id).await
        }
        Commands::List { view } => ride_cmd::list(&session, view).await,
        Commands::Activity { limit } => activity_cmd::recent(&session, limit).await,
        Commands::Watch => activity_cmd::watch(&session).await,
    }
}
