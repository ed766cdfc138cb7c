use std::sync::Arc;

use tracing::info;

use muster_core::config::MusterConfig;
use muster_discord::{MusterAdapter, MusterAppContext, SchedulerBoot};
use muster_scheduler::{AttendeeStore, SchedulerHandle};

struct AppState {
    events: SchedulerHandle,
    attendees: AttendeeStore,
    command_guild: Option<u64>,
}

impl MusterAppContext for AppState {
    fn events(&self) -> &SchedulerHandle {
        &self.events
    }

    fn attendees(&self) -> &AttendeeStore {
        &self.attendees
    }

    fn command_guild(&self) -> Option<u64> {
        self.command_guild
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "muster=info".into()),
        )
        .init();

    // load config: explicit path > MUSTER_CONFIG env > ~/.muster/muster.toml
    let config_path = std::env::var("MUSTER_CONFIG").ok();
    let config = MusterConfig::load(config_path.as_deref())?;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    // run schema migrations once (idempotent); each subsystem then gets
    // its own connection for thread safety
    let db = open_db(&db_path)?;
    muster_scheduler::db::init_db(&db)?;
    drop(db);
    info!("database migrations complete");

    let wake = Arc::new(tokio::sync::Notify::new());
    let events = SchedulerHandle::new(open_db(&db_path)?, Arc::clone(&wake))?;
    let attendees = AttendeeStore::new(open_db(&db_path)?)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let state = Arc::new(AppState {
        events,
        attendees: attendees.clone(),
        command_guild: config.discord.command_guild_id,
    });

    let boot = SchedulerBoot {
        engine_conn: open_db(&db_path)?,
        attendees,
        wake,
        config: config.scheduler.clone(),
        shutdown: shutdown_rx,
    };
    let adapter = MusterAdapter::new(&config.discord, state);

    tokio::select! {
        _ = adapter.run(Some(boot)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}

fn open_db(path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
