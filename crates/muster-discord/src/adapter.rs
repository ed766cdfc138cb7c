use std::sync::Arc;
use std::time::Duration;

use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use muster_core::config::{DiscordConfig, SchedulerConfig};
use muster_scheduler::{AttendeeStore, Collaborators, SchedulerEngine};

use crate::announce::DiscordPorts;
use crate::context::MusterAppContext;
use crate::handler::MusterHandler;

/// Everything the scheduler engine needs that only exists once the first
/// Discord client is built (its REST handle).
pub struct SchedulerBoot {
    pub engine_conn: rusqlite::Connection,
    pub attendees: AttendeeStore,
    pub wake: Arc<Notify>,
    pub config: SchedulerConfig,
    pub shutdown: watch::Receiver<bool>,
}

/// Discord adapter.
///
/// Wraps a serenity `Client` and drives the event loop until the process
/// exits. Reconnects automatically whenever the gateway drops — the bot
/// is always online.
pub struct MusterAdapter<C: MusterAppContext + 'static> {
    ctx: Arc<C>,
    config: DiscordConfig,
}

impl<C: MusterAppContext + 'static> MusterAdapter<C> {
    pub fn new(config: &DiscordConfig, ctx: Arc<C>) -> Self {
        Self {
            ctx,
            config: config.clone(),
        }
    }

    /// Connect to Discord and keep reconnecting whenever the gateway
    /// drops. Never returns — runs for the lifetime of the process.
    ///
    /// If `boot` is `Some`, the scheduler engine is spawned once. It uses
    /// `Arc<Http>` (Discord REST, not the gateway WebSocket), so it keeps
    /// working across reconnects without needing to be restarted.
    pub async fn run(self, boot: Option<SchedulerBoot>) {
        let intents = GatewayIntents::GUILDS;

        // Build first client — retry indefinitely until initial connection
        // succeeds.
        let first_client = loop {
            match self.build_client(intents).await {
                Ok(c) => break c,
                Err(e) => {
                    error!("Discord: initial connect failed ({e}), retrying in 30s");
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        };

        if let Some(boot) = boot {
            let ports = Arc::new(DiscordPorts::new(Arc::clone(&first_client.http)));
            let collaborators = Collaborators {
                announce: ports.clone(),
                roles: ports,
                attendees: Arc::new(boot.attendees),
            };
            match SchedulerEngine::new(boot.engine_conn, collaborators, boot.wake, boot.config) {
                Ok(engine) => {
                    tokio::spawn(engine.run(boot.shutdown));
                }
                Err(e) => error!("scheduler engine init failed: {e}"),
            }
        }

        let mut client = first_client;

        loop {
            info!("Discord: gateway connecting");

            if let Err(e) = client.start().await {
                warn!("Discord: gateway error ({e}), reconnecting in 5s");
            } else {
                info!("Discord: gateway stopped cleanly, reconnecting in 5s");
            }

            tokio::time::sleep(Duration::from_secs(5)).await;

            // Rebuild the client for the next attempt.
            client = loop {
                match self.build_client(intents).await {
                    Ok(c) => break c,
                    Err(e) => {
                        error!("Discord: reconnect failed ({e}), retrying in 30s");
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            };
        }
    }

    /// Build a fresh serenity `Client` with our event handler.
    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, serenity::Error> {
        let handler = MusterHandler {
            ctx: Arc::clone(&self.ctx),
        };

        Client::builder(&self.config.bot_token, intents)
            .event_handler(handler)
            .await
    }
}
