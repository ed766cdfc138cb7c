use std::sync::Arc;

use serenity::async_trait;
use serenity::builder::{CreateInteractionResponse, CreateInteractionResponseMessage};
use serenity::model::application::{ComponentInteraction, Interaction};
use serenity::model::gateway::Ready;
use serenity::model::id::{GuildId, RoleId};
use serenity::prelude::{Context, EventHandler};
use tracing::{info, warn};

use muster_scheduler::types::AttendanceState;

use crate::announce;
use crate::commands;
use crate::context::MusterAppContext;

/// Serenity event handler wired to the attendance backend.
pub struct MusterHandler<C: MusterAppContext + 'static> {
    pub ctx: Arc<C>,
}

#[async_trait]
impl<C: MusterAppContext + 'static> EventHandler for MusterHandler<C> {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(name = %ready.user.name, "Discord bot connected");
        commands::register_commands(&ctx, self.ctx.command_guild().map(GuildId::new)).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) if command.data.name == "attendance" => {
                commands::handle_interaction(&self.ctx, &ctx, &command).await;
            }
            Interaction::Component(component)
                if component.data.custom_id.starts_with("muster:") =>
            {
                self.handle_signup_button(&ctx, &component).await;
            }
            _ => {}
        }
    }
}

impl<C: MusterAppContext + 'static> MusterHandler<C> {
    /// Attend/Revoke button press on an announcement.
    async fn handle_signup_button(&self, ctx: &Context, component: &ComponentInteraction) {
        let Some(guild_id) = component.guild_id else {
            return;
        };

        let event = match self.ctx.events().get_by_message(
            guild_id.get(),
            component.channel_id.get(),
            component.message.id.get(),
        ) {
            Ok(Some(event)) => event,
            Ok(None) => {
                notice(ctx, component, "This message is not an attendance announcement.").await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "attendance lookup for button press failed");
                return;
            }
        };

        if event.state != AttendanceState::Listening {
            notice(ctx, component, "Sign-up is closed for this event.").await;
            return;
        }

        let user_id = component.user.id.get();
        let attending = component.data.custom_id == announce::ATTEND_BUTTON;
        let outcome = if attending {
            self.ctx.attendees().register(event.id, user_id)
        } else {
            self.ctx.attendees().revoke(event.id, user_id)
        };
        if let Err(e) = outcome {
            warn!(event_id = event.id, user_id, error = %e, "roster update failed");
            notice(ctx, component, "Something went wrong, try again.").await;
            return;
        }

        // Mirror the sign-up in the notify role, when one exists.
        if let Some(role_id) = event.notify_role_id {
            let reason = if attending {
                "attendance sign-up"
            } else {
                "attendance sign-up revoked"
            };
            let result = if attending {
                ctx.http
                    .add_member_role(guild_id, component.user.id, RoleId::new(role_id), Some(reason))
                    .await
            } else {
                ctx.http
                    .remove_member_role(
                        guild_id,
                        component.user.id,
                        RoleId::new(role_id),
                        Some(reason),
                    )
                    .await
            };
            if let Err(e) = result {
                warn!(event_id = event.id, user_id, role_id, error = %e,
                    "notify role update failed");
            }
        }

        // Refresh the roster shown on the announcement in the same
        // response.
        let roster = self
            .ctx
            .attendees()
            .list_event(event.id)
            .unwrap_or_default();
        let response = CreateInteractionResponse::UpdateMessage(
            CreateInteractionResponseMessage::new()
                .embed(announce::active_embed(&event, &roster))
                .components(announce::signup_buttons()),
        );
        if let Err(e) = component.create_response(&ctx.http, response).await {
            warn!(event_id = event.id, error = %e, "announcement refresh failed");
        }
    }
}

/// Ephemeral notice for a button press that changes nothing.
async fn notice(ctx: &Context, component: &ComponentInteraction, content: &str) {
    let _ = component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await;
}
