//! Announcement layout and the Discord-backed collaborator ports.
//!
//! All message/embed text for attendance events is produced here; the
//! scheduler core only ever sees opaque message and role ids.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::builder::{
    CreateActionRow, CreateAllowedMentions, CreateButton, CreateEmbed, CreateMessage, EditMessage,
    EditRole,
};
use serenity::http::Http;
use serenity::model::application::ButtonStyle;
use serenity::model::channel::MessageReference;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId};
use tracing::info;

use muster_scheduler::gateway::{AnnouncementPort, GatewayError, GatewayResult, RolePort};
use muster_scheduler::types::AttendanceEvent;

/// Component ids of the sign-up buttons on every active announcement.
pub const ATTEND_BUTTON: &str = "muster:attend";
pub const REVOKE_BUTTON: &str = "muster:revoke";

/// Map a serenity failure onto the scheduler's error classes: a gone or
/// forbidden target is unrecoverable, everything else is worth a retry.
fn classify(e: serenity::Error) -> GatewayError {
    if let serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(ref resp)) = e {
        if matches!(resp.status_code.as_u16(), 403 | 404) {
            return GatewayError::Unreachable(e.to_string());
        }
    }
    GatewayError::Transport(e.to_string())
}

fn when_block(next_moment: DateTime<Utc>) -> String {
    let unix = next_moment.timestamp();
    format!("**When**: <t:{unix}:F> (<t:{unix}:R>)")
}

/// The attendee section shared by the active and finished layouts.
pub fn roster_block(attendees: &[u64]) -> String {
    if attendees.is_empty() {
        return "*No sign-ups yet.*".to_string();
    }
    attendees
        .iter()
        .map(|id| format!("<@{id}>"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn body(description: Option<&str>, next_moment: DateTime<Utc>, attendees: &[u64]) -> String {
    let mut text = String::new();
    if let Some(description) = description {
        text.push_str(description);
        text.push_str("\n\n");
    }
    text.push_str(&when_block(next_moment));
    text.push_str("\n\n**Attendees**\n");
    text.push_str(&roster_block(attendees));
    text
}

/// Embed for an announcement that is open for sign-up.
pub fn active_embed(event: &AttendanceEvent, attendees: &[u64]) -> CreateEmbed {
    CreateEmbed::new().title(&event.topic).description(body(
        event.description.as_deref(),
        event.next_moment,
        attendees,
    ))
}

fn closed_embed(event: &AttendanceEvent, attendees: &[u64]) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("[Closed] {}", event.topic))
        .description(body(
            event.description.as_deref(),
            event.next_moment,
            attendees,
        ))
}

fn finished_embed(event: &AttendanceEvent, attendees: &[u64]) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("[Finished] {}", event.topic))
        .description(body(
            event.description.as_deref(),
            event.next_moment,
            attendees,
        ))
}

/// The Attend/Revoke row on every active announcement.
pub fn signup_buttons() -> Vec<CreateActionRow> {
    vec![CreateActionRow::Buttons(vec![
        CreateButton::new(ATTEND_BUTTON)
            .label("Attend")
            .style(ButtonStyle::Success),
        CreateButton::new(REVOKE_BUTTON)
            .label("Revoke")
            .style(ButtonStyle::Danger),
    ])]
}

/// The complete message for a fresh announcement. Takes plain fields so
/// the create command can publish before any event row exists.
pub fn announcement_message(
    topic: &str,
    description: Option<&str>,
    next_moment: DateTime<Utc>,
) -> CreateMessage {
    CreateMessage::new()
        .embed(
            CreateEmbed::new()
                .title(topic)
                .description(body(description, next_moment, &[])),
        )
        .components(signup_buttons())
}

/// Discord-backed implementation of the scheduler's collaborator ports.
///
/// Holds only the REST handle, which stays valid across gateway
/// reconnects.
pub struct DiscordPorts {
    http: Arc<Http>,
}

impl DiscordPorts {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl AnnouncementPort for DiscordPorts {
    async fn publish(&self, event: &AttendanceEvent) -> GatewayResult<u64> {
        let message = ChannelId::new(event.channel_id)
            .send_message(
                &self.http,
                announcement_message(&event.topic, event.description.as_deref(), event.next_moment),
            )
            .await
            .map_err(classify)?;
        Ok(message.id.get())
    }

    async fn close_signup(&self, event: &AttendanceEvent) -> GatewayResult<()> {
        ChannelId::new(event.channel_id)
            .edit_message(
                &self.http,
                MessageId::new(event.message_id),
                EditMessage::new().embed(closed_embed(event, &[])),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn finish(&self, event: &AttendanceEvent, attendees: &[u64]) -> GatewayResult<()> {
        ChannelId::new(event.channel_id)
            .edit_message(
                &self.http,
                MessageId::new(event.message_id),
                EditMessage::new()
                    .embed(finished_embed(event, attendees))
                    .components(Vec::new()),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn send_reminder(&self, event: &AttendanceEvent) -> GatewayResult<Option<u64>> {
        let Some(role_id) = event.notify_role_id else {
            return Ok(None);
        };

        // The stored role may have been deleted behind our back; a dead
        // mention would ping nobody, so degrade instead.
        let roles = GuildId::new(event.guild_id)
            .roles(&self.http)
            .await
            .map_err(classify)?;
        if !roles.contains_key(&RoleId::new(role_id)) {
            return Ok(None);
        }

        let message = ChannelId::new(event.channel_id)
            .send_message(
                &self.http,
                CreateMessage::new()
                    .content(format!("Reminder: <@&{role_id}>"))
                    .allowed_mentions(
                        CreateAllowedMentions::new().roles(vec![RoleId::new(role_id)]),
                    )
                    .reference_message(MessageReference::from((
                        ChannelId::new(event.channel_id),
                        MessageId::new(event.message_id),
                    ))),
            )
            .await
            .map_err(classify)?;
        Ok(Some(message.id.get()))
    }
}

#[async_trait]
impl RolePort for DiscordPorts {
    async fn clone_role(&self, guild_id: u64, template_role_id: u64) -> GatewayResult<Option<u64>> {
        let guild = GuildId::new(guild_id);
        let roles = guild.roles(&self.http).await.map_err(classify)?;
        let Some(template) = roles.get(&RoleId::new(template_role_id)) else {
            return Ok(None);
        };

        let created = guild
            .create_role(
                &self.http,
                EditRole::new()
                    .name(format!("{}*", template.name))
                    .permissions(template.permissions)
                    .colour(template.colour)
                    .hoist(template.hoist)
                    .mentionable(template.mentionable)
                    .audit_log_reason("attendance: fresh notify role"),
            )
            .await;

        match created {
            Ok(role) => Ok(Some(role.id.get())),
            Err(e) => {
                // A clone that cannot be created is skipped, not fatal.
                tracing::warn!(guild_id, template_role_id, error = %e, "notify role clone failed");
                Ok(None)
            }
        }
    }

    async fn delete_role(&self, guild_id: u64, role_id: u64) -> GatewayResult<()> {
        GuildId::new(guild_id)
            .delete_role(&self.http, RoleId::new(role_id))
            .await
            .map_err(classify)?;
        info!(guild_id, role_id, "retired notify role");
        Ok(())
    }

    async fn rewrite_reminder(
        &self,
        channel_id: u64,
        message_id: u64,
        role_id: u64,
    ) -> GatewayResult<()> {
        ChannelId::new(channel_id)
            .edit_message(
                &self.http,
                MessageId::new(message_id),
                EditMessage::new().content(format!("Reminder: <@&{role_id}>")),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }
}
