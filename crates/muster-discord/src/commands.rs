//! `/attendance` slash commands — `create`, `remove`, `list`, `info`.
//!
//! Registration happens in `ready()`; interactions are dispatched from
//! `interaction_create` in the event handler.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use serenity::model::application::{
    CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType,
};
use serenity::model::id::{ChannelId, GuildId};
use serenity::prelude::Context;
use tracing::{info, warn};

use muster_scheduler::schedule;
use muster_scheduler::types::NewEvent;

use crate::announce;
use crate::context::MusterAppContext;

/// Register the `/attendance` command. Call from `ready()`.
pub async fn register_commands(ctx: &Context, guild_id: Option<GuildId>) {
    let commands = vec![attendance_command()];

    match guild_id {
        Some(gid) => match gid.set_commands(&ctx.http, commands).await {
            Ok(cmds) => info!(guild = %gid, count = cmds.len(), "registered guild slash commands"),
            Err(e) => warn!(guild = %gid, error = %e, "failed to register guild commands"),
        },
        None => {
            match serenity::model::application::Command::set_global_commands(&ctx.http, commands)
                .await
            {
                Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
                Err(e) => warn!(error = %e, "failed to register global slash commands"),
            }
        }
    }
}

fn attendance_command() -> CreateCommand {
    CreateCommand::new("attendance")
        .description("Manage attendance events")
        .add_option(create_subcommand())
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "remove",
                "Remove an attendance event",
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "attendance-id",
                    "The id of the attendance event",
                )
                .required(true),
            ),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "list",
            "List the attendance events of this server",
        ))
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "info",
                "Display all information of an attendance event",
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "attendance-id",
                    "The id of the attendance event OR a message link",
                )
                .required(true),
            ),
        )
}

fn create_subcommand() -> CreateCommandOption {
    CreateCommandOption::new(
        CommandOptionType::SubCommand,
        "create",
        "Create a new attendance event",
    )
    .add_sub_option(
        CreateCommandOption::new(CommandOptionType::String, "topic", "Title or topic for the event")
            .required(true),
    )
    .add_sub_option(
        CreateCommandOption::new(
            CommandOptionType::Channel,
            "channel",
            "The channel the announcement is posted in",
        )
        .required(true),
    )
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::String,
        "moment",
        "The moment of the event (yyyy-MM-dd HH:mm); provide this or a schedule",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::String,
        "time-zone",
        "Zone id the moment/schedule is in (e.g. Europe/Brussels, UTC)",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::String,
        "schedule",
        "Cron schedule of the attendance events",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::String,
        "description",
        "What is the event about?",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::Boolean,
        "repeating",
        "Plan the next occurrence from the schedule after each one finishes",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::String,
        "close-offset",
        "How long before the moment sign-up closes (e.g. 1h30m)",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::String,
        "notify-offset",
        "How long before the moment attendees are reminded (e.g. 15m)",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::String,
        "schedule-timeout",
        "Grace period before a finished recurring event reopens",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::Boolean,
        "notify-attendees",
        "Whether to ping attendees at all",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::Role,
        "attendees-role",
        "The role pinged by the reminder",
    ))
    .add_sub_option(CreateCommandOption::new(
        CommandOptionType::Role,
        "role-template",
        "Template cloned into a fresh reminder role on every recurrence",
    ))
}

/// Dispatch an `/attendance` interaction to the appropriate handler.
pub async fn handle_interaction<C: MusterAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) {
    let Some((sub, options)) = subcommand(command) else {
        respond_ephemeral(ctx, command, "Unknown subcommand.").await;
        return;
    };

    let result = match sub {
        "create" => handle_create(app, ctx, command, options).await,
        "remove" => handle_remove(app, ctx, command, options).await,
        "list" => handle_list(app, ctx, command).await,
        "info" => handle_info(app, ctx, command, options).await,
        _ => {
            respond_ephemeral(ctx, command, "Unknown subcommand.").await;
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(subcommand = sub, error = %e, "attendance command error");
    }
}

fn subcommand(command: &CommandInteraction) -> Option<(&str, &[CommandDataOption])> {
    let first = command.data.options.first()?;
    match &first.value {
        CommandDataOptionValue::SubCommand(options) => Some((first.name.as_str(), options)),
        _ => None,
    }
}

fn str_opt<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
}

fn bool_opt(options: &[CommandDataOption], name: &str) -> Option<bool> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_bool())
}

fn int_opt(options: &[CommandDataOption], name: &str) -> Option<i64> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_i64())
}

fn role_opt(options: &[CommandDataOption], name: &str) -> Option<u64> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_role_id())
        .map(|r| r.get())
}

fn channel_opt(options: &[CommandDataOption], name: &str) -> Option<u64> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_channel_id())
        .map(|c| c.get())
}

fn opt_duration(
    options: &[CommandDataOption],
    name: &str,
) -> std::result::Result<Option<Duration>, String> {
    str_opt(options, name).map(parse_duration).transpose()
}

/// Parse a duration like "5m", "1h30m", "90s", "1d".
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let mut total_secs: i64 = 0;
    let mut current = String::new();

    for c in s.trim().chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else {
            let n: i64 = current
                .parse()
                .map_err(|_| format!("invalid duration: {s}"))?;
            current.clear();
            total_secs += match c {
                's' => n,
                'm' => n * 60,
                'h' => n * 3600,
                'd' => n * 86400,
                _ => return Err(format!("invalid duration: {s}")),
            };
        }
    }
    if !current.is_empty() {
        return Err(format!("invalid duration: {s} (missing unit)"));
    }
    if total_secs == 0 {
        return Err(format!("invalid duration: {s}"));
    }
    Ok(Duration::seconds(total_secs))
}

fn parse_moment(s: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M")
        .map_err(|_| format!("invalid moment (expected yyyy-MM-dd HH:mm): {s}"))
}

/// Extract (guild, channel, message) from a Discord message link.
fn parse_message_link(raw: &str) -> Option<(u64, u64, u64)> {
    let rest = raw.split("/channels/").nth(1)?;
    let mut parts = rest.trim_end_matches('/').split('/');
    let guild = parts.next()?.parse().ok()?;
    let channel = parts.next()?.parse().ok()?;
    let message = parts.next()?.parse().ok()?;
    Some((guild, channel, message))
}

async fn handle_create<C: MusterAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
    options: &[CommandDataOption],
) -> Result<(), serenity::Error> {
    let Some(guild_id) = command.guild_id else {
        respond_ephemeral(ctx, command, "Attendance events only work in a server.").await;
        return Ok(());
    };
    let Some(channel_id) = channel_opt(options, "channel") else {
        respond_ephemeral(ctx, command, "Please provide a channel.").await;
        return Ok(());
    };
    let Some(topic) = str_opt(options, "topic").map(str::to_string) else {
        respond_ephemeral(ctx, command, "Please provide a topic.").await;
        return Ok(());
    };

    let zone = str_opt(options, "time-zone").unwrap_or("UTC").to_string();
    let schedule_expr = str_opt(options, "schedule").map(str::to_string);
    let description = str_opt(options, "description").map(str::to_string);
    let repeating = bool_opt(options, "repeating").unwrap_or(false);
    let notify_attendees = bool_opt(options, "notify-attendees").unwrap_or(true);

    let moment = match str_opt(options, "moment").map(parse_moment).transpose() {
        Ok(m) => m,
        Err(e) => {
            respond_ephemeral(ctx, command, &e).await;
            return Ok(());
        }
    };
    let (close_offset, notify_offset, schedule_timeout) = match (
        opt_duration(options, "close-offset"),
        opt_duration(options, "notify-offset"),
        opt_duration(options, "schedule-timeout"),
    ) {
        (Ok(c), Ok(n), Ok(t)) => (c, n, t),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            respond_ephemeral(ctx, command, &e).await;
            return Ok(());
        }
    };

    // Validate everything cheap before the announcement goes out.
    if let Some(expr) = schedule_expr.as_deref() {
        if let Err(e) = schedule::validate(expr) {
            respond_ephemeral(ctx, command, &e.to_string()).await;
            return Ok(());
        }
    }
    let next_moment =
        match schedule::resolve_next_moment(moment, schedule_expr.as_deref(), &zone, Utc::now()) {
            Ok(m) => m,
            Err(e) => {
                respond_ephemeral(ctx, command, &e.to_string()).await;
                return Ok(());
            }
        };

    let message = ChannelId::new(channel_id)
        .send_message(
            &ctx.http,
            announce::announcement_message(&topic, description.as_deref(), next_moment),
        )
        .await?;

    let request = NewEvent {
        guild_id: guild_id.get(),
        channel_id,
        message_id: message.id.get(),
        notify_role_id: role_opt(options, "attendees-role"),
        close_offset,
        notify_offset,
        notify_attendees,
        topic,
        description,
        repeating,
        next_moment,
        schedule: schedule_expr,
        zone,
        schedule_timeout,
        notify_role_template_id: role_opt(options, "role-template"),
    };

    match app.events().create(request) {
        Ok(event) => {
            let unix = event.next_moment.timestamp();
            respond(
                ctx,
                command,
                &format!(
                    "Created attendance event `{}` — next occurrence <t:{unix}:F> (<t:{unix}:R>).",
                    event.id
                ),
            )
            .await;
        }
        Err(e) => {
            // The announcement is already up; take it back down.
            let _ = ChannelId::new(channel_id)
                .delete_message(&ctx.http, message.id)
                .await;
            respond_ephemeral(ctx, command, &format!("Could not create the event: {e}")).await;
        }
    }
    Ok(())
}

async fn handle_remove<C: MusterAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
    options: &[CommandDataOption],
) -> Result<(), serenity::Error> {
    let Some(guild_id) = command.guild_id else {
        respond_ephemeral(ctx, command, "Attendance events only work in a server.").await;
        return Ok(());
    };
    let Some(id) = int_opt(options, "attendance-id") else {
        respond_ephemeral(ctx, command, "Please provide an attendance id.").await;
        return Ok(());
    };

    let content = match app.events().remove(id, guild_id.get()) {
        Ok(true) => format!("Removed attendance event `{id}`."),
        Ok(false) => format!("No attendance event `{id}` in this server."),
        Err(e) => format!("Could not remove the event: {e}"),
    };
    respond(ctx, command, &content).await;
    Ok(())
}

async fn handle_list<C: MusterAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let Some(guild_id) = command.guild_id else {
        respond_ephemeral(ctx, command, "Attendance events only work in a server.").await;
        return Ok(());
    };

    let content = match app.events().list(guild_id.get()) {
        Ok(events) if events.is_empty() => {
            "There are no attendance events in this server.".to_string()
        }
        Ok(events) => {
            let mut text = "**id — next moment — topic**\n".to_string();
            for event in events {
                let unix = event.next_moment.timestamp();
                text.push_str(&format!("`{}` — <t:{unix}:F> — {}\n", event.id, event.topic));
            }
            text
        }
        Err(e) => format!("Could not list events: {e}"),
    };
    respond(ctx, command, &content).await;
    Ok(())
}

async fn handle_info<C: MusterAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
    options: &[CommandDataOption],
) -> Result<(), serenity::Error> {
    let Some(guild_id) = command.guild_id else {
        respond_ephemeral(ctx, command, "Attendance events only work in a server.").await;
        return Ok(());
    };
    let raw = str_opt(options, "attendance-id").unwrap_or("").trim();

    let lookup = if let Ok(id) = raw.parse::<i64>() {
        app.events().get(id)
    } else if let Some((guild, channel, message)) = parse_message_link(raw) {
        app.events().get_by_message(guild, channel, message)
    } else {
        respond_ephemeral(ctx, command, "Provide an attendance id or a message link.").await;
        return Ok(());
    };

    let content = match lookup {
        Ok(Some(event)) if event.guild_id == guild_id.get() => {
            let unix = event.next_moment.timestamp();
            let offset = |d: Option<Duration>| {
                d.map(|d| format!("{}m", d.num_minutes()))
                    .unwrap_or_else(|| "—".to_string())
            };
            format!(
                "**{}** (`{}`)\nstate: `{}`\nnext moment: <t:{unix}:F>\n\
                 close offset: {} · notify offset: {}\nrepeating: {} · schedule: {} ({})",
                event.topic,
                event.id,
                event.state,
                offset(event.close_offset),
                offset(event.notify_offset),
                event.repeating,
                event.schedule.as_deref().unwrap_or("—"),
                event.zone,
            )
        }
        Ok(_) => "No attendance event matches that id in this server.".to_string(),
        Err(e) => format!("Could not look up the event: {e}"),
    };
    respond(ctx, command, &content).await;
    Ok(())
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: &str) {
    let _ = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await;
}

/// Send an ephemeral response (only visible to the invoker).
pub(crate) async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) {
    let _ = command
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
