//! Collaborator ports the engine drives side effects through.
//!
//! The scheduler never talks to Discord directly: announcement edits,
//! reminder pings, role rotation and the participant roster go through
//! these traits. `muster-discord` provides the real implementations; the
//! engine tests use recording fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::AttendanceEvent;

/// Failure classes for collaborator calls.
///
/// `Unreachable` means the target is gone for good (deleted announcement,
/// lost permission) — the event gets disabled. `Transport` is anything
/// that may succeed on retry.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("announcement unreachable: {0}")]
    Unreachable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Owns the announcement message of an event.
#[async_trait]
pub trait AnnouncementPort: Send + Sync {
    /// Publish a fresh announcement for the event's current occurrence.
    /// Returns the new message id.
    async fn publish(&self, event: &AttendanceEvent) -> GatewayResult<u64>;

    /// Rewrite the announcement to show sign-up as closed.
    async fn close_signup(&self, event: &AttendanceEvent) -> GatewayResult<()>;

    /// Rewrite the announcement into its final form, listing everyone who
    /// signed up.
    async fn finish(&self, event: &AttendanceEvent, attendees: &[u64]) -> GatewayResult<()>;

    /// Send the reminder ping as a reply to the announcement. Returns the
    /// reminder message id, or `None` when the notify role no longer
    /// exists (the notify path then degrades instead of failing).
    async fn send_reminder(&self, event: &AttendanceEvent) -> GatewayResult<Option<u64>>;
}

/// Role rotation primitives used when a recurring event reopens.
#[async_trait]
pub trait RolePort: Send + Sync {
    /// Clone the template into a fresh notify role. `None` when the
    /// template is missing or the clone could not be created; the caller
    /// then skips rotation and keeps the previous role.
    async fn clone_role(&self, guild_id: u64, template_role_id: u64) -> GatewayResult<Option<u64>>;

    /// Retire a notify role from a previous occurrence.
    async fn delete_role(&self, guild_id: u64, role_id: u64) -> GatewayResult<()>;

    /// Rewrite an old reminder message to mention `role_id` (the template)
    /// so history stays readable once its clone is gone.
    async fn rewrite_reminder(
        &self,
        channel_id: u64,
        message_id: u64,
        role_id: u64,
    ) -> GatewayResult<()>;
}

/// The sign-up roster. Registration and revocation are owned by the
/// Discord button handler; the engine only reads and clears.
#[async_trait]
pub trait ParticipantRegistry: Send + Sync {
    async fn list(&self, event_id: i64) -> GatewayResult<Vec<u64>>;

    async fn clear(&self, event_id: i64) -> GatewayResult<()>;
}

/// Everything the engine needs to perform side effects.
#[derive(Clone)]
pub struct Collaborators {
    pub announce: Arc<dyn AnnouncementPort>,
    pub roles: Arc<dyn RolePort>,
    pub attendees: Arc<dyn ParticipantRegistry>,
}
