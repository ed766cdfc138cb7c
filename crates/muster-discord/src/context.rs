use muster_scheduler::{AttendeeStore, SchedulerHandle};

/// Everything the Discord surface needs from the embedding app.
pub trait MusterAppContext: Send + Sync {
    /// Event management (create/remove/list/info).
    fn events(&self) -> &SchedulerHandle;

    /// Sign-up roster, written by the attend/revoke buttons.
    fn attendees(&self) -> &AttendeeStore;

    /// Guild for instant command registration during development; `None`
    /// registers the commands globally.
    fn command_guild(&self) -> Option<u64>;
}
