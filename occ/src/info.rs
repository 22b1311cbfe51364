//! Value types handed to registered handlers.

use occ_error::BoxError;

use crate::traits::{SessionState, UnderlyingChannel};

/// Snapshot of a channel taken at the moment it was created or
/// discarded. Handlers receive this by value; they never see the
/// underlying channel itself.
#[derive(Debug, Clone)]
pub struct ChannelInformation<Id> {
    /// Opaque session identifier.
    pub id: Id,
    /// Session state at the moment of the snapshot.
    pub state: SessionState,
}

impl<Id> ChannelInformation<Id> {
    pub(crate) fn snapshot<C>(channel: &C) -> Self
    where
        C: UnderlyingChannel<SessionId = Id>,
    {
        ChannelInformation {
            id: channel.session_id(),
            state: channel.state(),
        }
    }
}

/// Snapshot passed to `on_creation_failed`/`on_operation_failed`
/// handlers describing the failure that occurred.
#[derive(Debug)]
pub struct FailedChannelInformation<Id> {
    /// Session identifier, absent if the build failed before a channel
    /// was ever assigned.
    pub id: Option<Id>,
    /// Session state, absent for the same reason as `id`.
    pub state: Option<SessionState>,
    /// True only if a channel existed, its transport reported
    /// connected, and its state was `Established`.
    pub is_connected: bool,
    /// The error raised by the builder or the underlying channel
    /// operation.
    pub exception: BoxError,
    /// Name of the operation that was being attempted, e.g.
    /// `"send_message"` or `"build_and_establish"`.
    pub operation_name: &'static str,
}

impl<Id> FailedChannelInformation<Id> {
    pub(crate) fn from_channel<C>(channel: &C, operation_name: &'static str, exception: BoxError) -> Self
    where
        C: UnderlyingChannel<SessionId = Id>,
    {
        let state = channel.state();
        FailedChannelInformation {
            id: Some(channel.session_id()),
            state: Some(state),
            is_connected: channel.is_connected() && state == SessionState::Established,
            exception,
            operation_name,
        }
    }

    pub(crate) fn from_build_error(exception: BoxError) -> Self {
        FailedChannelInformation {
            id: None,
            state: None,
            is_connected: false,
            exception,
            operation_name: "build_and_establish",
        }
    }
}
