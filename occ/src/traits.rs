//! External collaborator traits.
//!
//! Transport framing, session negotiation/authentication and envelope
//! serialization all live outside the core; this module only states the
//! surface the core needs from them.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use occ_error::BoxError;

/// Negotiated state of an underlying channel's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Freshly opened transport, nothing negotiated yet.
    New,
    /// Compression/encryption negotiation in progress.
    Negotiating,
    /// Authentication in progress.
    Authenticating,
    /// Application envelopes may flow.
    Established,
    /// Graceful termination requested.
    Finishing,
    /// Graceful termination acknowledged by the peer.
    Finished,
    /// Session failed and cannot be used.
    Failed,
}

/// Bound required of the `Command` envelope type: the only thing the
/// core needs to know about a command is the request/response
/// identifier used to match a reply to its request.
pub trait Identified {
    /// Opaque per-channel request identifier type.
    type Id: Clone + Eq + Debug + Send + Sync;

    /// Returns this envelope's identifier.
    fn id(&self) -> Self::Id;
}

/// External collaborator that performs transport open, session
/// negotiation and authentication, producing a ready-to-use
/// [`UnderlyingChannel`] in state [`SessionState::Established`].
///
/// One call is one full build attempt: implementations must not retry
/// internally, and must not assume any previous attempt's state —
/// retries and rebuild policy are entirely the core's responsibility.
#[async_trait]
pub trait ChannelBuilder: Send + Sync {
    /// Channel type this builder produces.
    type Channel: UnderlyingChannel;

    /// Opens a transport, negotiates a session and authenticates,
    /// returning a channel in state `Established`, or fails.
    async fn build_and_establish(
        &self,
        ct: &CancellationToken,
    ) -> Result<Self::Channel, BoxError>;

    /// Default send timeout the built channel should honor.
    ///
    /// The core does not interpret this value; it is surfaced
    /// read-only so callers configuring their own deadlines (e.g.
    /// [`process_command`](crate::OnDemandChannel::process_command))
    /// can size them consistently with the transport.
    fn send_timeout(&self) -> Duration;
}

/// External collaborator: a single authenticated session channel.
///
/// The core exclusively owns the instance handed back by
/// [`ChannelBuilder::build_and_establish`] and is responsible for
/// calling [`release`](UnderlyingChannel::release) on it exactly once,
/// whether the channel is discarded after a failure or the channel is
/// finished/disposed gracefully.
#[async_trait]
pub trait UnderlyingChannel: Send + Sync {
    /// Opaque session identifier type.
    type SessionId: Clone + Debug + Send + Sync + 'static;
    /// Message envelope type.
    type Message: Clone + Send + Sync;
    /// Notification envelope type.
    type Notification: Clone + Send + Sync;
    /// Command (request/response) envelope type.
    type Command: Identified + Clone + Send + Sync;
    /// Session envelope type, returned by the finish protocol.
    type Session: Send + Sync;

    /// Sends a message envelope.
    async fn send_message(&self, message: Self::Message) -> Result<(), BoxError>;
    /// Sends a notification envelope.
    async fn send_notification(&self, notification: Self::Notification) -> Result<(), BoxError>;
    /// Sends a command (request) envelope.
    async fn send_command(&self, command: Self::Command) -> Result<(), BoxError>;

    /// Awaits the next message envelope.
    async fn receive_message(&self, ct: &CancellationToken) -> Result<Self::Message, BoxError>;
    /// Awaits the next notification envelope.
    async fn receive_notification(
        &self,
        ct: &CancellationToken,
    ) -> Result<Self::Notification, BoxError>;
    /// Awaits the next command envelope.
    async fn receive_command(&self, ct: &CancellationToken) -> Result<Self::Command, BoxError>;

    /// Sends the session envelope announcing graceful termination.
    async fn send_finishing_session(&self) -> Result<(), BoxError>;
    /// Awaits the peer's session envelope acknowledging termination.
    async fn receive_finished_session(
        &self,
        ct: &CancellationToken,
    ) -> Result<Self::Session, BoxError>;

    /// This channel's session identifier.
    fn session_id(&self) -> Self::SessionId;
    /// This channel's current session state.
    fn state(&self) -> SessionState;
    /// Whether the underlying transport reports itself connected.
    fn is_connected(&self) -> bool;

    /// Idempotent resource release. Called exactly once by the core,
    /// either on discard (after a failure) or on finish/dispose.
    async fn release(&self);
}
