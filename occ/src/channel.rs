//! The on-demand client channel façade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use occ_error::Error;

use crate::executor::{ensure_not_disposed, execute};
use crate::finish;
use crate::handlers::{HandlerRegistry, OnCreated, OnCreationFailed, OnDiscarded, OnOperationFailed};
use crate::holder::{Holder, SessionId};
use crate::process_command::{self, UnrelatedCommandHandler};
use crate::traits::{ChannelBuilder, UnderlyingChannel};

/// Self-healing façade over a lazily-established, authenticated
/// session channel.
///
/// Every operation lazily builds the underlying channel on first use,
/// shares a single in-flight build across concurrent callers, and
/// transparently discards and rebuilds the channel on failure, subject
/// to the registered veto handlers.
pub struct OnDemandChannel<CB: ChannelBuilder> {
    holder: Holder<CB>,
    handlers: HandlerRegistry<SessionId<CB>>,
    disposed: AtomicBool,
}

type Message<CB> = <<CB as ChannelBuilder>::Channel as UnderlyingChannel>::Message;
type Notification<CB> = <<CB as ChannelBuilder>::Channel as UnderlyingChannel>::Notification;
type Command<CB> = <<CB as ChannelBuilder>::Channel as UnderlyingChannel>::Command;

impl<CB: ChannelBuilder> OnDemandChannel<CB> {
    /// Creates a channel with no handlers registered. Prefer
    /// [`Builder`](crate::builder::Builder) to register handlers
    /// before first use.
    #[inline]
    pub fn new(builder: CB) -> Self {
        OnDemandChannel::from_parts(builder, HandlerRegistry::new(vec![], vec![], vec![], vec![]))
    }

    pub(crate) fn from_parts(builder: CB, handlers: HandlerRegistry<SessionId<CB>>) -> Self {
        OnDemandChannel {
            holder: Holder::new(builder),
            handlers,
            disposed: AtomicBool::new(false),
        }
    }

    /// Registers an `on_created` handler. Safe to call between
    /// operations; concurrent registration is snapshotted at each
    /// invocation round.
    #[inline]
    pub async fn on_created<H>(&self, handler: H)
    where
        H: OnCreated<SessionId<CB>> + 'static,
    {
        self.handlers.add_on_created(Arc::new(handler)).await;
    }

    /// Registers an `on_discarded` handler.
    #[inline]
    pub async fn on_discarded<H>(&self, handler: H)
    where
        H: OnDiscarded<SessionId<CB>> + 'static,
    {
        self.handlers.add_on_discarded(Arc::new(handler)).await;
    }

    /// Registers an `on_creation_failed` veto handler.
    #[inline]
    pub async fn on_creation_failed<H>(&self, handler: H)
    where
        H: OnCreationFailed<SessionId<CB>> + 'static,
    {
        self.handlers.add_on_creation_failed(Arc::new(handler)).await;
    }

    /// Registers an `on_operation_failed` veto handler.
    #[inline]
    pub async fn on_operation_failed<H>(&self, handler: H)
    where
        H: OnOperationFailed<SessionId<CB>> + 'static,
    {
        self.handlers.add_on_operation_failed(Arc::new(handler)).await;
    }

    /// Sends a message envelope, building the channel if necessary.
    /// Uses an internal cancellation token: sends have no
    /// caller-supplied deadline, but still honor disposal.
    #[instrument(skip(self, message))]
    pub async fn send_message(&self, message: Message<CB>) -> Result<(), Error> {
        ensure_not_disposed(&self.disposed)?;
        let ct = CancellationToken::new();
        execute(&self.holder, &self.handlers, &self.disposed, &ct, "send_message", move |channel| {
            let message = message.clone();
            async move { channel.send_message(message).await }
        })
        .await
    }

    /// Sends a notification envelope. See [`send_message`](Self::send_message).
    #[instrument(skip(self, notification))]
    pub async fn send_notification(&self, notification: Notification<CB>) -> Result<(), Error> {
        ensure_not_disposed(&self.disposed)?;
        let ct = CancellationToken::new();
        execute(
            &self.holder,
            &self.handlers,
            &self.disposed,
            &ct,
            "send_notification",
            move |channel| {
                let notification = notification.clone();
                async move { channel.send_notification(notification).await }
            },
        )
        .await
    }

    /// Sends a command envelope without awaiting a response. See
    /// [`process_command`](Self::process_command) for request/response
    /// semantics.
    #[instrument(skip(self, command))]
    pub async fn send_command(&self, command: Command<CB>) -> Result<(), Error> {
        ensure_not_disposed(&self.disposed)?;
        let ct = CancellationToken::new();
        execute(&self.holder, &self.handlers, &self.disposed, &ct, "send_command", move |channel| {
            let command = command.clone();
            async move { channel.send_command(command).await }
        })
        .await
    }

    /// Awaits the next message envelope, building the channel if
    /// necessary. `ct` is forwarded to both the channel acquisition and
    /// the underlying receive.
    #[instrument(skip(self))]
    pub async fn receive_message(&self, ct: &CancellationToken) -> Result<Message<CB>, Error> {
        ensure_not_disposed(&self.disposed)?;
        execute(&self.holder, &self.handlers, &self.disposed, ct, "receive_message", move |channel| async move {
            channel.receive_message(ct).await
        })
        .await
    }

    /// Awaits the next notification envelope. See
    /// [`receive_message`](Self::receive_message).
    #[instrument(skip(self))]
    pub async fn receive_notification(
        &self,
        ct: &CancellationToken,
    ) -> Result<Notification<CB>, Error> {
        ensure_not_disposed(&self.disposed)?;
        execute(
            &self.holder,
            &self.handlers,
            &self.disposed,
            ct,
            "receive_notification",
            move |channel| async move { channel.receive_notification(ct).await },
        )
        .await
    }

    /// Awaits the next command envelope (typically a peer-initiated
    /// request, not a response — see
    /// [`process_command`](Self::process_command) for that). See
    /// [`receive_message`](Self::receive_message).
    #[instrument(skip(self))]
    pub async fn receive_command(&self, ct: &CancellationToken) -> Result<Command<CB>, Error> {
        ensure_not_disposed(&self.disposed)?;
        execute(&self.holder, &self.handlers, &self.disposed, ct, "receive_command", move |channel| async move {
            channel.receive_command(ct).await
        })
        .await
    }

    /// Sends `request` and returns the response command whose `id`
    /// matches `request.id()`. Non-matching commands received in the
    /// meantime are handed to `unrelated_command_handler`; if none is
    /// supplied, a protocol violation error is raised.
    ///
    /// A rebuild triggered by a failure while awaiting the response
    /// does not re-send `request` — resending, if desired, is the
    /// caller's responsibility.
    ///
    /// Waits at most `timeout`, or [`ChannelBuilder::send_timeout`] if
    /// `None`, for the full round trip. Elapsing surfaces as
    /// [`Error::Cancelled`], not [`Error::OperationFailed`]: a slow
    /// peer is not evidence the channel itself is broken.
    #[instrument(skip(self, request, unrelated_command_handler))]
    pub async fn process_command<H>(
        &self,
        request: Command<CB>,
        ct: &CancellationToken,
        unrelated_command_handler: Option<&H>,
    ) -> Result<Command<CB>, Error>
    where
        H: UnrelatedCommandHandler<Command<CB>> + Sync,
    {
        self.process_command_timeout(request, ct, unrelated_command_handler, None)
            .await
    }

    /// Like [`process_command`](Self::process_command), with an
    /// explicit round-trip timeout overriding the builder's default.
    #[instrument(skip(self, request, unrelated_command_handler))]
    pub async fn process_command_timeout<H>(
        &self,
        request: Command<CB>,
        ct: &CancellationToken,
        unrelated_command_handler: Option<&H>,
        timeout: Option<Duration>,
    ) -> Result<Command<CB>, Error>
    where
        H: UnrelatedCommandHandler<Command<CB>> + Sync,
    {
        ensure_not_disposed(&self.disposed)?;
        let timeout = timeout.unwrap_or_else(|| self.holder.send_timeout());
        let call = process_command::process_command(
            &self.holder,
            &self.handlers,
            &self.disposed,
            request,
            ct,
            unrelated_command_handler,
        );
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("process_command timed out after {:?}", timeout);
                Err(Error::Cancelled)
            }
        }
    }

    /// Gracefully terminates the session: sends a finishing session
    /// envelope and awaits the peer's finished acknowledgement if the
    /// current channel is established, then releases the channel.
    /// Does not fire `on_discarded`.
    #[instrument(skip(self))]
    pub async fn finish(&self, ct: &CancellationToken) -> Result<(), Error> {
        ensure_not_disposed(&self.disposed)?;
        finish::finish(&self.holder, ct).await
    }

    /// Marks this channel disposed and releases the current underlying
    /// channel, if any. Idempotent. After this returns, every operation
    /// fails immediately with [`Error::Disposed`] without consulting
    /// the holder or invoking handlers.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            log::debug!("disposing on-demand channel");
            self.holder.take_and_release().await;
        }
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
