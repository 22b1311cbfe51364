//! Synchronous request/response layer over raw send/receive.

use std::future::Future;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use occ_error::{BoxError, Error};

use crate::executor::execute;
use crate::handlers::HandlerRegistry;
use crate::holder::{Holder, SessionId};
use crate::traits::{ChannelBuilder, Identified, UnderlyingChannel};

/// Callback given to [`process_command`] for commands that arrive with
/// an `id` other than the one being awaited.
#[async_trait]
pub trait UnrelatedCommandHandler<Command>: Send + Sync {
    /// Handles a stray command.
    async fn handle(&self, command: Command);
}

#[async_trait]
impl<Command, F, Fut> UnrelatedCommandHandler<Command> for F
where
    Command: Send + 'static,
    F: Fn(Command) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, command: Command) {
        self(command).await
    }
}

/// Sends `request` and returns the single response command whose `id`
/// matches `request.id()`.
///
/// The send and the receive-until-matching-id loop are each run
/// through the generic executor independently: a failure while sending
/// rebuilds the channel and resends (the send never reached the wire),
/// but a failure while waiting for the matching response rebuilds and
/// retries *only the receive* — the request is not resent, since the
/// core cannot know whether the peer already processed it.
pub(crate) async fn process_command<CB, H>(
    holder: &Holder<CB>,
    handlers: &HandlerRegistry<SessionId<CB>>,
    disposed: &AtomicBool,
    request: <CB::Channel as UnderlyingChannel>::Command,
    ct: &CancellationToken,
    unrelated_command_handler: Option<&H>,
) -> Result<<CB::Channel as UnderlyingChannel>::Command, Error>
where
    CB: ChannelBuilder,
    H: UnrelatedCommandHandler<<CB::Channel as UnderlyingChannel>::Command> + Sync,
{
    let expected = request.id();

    execute(holder, handlers, disposed, ct, "send_command", {
        let request = request.clone();
        move |channel| {
            let request = request.clone();
            async move { channel.send_command(request).await }
        }
    })
    .await?;

    execute(holder, handlers, disposed, ct, "receive_command", move |channel| {
        let expected = expected.clone();
        async move {
            loop {
                let command = channel.receive_command(ct).await?;
                if command.id() == expected {
                    return Ok(command);
                }
                match unrelated_command_handler {
                    Some(handler) => handler.handle(command).await,
                    None => {
                        let got = format!("{:?}", command.id());
                        let expected = format!("{:?}", expected);
                        return Err(Box::new(Error::ProtocolViolation(expected, got)) as BoxError);
                    }
                }
            }
        }
    })
    .await
}
