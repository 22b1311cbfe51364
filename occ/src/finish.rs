//! Graceful termination path.

use tokio_util::sync::CancellationToken;

use occ_error::Error;

use crate::holder::Holder;
use crate::traits::{ChannelBuilder, SessionState, UnderlyingChannel};

/// Sends a finishing session envelope and awaits the peer's finished
/// acknowledgement if the current channel is `Established`, then
/// releases the channel unconditionally (success, failure, absent, or
/// not `Established`).
///
/// Unlike [`Holder::discard`](crate::holder::Holder::discard), this
/// does not fire `on_discarded` — it is a graceful termination, not a
/// failure-driven removal.
pub(crate) async fn finish<CB: ChannelBuilder>(
    holder: &Holder<CB>,
    ct: &CancellationToken,
) -> Result<(), Error> {
    let channel = holder.peek().await;

    let result = match &channel {
        Some(channel) if channel.state() == SessionState::Established => {
            log::debug!("finishing session {:?}", channel.session_id());
            match channel.send_finishing_session().await {
                Ok(()) => channel
                    .receive_finished_session(ct)
                    .await
                    .map(|_session| ())
                    .map_err(|err| Error::OperationFailed("receive_finished_session", err)),
                Err(err) => Err(Error::OperationFailed("send_finishing_session", err)),
            }
        }
        Some(channel) => {
            log::trace!(
                "finish called with channel in non-established state {:?}, releasing without handshake",
                channel.state()
            );
            Ok(())
        }
        None => Ok(()),
    };

    if let Err(err) = &result {
        log::warn!("finish handshake failed: {}", err);
    }

    holder.take_and_release().await;
    result
}
