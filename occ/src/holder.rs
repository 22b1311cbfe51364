//! Channel holder: guards the single optional underlying channel, its
//! identity snapshot, and single-flight acquisition.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use occ_error::Error;

use crate::handlers::{HandlerRegistry, Veto};
use crate::info::{ChannelInformation, FailedChannelInformation};
use crate::traits::{ChannelBuilder, SessionState, UnderlyingChannel};

pub(crate) type SessionId<CB> = <<CB as ChannelBuilder>::Channel as UnderlyingChannel>::SessionId;

/// Guards `current` and serializes builds behind `build_mutex`, exactly
/// as named in the specification's Holder internal state.
pub(crate) struct Holder<CB: ChannelBuilder> {
    builder: CB,
    current: RwLock<Option<Arc<CB::Channel>>>,
    build_mutex: Mutex<()>,
}

fn usable<C: UnderlyingChannel>(channel: &C) -> bool {
    channel.state() == SessionState::Established && channel.is_connected()
}

impl<CB: ChannelBuilder> Holder<CB> {
    pub(crate) fn new(builder: CB) -> Self {
        Holder {
            builder,
            current: RwLock::new(None),
            build_mutex: Mutex::new(()),
        }
    }

    /// Returns the currently held channel, regardless of usability.
    /// Used by the finish protocol, which inspects the channel without
    /// triggering a build.
    pub(crate) async fn peek(&self) -> Option<Arc<CB::Channel>> {
        self.current.read().await.clone()
    }

    /// Default send timeout exposed by the wrapped builder.
    pub(crate) fn send_timeout(&self) -> Duration {
        self.builder.send_timeout()
    }

    async fn usable_current(&self) -> Option<Arc<CB::Channel>> {
        let guard = self.current.read().await;
        match guard.as_ref() {
            Some(channel) if usable(channel.as_ref()) => Some(channel.clone()),
            _ => None,
        }
    }

    /// Returns whatever is in `current` right now, usable or not. Used
    /// to identify the exact stale channel to discard, so the discard
    /// can be made conditional on that identity still being current.
    async fn current_snapshot(&self) -> Option<Arc<CB::Channel>> {
        self.current.read().await.clone()
    }

    /// Removes `current` and releases it, firing `on_discarded`, but
    /// *only* if `current` still holds the exact channel `stale`
    /// (pointer identity). If another task has already replaced or
    /// cleared `current` in the meantime, this is a no-op: the caller's
    /// observation of `stale` being unusable/failed is no longer
    /// current, and a different, possibly perfectly healthy channel
    /// must not be torn down in its place.
    pub(crate) async fn discard(
        &self,
        stale: &Arc<CB::Channel>,
        handlers: &HandlerRegistry<SessionId<CB>>,
    ) -> Result<(), Error> {
        let removed = {
            let mut guard = self.current.write().await;
            match guard.as_ref() {
                Some(current) if Arc::ptr_eq(current, stale) => guard.take(),
                _ => None,
            }
        };
        if let Some(channel) = removed {
            let info = ChannelInformation::snapshot(channel.as_ref());
            log::debug!("discarding channel {:?} (state {:?})", info.id, info.state);
            channel.release().await;
            handlers.invoke_discarded(&info).await?;
        }
        Ok(())
    }

    /// Removes and releases `current` without firing `on_discarded`.
    /// Used by the finish protocol and by disposal, neither of which
    /// are failure-driven discards.
    pub(crate) async fn take_and_release(&self) {
        if let Some(channel) = self.current.write().await.take() {
            channel.release().await;
        }
    }

    /// Returns a usable channel, building one if necessary. Implements
    /// the double-checked locking and single-flight build described by
    /// the specification: at most one call to `build_and_establish` is
    /// in flight at any time, and `on_created`/`on_creation_failed` are
    /// invoked outside the build mutex.
    pub(crate) async fn get_channel(
        &self,
        ct: &CancellationToken,
        handlers: &HandlerRegistry<SessionId<CB>>,
    ) -> Result<Arc<CB::Channel>, Error> {
        loop {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(channel) = self.usable_current().await {
                return Ok(channel);
            }

            let permit = self.build_mutex.lock().await;
            // Double-checked under the lock: another task may have
            // already rebuilt (or discarded) while we waited for it.
            if let Some(channel) = self.usable_current().await {
                drop(permit);
                return Ok(channel);
            }
            // Still unusable (or empty). If a specific stale channel is
            // still sitting in `current`, discard exactly that one
            // before building a replacement; identity-checked so a
            // concurrent discard of the same channel (e.g. from an
            // op-failure elsewhere) doesn't double-fire, and so we never
            // tear down a channel some other task has since published.
            if let Some(stale) = self.current_snapshot().await {
                self.discard(&stale, handlers).await?;
            }

            let built = tokio::select! {
                biased;
                _ = ct.cancelled() => None,
                result = self.builder.build_and_establish(ct) => Some(result),
            };

            match built {
                None => return Err(Error::Cancelled),
                Some(Ok(channel)) => {
                    let channel = Arc::new(channel);
                    *self.current.write().await = Some(channel.clone());
                    drop(permit);
                    let info = ChannelInformation::snapshot(channel.as_ref());
                    log::debug!("built channel {:?} (state {:?})", info.id, info.state);
                    handlers.invoke_created(&info).await?;
                    return Ok(channel);
                }
                Some(Err(build_error)) => {
                    drop(permit);
                    log::warn!("build_and_establish failed: {}", build_error);
                    let fci = FailedChannelInformation::from_build_error(build_error);
                    match handlers.invoke_creation_failed(&fci).await {
                        Veto::Proceed => {
                            log::trace!("on_creation_failed allowed a retry");
                            continue;
                        }
                        Veto::Deny => {
                            log::error!("on_creation_failed denied a retry, surfacing build error");
                            return Err(Error::BuildFailed(fci.exception));
                        }
                        Veto::HandlerFailed(err) => return Err(err),
                    }
                }
            }
        }
    }
}
