//! Generic retry/rebuild loop shared by every send/receive/process
//! operation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use occ_error::Error;

use crate::handlers::{HandlerRegistry, Veto};
use crate::holder::{Holder, SessionId};
use crate::info::FailedChannelInformation;
use crate::traits::ChannelBuilder;

pub(crate) fn ensure_not_disposed(disposed: &AtomicBool) -> Result<(), Error> {
    if disposed.load(Ordering::SeqCst) {
        Err(Error::Disposed)
    } else {
        Ok(())
    }
}

/// Runs `op` against a channel obtained from `holder`, rebuilding and
/// retrying on failure per the handler registry's verdicts, exactly as
/// the specification's generic executor loop describes:
///
/// ```text
/// loop:
///     ensure_not_disposed()
///     ct.check_cancelled()
///     ch = holder.get_channel(ct)
///     try: return op(ch)
///     catch Cancellation: rethrow
///     catch e:
///         discard, invoke on_operation_failed, retry or rethrow
/// ```
pub(crate) async fn execute<CB, T, Op, Fut>(
    holder: &Holder<CB>,
    handlers: &HandlerRegistry<SessionId<CB>>,
    disposed: &AtomicBool,
    ct: &CancellationToken,
    operation_name: &'static str,
    mut op: Op,
) -> Result<T, Error>
where
    CB: ChannelBuilder,
    Op: FnMut(Arc<CB::Channel>) -> Fut,
    Fut: Future<Output = Result<T, occ_error::BoxError>>,
{
    loop {
        ensure_not_disposed(disposed)?;
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let channel = holder.get_channel(ct, handlers).await?;

        let outcome = tokio::select! {
            biased;
            _ = ct.cancelled() => None,
            result = op(channel.clone()) => Some(result),
        };

        match outcome {
            None => return Err(Error::Cancelled),
            Some(Ok(value)) => return Ok(value),
            Some(Err(err)) => {
                log::warn!("{} failed: {}", operation_name, err);
                let fci = FailedChannelInformation::from_channel(channel.as_ref(), operation_name, err);
                holder.discard(&channel, handlers).await?;
                match handlers.invoke_operation_failed(&fci).await {
                    Veto::Proceed => {
                        log::trace!("on_operation_failed allowed a rebuild for {}", operation_name);
                        continue;
                    }
                    Veto::Deny => {
                        log::error!("on_operation_failed denied a rebuild for {}", operation_name);
                        return Err(Error::OperationFailed(operation_name, fci.exception));
                    }
                    Veto::HandlerFailed(err) => return Err(err),
                }
            }
        }
    }
}
