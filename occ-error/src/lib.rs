//! on-demand client channel error type

use std::fmt;

/// Boxed source error, used where the core wraps an error raised by an
/// external collaborator (the builder, the underlying channel, or a
/// registered handler).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// On-demand client channel error kind.
///
/// Returned from [`OnDemandChannel`] operations. Mirrors the taxonomy in
/// the on-demand channel specification: disposal, cancellation, build
/// failure, operation failure, handler failure, and protocol violation.
///
/// [`OnDemandChannel`]: ../occ/struct.OnDemandChannel.html
#[derive(Debug, err_derive::Error)]
pub enum Error {
    /// Operation attempted after [`dispose`] was called.
    ///
    /// [`dispose`]: ../occ/struct.OnDemandChannel.html#method.dispose
    #[error(display = "on-demand channel is disposed")]
    Disposed,

    /// Caller-supplied cancellation token was cancelled.
    #[error(display = "operation cancelled")]
    Cancelled,

    /// The channel builder raised and the registered `on_creation_failed`
    /// handlers either vetoed the retry or none were registered.
    #[error(display = "channel build failed: {}", _0)]
    BuildFailed(#[source] BoxError),

    /// An underlying channel operation raised and the registered
    /// `on_operation_failed` handlers either vetoed the rebuild or none
    /// were registered. Carries the operation name (e.g.
    /// `"send_message"`) and the underlying error.
    #[error(display = "operation {:?} failed: {}", _0, _1)]
    OperationFailed(&'static str, #[source] BoxError),

    /// One or more informational or veto handlers raised while handling
    /// an event. If only a single handler raised, its error is carried
    /// unwrapped (see [`HandlerError`]).
    #[error(display = "{}", _0)]
    Handler(#[source] HandlerError),

    /// [`process_command`] received a command whose `id` did not match
    /// the outstanding request and no `unrelated_command_handler` was
    /// supplied. Carries the expected and received ids.
    ///
    /// [`process_command`]: ../occ/struct.OnDemandChannel.html#method.process_command
    #[error(
        display = "protocol violation: received unrelated command (expected id {:?}, got {:?}) and no unrelated_command_handler was registered",
        _0,
        _1
    )]
    ProtocolViolation(String, String),
}

/// Aggregate error raised by one or more handlers reacting to the same
/// event.
///
/// A single failing handler is carried as `errors.len() == 1` and
/// displays as that handler's error message directly; the wrapping
/// enum case still exists so callers can match on [`Error::Handler`],
/// but nothing about the message implies an aggregate occurred.
#[derive(Debug)]
pub struct HandlerError {
    errors: Vec<BoxError>,
}

impl HandlerError {
    /// Builds an aggregate from the errors raised by a round of handler
    /// invocations. Returns `None` if every handler succeeded.
    pub fn aggregate(errors: Vec<BoxError>) -> Option<Error> {
        if errors.is_empty() {
            None
        } else {
            Some(Error::Handler(HandlerError { errors }))
        }
    }

    /// Individual errors raised, in handler registration order.
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            write!(f, "handler failed: {}", only)
        } else {
            write!(f, "{} handlers failed:", self.errors.len())?;
            for err in &self.errors {
                write!(f, " [{}]", err)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.errors.as_slice() {
            [only] => Some(only.as_ref()),
            _ => None,
        }
    }
}

/// On-demand client channel result type alias.
pub type Result<T> = std::result::Result<T, Error>;
