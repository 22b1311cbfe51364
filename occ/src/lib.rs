//! On-demand client channel.
//!
//! A self-healing façade over a single underlying session channel that
//! is expensive to establish (transport open, session negotiation,
//! authentication) but inexpensive to reuse once up. The channel is
//! built lazily on first use, shared across concurrent callers, and
//! transparently discarded and rebuilt when an operation fails, subject
//! to application-supplied veto handlers.
//!
//! Transport framing, session negotiation/authentication and envelope
//! serialization are all out of scope here — they are supplied by an
//! application-provided [`ChannelBuilder`]/[`UnderlyingChannel`] pair.
//! This crate owns only the build/reuse/discard/retry/veto machinery
//! and the handler registry around it.

mod builder;
mod channel;
mod executor;
mod finish;
mod handlers;
mod holder;
mod info;
mod process_command;
mod traits;

pub use builder::Builder;
pub use channel::OnDemandChannel;
pub use handlers::{OnCreated, OnCreationFailed, OnDiscarded, OnOperationFailed};
pub use info::{ChannelInformation, FailedChannelInformation};
pub use process_command::UnrelatedCommandHandler;
pub use traits::{ChannelBuilder, Identified, SessionState, UnderlyingChannel};

pub use occ_error::{BoxError, Error, HandlerError, Result};
