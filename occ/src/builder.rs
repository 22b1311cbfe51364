//! On-demand channel construction.

use std::sync::Arc;

use crate::channel::OnDemandChannel;
use crate::handlers::{HandlerRegistry, OnCreated, OnCreationFailed, OnDiscarded, OnOperationFailed};
use crate::holder::SessionId;
use crate::traits::ChannelBuilder;

/// Builds an [`OnDemandChannel`] from a [`ChannelBuilder`] collaborator
/// and an initial set of handlers, mirroring the `with_*` ergonomics of
/// `net3_rpc_client::builder::Builder`.
pub struct Builder<CB: ChannelBuilder> {
    builder: CB,
    on_created: Vec<Arc<dyn OnCreated<SessionId<CB>>>>,
    on_discarded: Vec<Arc<dyn OnDiscarded<SessionId<CB>>>>,
    on_creation_failed: Vec<Arc<dyn OnCreationFailed<SessionId<CB>>>>,
    on_operation_failed: Vec<Arc<dyn OnOperationFailed<SessionId<CB>>>>,
}

impl<CB: ChannelBuilder> Builder<CB> {
    /// Creates a new builder wrapping the given channel builder
    /// collaborator. No handlers are registered yet.
    #[inline]
    pub fn new(builder: CB) -> Self {
        Builder {
            builder,
            on_created: Vec::new(),
            on_discarded: Vec::new(),
            on_creation_failed: Vec::new(),
            on_operation_failed: Vec::new(),
        }
    }

    /// Registers an `on_created` handler, run after every successful
    /// build.
    #[inline]
    pub fn with_on_created<H>(mut self, handler: H) -> Self
    where
        H: OnCreated<SessionId<CB>> + 'static,
    {
        self.on_created.push(Arc::new(handler));
        self
    }

    /// Registers an `on_discarded` handler, run after every channel
    /// removal.
    #[inline]
    pub fn with_on_discarded<H>(mut self, handler: H) -> Self
    where
        H: OnDiscarded<SessionId<CB>> + 'static,
    {
        self.on_discarded.push(Arc::new(handler));
        self
    }

    /// Registers an `on_creation_failed` veto handler, run after every
    /// failed build attempt.
    #[inline]
    pub fn with_on_creation_failed<H>(mut self, handler: H) -> Self
    where
        H: OnCreationFailed<SessionId<CB>> + 'static,
    {
        self.on_creation_failed.push(Arc::new(handler));
        self
    }

    /// Registers an `on_operation_failed` veto handler, run after every
    /// failed send/receive operation.
    #[inline]
    pub fn with_on_operation_failed<H>(mut self, handler: H) -> Self
    where
        H: OnOperationFailed<SessionId<CB>> + 'static,
    {
        self.on_operation_failed.push(Arc::new(handler));
        self
    }

    /// Builds the [`OnDemandChannel`]. The underlying channel is not
    /// built yet — it is established lazily on first use.
    #[inline]
    pub fn build(self) -> OnDemandChannel<CB> {
        let handlers = HandlerRegistry::new(
            self.on_created,
            self.on_discarded,
            self.on_creation_failed,
            self.on_operation_failed,
        );
        OnDemandChannel::from_parts(self.builder, handlers)
    }
}
