//! Handler registry: the four append-only observer lists and the
//! aggregation/veto rules that govern how they are invoked.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use occ_error::{BoxError, Error, HandlerError};

use crate::info::{ChannelInformation, FailedChannelInformation};

/// Informational handler invoked after a channel is built.
#[async_trait]
pub trait OnCreated<Id>: Send + Sync {
    /// Called once per successful build, after the new channel is
    /// stored and before it is handed to the caller that triggered it.
    async fn call(&self, info: &ChannelInformation<Id>) -> Result<(), BoxError>;
}

#[async_trait]
impl<Id, F, Fut> OnCreated<Id> for F
where
    Id: Send + Sync + 'static,
    F: Fn(&ChannelInformation<Id>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn call(&self, info: &ChannelInformation<Id>) -> Result<(), BoxError> {
        self(info).await
    }
}

/// Informational handler invoked after a channel is removed from
/// `current`, whether because it failed an operation or because it
/// was found unusable before a build.
#[async_trait]
pub trait OnDiscarded<Id>: Send + Sync {
    /// Called once per channel removal, after the channel has been
    /// released.
    async fn call(&self, info: &ChannelInformation<Id>) -> Result<(), BoxError>;
}

#[async_trait]
impl<Id, F, Fut> OnDiscarded<Id> for F
where
    Id: Send + Sync + 'static,
    F: Fn(&ChannelInformation<Id>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn call(&self, info: &ChannelInformation<Id>) -> Result<(), BoxError> {
        self(info).await
    }
}

/// Veto handler invoked when [`ChannelBuilder::build_and_establish`]
/// raises. Returns whether the holder should attempt another build.
///
/// [`ChannelBuilder::build_and_establish`]: crate::traits::ChannelBuilder::build_and_establish
#[async_trait]
pub trait OnCreationFailed<Id>: Send + Sync {
    /// Returns `true` to retry the build, `false` to surface the
    /// original build error to the caller.
    async fn call(&self, info: &FailedChannelInformation<Id>) -> Result<bool, BoxError>;
}

#[async_trait]
impl<Id, F, Fut> OnCreationFailed<Id> for F
where
    Id: Send + Sync + 'static,
    F: Fn(&FailedChannelInformation<Id>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send,
{
    async fn call(&self, info: &FailedChannelInformation<Id>) -> Result<bool, BoxError> {
        self(info).await
    }
}

/// Veto handler invoked when an underlying channel send/receive
/// operation raises. Returns whether the executor should rebuild and
/// retry.
#[async_trait]
pub trait OnOperationFailed<Id>: Send + Sync {
    /// Returns `true` to rebuild the channel and retry the operation,
    /// `false` to surface the original operation error to the caller.
    async fn call(&self, info: &FailedChannelInformation<Id>) -> Result<bool, BoxError>;
}

#[async_trait]
impl<Id, F, Fut> OnOperationFailed<Id> for F
where
    Id: Send + Sync + 'static,
    F: Fn(&FailedChannelInformation<Id>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send,
{
    async fn call(&self, info: &FailedChannelInformation<Id>) -> Result<bool, BoxError> {
        self(info).await
    }
}

/// Outcome of invoking one round of veto handlers.
pub(crate) enum Veto {
    /// Every handler returned `true` and none raised: retry.
    Proceed,
    /// At least one handler returned `false` (none raised): surface
    /// the original triggering error unchanged.
    Deny,
    /// At least one handler raised: surface the aggregated handler
    /// error instead of the triggering error.
    HandlerFailed(Error),
}

/// The four handler lists, plus the snapshot-then-iterate invocation
/// logic from the specification's handler registry.
pub(crate) struct HandlerRegistry<Id> {
    on_created: RwLock<Vec<Arc<dyn OnCreated<Id>>>>,
    on_discarded: RwLock<Vec<Arc<dyn OnDiscarded<Id>>>>,
    on_creation_failed: RwLock<Vec<Arc<dyn OnCreationFailed<Id>>>>,
    on_operation_failed: RwLock<Vec<Arc<dyn OnOperationFailed<Id>>>>,
}

impl<Id: Send + Sync + 'static> HandlerRegistry<Id> {
    pub(crate) fn new(
        on_created: Vec<Arc<dyn OnCreated<Id>>>,
        on_discarded: Vec<Arc<dyn OnDiscarded<Id>>>,
        on_creation_failed: Vec<Arc<dyn OnCreationFailed<Id>>>,
        on_operation_failed: Vec<Arc<dyn OnOperationFailed<Id>>>,
    ) -> Self {
        HandlerRegistry {
            on_created: RwLock::new(on_created),
            on_discarded: RwLock::new(on_discarded),
            on_creation_failed: RwLock::new(on_creation_failed),
            on_operation_failed: RwLock::new(on_operation_failed),
        }
    }

    pub(crate) async fn add_on_created(&self, handler: Arc<dyn OnCreated<Id>>) {
        self.on_created.write().await.push(handler);
    }

    pub(crate) async fn add_on_discarded(&self, handler: Arc<dyn OnDiscarded<Id>>) {
        self.on_discarded.write().await.push(handler);
    }

    pub(crate) async fn add_on_creation_failed(&self, handler: Arc<dyn OnCreationFailed<Id>>) {
        self.on_creation_failed.write().await.push(handler);
    }

    pub(crate) async fn add_on_operation_failed(&self, handler: Arc<dyn OnOperationFailed<Id>>) {
        self.on_operation_failed.write().await.push(handler);
    }

    pub(crate) async fn invoke_created(&self, info: &ChannelInformation<Id>) -> Result<(), Error> {
        let snapshot: Vec<_> = self.on_created.read().await.clone();
        let mut errors = Vec::new();
        for handler in &snapshot {
            if let Err(err) = handler.call(info).await {
                errors.push(err);
            }
        }
        match HandlerError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) async fn invoke_discarded(&self, info: &ChannelInformation<Id>) -> Result<(), Error> {
        let snapshot: Vec<_> = self.on_discarded.read().await.clone();
        let mut errors = Vec::new();
        for handler in &snapshot {
            if let Err(err) = handler.call(info).await {
                errors.push(err);
            }
        }
        match HandlerError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) async fn invoke_creation_failed(&self, info: &FailedChannelInformation<Id>) -> Veto {
        let snapshot: Vec<_> = self.on_creation_failed.read().await.clone();
        let mut errors = Vec::new();
        let mut verdict = true;
        for handler in &snapshot {
            match handler.call(info).await {
                Ok(v) => verdict &= v,
                Err(err) => {
                    errors.push(err);
                    verdict = false;
                }
            }
        }
        match HandlerError::aggregate(errors) {
            Some(err) => Veto::HandlerFailed(err),
            None if verdict => Veto::Proceed,
            None => Veto::Deny,
        }
    }

    pub(crate) async fn invoke_operation_failed(&self, info: &FailedChannelInformation<Id>) -> Veto {
        let snapshot: Vec<_> = self.on_operation_failed.read().await.clone();
        let mut errors = Vec::new();
        let mut verdict = true;
        for handler in &snapshot {
            match handler.call(info).await {
                Ok(v) => verdict &= v,
                Err(err) => {
                    errors.push(err);
                    verdict = false;
                }
            }
        }
        match HandlerError::aggregate(errors) {
            Some(err) => Veto::HandlerFailed(err),
            None if verdict => Veto::Proceed,
            None => Veto::Deny,
        }
    }
}
