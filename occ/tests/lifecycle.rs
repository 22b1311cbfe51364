use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use occ::{
    Builder, ChannelBuilder, Error, Identified, OnDemandChannel, SessionState, UnderlyingChannel,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
struct MockError(String);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockError {}

fn err(msg: &str) -> occ_error::BoxError {
    Box::new(MockError(msg.to_owned()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CommandId(u64);

#[derive(Debug, Clone)]
struct Command {
    id: CommandId,
    payload: String,
}

impl Identified for Command {
    type Id = CommandId;

    fn id(&self) -> CommandId {
        self.id.clone()
    }
}

/// In-memory channel. Every send/receive succeeds unless its
/// corresponding `fail_*` flag is armed, in which case it fails exactly
/// once and then disarms itself, simulating a transient transport
/// fault.
struct MockChannel {
    id: u64,
    connected: AtomicBool,
    released: AtomicBool,
    fail_send: AtomicBool,
    fail_receive: AtomicBool,
    responses: Mutex<Vec<Command>>,
}

#[async_trait]
impl UnderlyingChannel for MockChannel {
    type SessionId = u64;
    type Message = String;
    type Notification = String;
    type Command = Command;
    type Session = ();

    async fn send_message(&self, _message: String) -> Result<(), occ_error::BoxError> {
        if self.fail_send.swap(false, Ordering::SeqCst) {
            return Err(err("send failed"));
        }
        Ok(())
    }

    async fn send_notification(&self, _notification: String) -> Result<(), occ_error::BoxError> {
        Ok(())
    }

    async fn send_command(&self, _command: Command) -> Result<(), occ_error::BoxError> {
        if self.fail_send.swap(false, Ordering::SeqCst) {
            return Err(err("send failed"));
        }
        Ok(())
    }

    async fn receive_message(&self, _ct: &CancellationToken) -> Result<String, occ_error::BoxError> {
        Ok("message".to_owned())
    }

    async fn receive_notification(
        &self,
        _ct: &CancellationToken,
    ) -> Result<String, occ_error::BoxError> {
        Ok("notification".to_owned())
    }

    async fn receive_command(&self, _ct: &CancellationToken) -> Result<Command, occ_error::BoxError> {
        if self.fail_receive.swap(false, Ordering::SeqCst) {
            return Err(err("receive failed"));
        }
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            return Err(err("no queued response"));
        }
        Ok(responses.remove(0))
    }

    async fn send_finishing_session(&self) -> Result<(), occ_error::BoxError> {
        Ok(())
    }

    async fn receive_finished_session(
        &self,
        _ct: &CancellationToken,
    ) -> Result<(), occ_error::BoxError> {
        Ok(())
    }

    fn session_id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> SessionState {
        SessionState::Established
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn release(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
    }
}

impl MockChannel {
    fn new(id: u64) -> Self {
        MockChannel {
            id,
            connected: AtomicBool::new(true),
            released: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_receive: AtomicBool::new(false),
            responses: Mutex::new(Vec::new()),
        }
    }
}

/// Mock builder. `fail_next_builds` controls how many consecutive
/// `build_and_establish` calls fail before succeeding, letting tests
/// exercise the retry-on-creation-failure path deterministically.
struct MockBuilder {
    next_id: AtomicUsize,
    fail_next_builds: AtomicUsize,
}

impl MockBuilder {
    fn new() -> Self {
        MockBuilder {
            next_id: AtomicUsize::new(1),
            fail_next_builds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChannelBuilder for MockBuilder {
    type Channel = MockChannel;

    async fn build_and_establish(
        &self,
        _ct: &CancellationToken,
    ) -> Result<MockChannel, occ_error::BoxError> {
        if self.fail_next_builds.load(Ordering::SeqCst) > 0 {
            self.fail_next_builds.fetch_sub(1, Ordering::SeqCst);
            return Err(err("build failed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(MockChannel::new(id))
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[tokio::test]
async fn builds_lazily_on_first_use() {
    let builder = MockBuilder::new();
    let channel = OnDemandChannel::new(builder);

    assert!(channel.send_message("hello".to_owned()).await.is_ok());
}

#[tokio::test]
async fn reuses_established_channel_across_operations() {
    let created = Arc::new(AtomicUsize::new(0));
    let occ = Builder::new(MockBuilder::new())
        .with_on_created({
            let created = created.clone();
            move |_info: &occ::ChannelInformation<u64>| {
                let created = created.clone();
                async move {
                    created.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
        .build();

    occ.send_message("first".to_owned()).await.unwrap();
    occ.send_message("second".to_owned()).await.unwrap();
    occ.send_notification("third".to_owned()).await.unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rebuilds_after_transient_build_failure() {
    let builder = MockBuilder::new();
    builder.fail_next_builds.store(2, Ordering::SeqCst);
    let occ = Builder::new(builder)
        .with_on_creation_failed(|_info: &occ::FailedChannelInformation<u64>| async { Ok(true) })
        .build();

    occ.send_message("hello".to_owned()).await.unwrap();
}

#[tokio::test]
async fn creation_failed_veto_surfaces_build_error() {
    let builder = MockBuilder::new();
    builder.fail_next_builds.store(1, Ordering::SeqCst);
    let occ = Builder::new(builder)
        .with_on_creation_failed(|_info: &occ::FailedChannelInformation<u64>| async { Ok(false) })
        .build();

    let result = occ.send_message("hello".to_owned()).await;
    assert!(matches!(result, Err(Error::BuildFailed(_))));
}

#[tokio::test]
async fn rebuilds_after_operation_failure() {
    /// Builder whose first channel fails its first send, simulating a
    /// connection drop; every channel after that behaves normally.
    struct FailsOnceBuilder {
        handed_out: AtomicUsize,
    }

    #[async_trait]
    impl ChannelBuilder for FailsOnceBuilder {
        type Channel = MockChannel;

        async fn build_and_establish(
            &self,
            _ct: &CancellationToken,
        ) -> Result<MockChannel, occ_error::BoxError> {
            let index = self.handed_out.fetch_add(1, Ordering::SeqCst);
            let channel = MockChannel::new(index as u64);
            if index == 0 {
                channel.fail_send.store(true, Ordering::SeqCst);
            }
            Ok(channel)
        }

        fn send_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    let discarded = Arc::new(AtomicUsize::new(0));
    let occ = Builder::new(FailsOnceBuilder {
        handed_out: AtomicUsize::new(0),
    })
    .with_on_discarded({
        let discarded = discarded.clone();
        move |_info: &occ::ChannelInformation<u64>| {
            let discarded = discarded.clone();
            async move {
                discarded.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    })
    .with_on_operation_failed(|_info: &occ::FailedChannelInformation<u64>| async { Ok(true) })
    .build();

    occ.send_message("retries across rebuild".to_owned()).await.unwrap();

    assert_eq!(discarded.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn operation_failed_veto_surfaces_operation_error() {
    // A builder whose very first channel has `fail_send` pre-armed
    // lets us exercise the operation-failure path without needing a
    // handle into the channel after the fact.
    struct AlwaysFailSendBuilder;

    #[async_trait]
    impl ChannelBuilder for AlwaysFailSendBuilder {
        type Channel = MockChannel;

        async fn build_and_establish(
            &self,
            _ct: &CancellationToken,
        ) -> Result<MockChannel, occ_error::BoxError> {
            let channel = MockChannel::new(1);
            channel.fail_send.store(true, Ordering::SeqCst);
            Ok(channel)
        }

        fn send_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    let occ = Builder::new(AlwaysFailSendBuilder)
        .with_on_operation_failed(|_info: &occ::FailedChannelInformation<u64>| async { Ok(false) })
        .build();

    let result = occ.send_message("hello".to_owned()).await;
    assert!(matches!(result, Err(Error::OperationFailed("send_message", _))));
}

/// Builder whose single channel comes pre-loaded with a fixed sequence
/// of inbound commands, letting a test script exactly what
/// `process_command`/`receive_command` will see without needing a
/// handle back into the live channel.
struct ScriptedBuilder {
    responses: Mutex<Vec<Vec<Command>>>,
}

#[async_trait]
impl ChannelBuilder for ScriptedBuilder {
    type Channel = MockChannel;

    async fn build_and_establish(
        &self,
        _ct: &CancellationToken,
    ) -> Result<MockChannel, occ_error::BoxError> {
        let script = self.responses.lock().await.remove(0);
        let channel = MockChannel::new(1);
        *channel.responses.lock().await = script;
        Ok(channel)
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[tokio::test]
async fn process_command_matches_response_by_id_and_skips_unrelated() {
    let unrelated = Command {
        id: CommandId(99),
        payload: "stray".to_owned(),
    };
    let matching = Command {
        id: CommandId(42),
        payload: "pong".to_owned(),
    };
    let occ = OnDemandChannel::new(ScriptedBuilder {
        responses: Mutex::new(vec![vec![unrelated.clone(), matching.clone()]]),
    });

    let unrelated_seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let unrelated_seen = unrelated_seen.clone();
        move |command: Command| {
            let unrelated_seen = unrelated_seen.clone();
            async move {
                unrelated_seen.lock().await.push(command.id);
            }
        }
    };

    let request = Command {
        id: CommandId(42),
        payload: "ping".to_owned(),
    };

    let ct = CancellationToken::new();
    let response = occ
        .process_command(request, &ct, Some(&handler))
        .await
        .unwrap();

    assert_eq!(response.id, CommandId(42));
    assert_eq!(unrelated_seen.lock().await.as_slice(), &[CommandId(99)]);
}

#[tokio::test]
async fn process_command_without_handler_raises_protocol_violation() {
    let unrelated = Command {
        id: CommandId(7),
        payload: "stray".to_owned(),
    };
    let occ = OnDemandChannel::new(ScriptedBuilder {
        responses: Mutex::new(vec![vec![unrelated]]),
    });

    let request = Command {
        id: CommandId(42),
        payload: "ping".to_owned(),
    };

    let no_handler: Option<&fn(Command) -> std::future::Ready<()>> = None;
    let ct = CancellationToken::new();
    let result = occ.process_command(request, &ct, no_handler).await;

    assert!(matches!(result, Err(Error::ProtocolViolation(_, _))));
}

#[tokio::test]
async fn finish_releases_established_channel_without_discard_handler() {
    let discarded = Arc::new(AtomicUsize::new(0));
    let occ = Builder::new(MockBuilder::new())
        .with_on_discarded({
            let discarded = discarded.clone();
            move |_info: &occ::ChannelInformation<u64>| {
                let discarded = discarded.clone();
                async move {
                    discarded.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
        .build();

    occ.send_message("hello".to_owned()).await.unwrap();

    let ct = CancellationToken::new();
    occ.finish(&ct).await.unwrap();

    assert_eq!(discarded.load(Ordering::SeqCst), 0);

    // A send after finish transparently builds a new channel — finish
    // does not dispose the façade, only the one channel instance.
    occ.send_message("after finish".to_owned()).await.unwrap();
}

#[tokio::test]
async fn dispose_fails_every_subsequent_operation() {
    let occ = OnDemandChannel::new(MockBuilder::new());
    occ.send_message("hello".to_owned()).await.unwrap();

    occ.dispose().await;
    assert!(occ.is_disposed());

    let result = occ.send_message("after dispose".to_owned()).await;
    assert!(matches!(result, Err(Error::Disposed)));

    // Idempotent: a second dispose does not panic or double-release.
    occ.dispose().await;
}

#[tokio::test]
async fn on_created_errors_aggregate_across_handlers() {
    let occ = Builder::new(MockBuilder::new())
        .with_on_created(|_info: &occ::ChannelInformation<u64>| async {
            Err(err("handler A failed"))
        })
        .with_on_created(|_info: &occ::ChannelInformation<u64>| async {
            Err(err("handler B failed"))
        })
        .build();

    let result = occ.send_message("hello".to_owned()).await;
    match result {
        Err(Error::Handler(aggregate)) => {
            let messages: Vec<String> = aggregate.errors().iter().map(|e| e.to_string()).collect();
            assert_eq!(messages.len(), 2);
            assert!(messages.iter().any(|m| m.contains("handler A failed")));
            assert!(messages.iter().any(|m| m.contains("handler B failed")));
        }
        other => panic!("expected aggregated handler error, got {:?}", other),
    }
}

#[tokio::test]
async fn cancelling_receive_propagates_cancelled_without_touching_channel_or_builder() {
    let created = Arc::new(AtomicUsize::new(0));
    let occ = Builder::new(MockBuilder::new())
        .with_on_created({
            let created = created.clone();
            move |_info: &occ::ChannelInformation<u64>| {
                let created = created.clone();
                async move {
                    created.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
        .build();

    let ct = CancellationToken::new();
    ct.cancel();

    let result = occ.receive_message(&ct).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    // Cancellation was observed before ever touching the holder, so no
    // build happened and no channel was created.
    assert_eq!(created.load(Ordering::SeqCst), 0);

    // A fresh token still lazily builds normally afterward.
    let fresh = CancellationToken::new();
    occ.receive_message(&fresh).await.unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_first_use_builds_exactly_once() {
    let created = Arc::new(AtomicUsize::new(0));
    let occ = Arc::new(
        Builder::new(MockBuilder::new())
            .with_on_created({
                let created = created.clone();
                move |_info: &occ::ChannelInformation<u64>| {
                    let created = created.clone();
                    async move {
                        created.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            })
            .build(),
    );

    let mut handles = Vec::new();
    for i in 0..8 {
        let occ = occ.clone();
        handles.push(tokio::spawn(async move {
            occ.send_message(format!("concurrent-{}", i)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(created.load(Ordering::SeqCst), 1);
}
