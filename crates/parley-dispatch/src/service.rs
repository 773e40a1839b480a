//! The message router and the handler service worker loop.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parley_store::ChatStore;
use parley_types::{ConnectionId, UserId};

use crate::error::DispatchError;
use crate::handler::HandlerContext;
use crate::message::{ClientMessage, HandlerKind, ServerMessage};
use crate::notify::Notifier;
use crate::priority::Priority;
use crate::queue::{Envelope, MessageQueue};
use crate::registry::{HandlerFactory, HandlerKey, HandlerRegistry};
use crate::runs::ActiveRuns;
use crate::supervisor::Supervisor;
use crate::validate;

/// Default queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration for the handler service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Maximum number of queued messages before `dispatch` rejects.
    pub queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Validates, prioritizes, and enqueues incoming messages.
///
/// Cheap to clone; connections hold one each.
#[derive(Clone)]
pub struct MessageRouter {
    queue: Arc<MessageQueue>,
}

impl MessageRouter {
    /// Route one message from a connection.
    ///
    /// Validation and sanitization run here, before anything is queued.
    /// Returns the assigned priority on success.
    pub fn dispatch(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        mut message: ClientMessage,
    ) -> Result<Priority, DispatchError> {
        let kind = HandlerKind::for_message(&message)
            .ok_or_else(|| DispatchError::Invalid("Message is not routable".into()))?;

        validate::validate(&mut message)?;

        let priority = Priority::for_kind(kind);
        self.queue.push(
            Envelope {
                user_id,
                connection_id,
                message,
            },
            priority,
        )?;

        debug!(kind = %kind, priority = %priority, "Message enqueued");
        Ok(priority)
    }
}

/// The dispatch service: owns the queue, registry, and worker loop.
pub struct MessageHandlerService {
    queue: Arc<MessageQueue>,
    registry: HandlerRegistry,
    factory: Arc<dyn HandlerFactory>,
    ctx: HandlerContext,
    cancel: CancellationToken,
}

impl MessageHandlerService {
    /// Create a service with the default handler factory.
    pub fn new(
        config: ServiceConfig,
        store: Arc<ChatStore>,
        notifier: Arc<dyn Notifier>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Self::with_factory(
            config,
            store,
            notifier,
            supervisor,
            Arc::new(crate::handlers::DefaultHandlerFactory),
        )
    }

    /// Create a service with a custom handler factory.
    pub fn with_factory(
        config: ServiceConfig,
        store: Arc<ChatStore>,
        notifier: Arc<dyn Notifier>,
        supervisor: Arc<dyn Supervisor>,
        factory: Arc<dyn HandlerFactory>,
    ) -> Self {
        Self {
            queue: Arc::new(MessageQueue::new(config.queue_capacity)),
            registry: HandlerRegistry::new(),
            factory,
            ctx: HandlerContext {
                store,
                notifier,
                supervisor,
                active_runs: ActiveRuns::new(),
            },
            cancel: CancellationToken::new(),
        }
    }

    /// A router feeding this service's queue.
    pub fn router(&self) -> MessageRouter {
        MessageRouter {
            queue: Arc::clone(&self.queue),
        }
    }

    /// The shared active-run map. Runs outlive the connection that started
    /// them; cancellation happens through `stop_agent` or shutdown.
    pub fn active_runs(&self) -> ActiveRuns {
        self.ctx.active_runs.clone()
    }

    /// Spawn the worker loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run_worker().await })
    }

    /// Request shutdown: the queue closes and the worker drains then exits.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.close();
    }

    async fn run_worker(&self) {
        info!("Message handler service started");
        loop {
            let envelope = tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Drain what is already queued, then exit.
                    self.queue.close();
                    while let Some(envelope) = self.queue.pop().await {
                        self.process(envelope).await;
                    }
                    break;
                }
                envelope = self.queue.pop() => envelope,
            };
            match envelope {
                Some(envelope) => self.process(envelope).await,
                None => break,
            }
        }
        info!("Message handler service stopped");
    }

    /// Process one envelope with error containment.
    ///
    /// A failing handler (or a handler that cannot be constructed) produces
    /// an `Error` message on the requester's channel; the worker continues.
    async fn process(&self, envelope: Envelope) {
        // The router only enqueues routable messages.
        let Some(kind) = HandlerKind::for_message(&envelope.message) else {
            error!("Unroutable message reached the worker; dropping");
            return;
        };

        let key = HandlerKey::new(kind, envelope.user_id.clone());
        let handler = self
            .registry
            .get_or_create(&key, self.factory.as_ref())
            .await;

        let Some(handler) = handler else {
            warn!(kind = %kind, user_id = %envelope.user_id, "No handler available");
            self.ctx
                .notifier
                .notify_connection(
                    envelope.connection_id,
                    ServerMessage::error(
                        "handler_unavailable",
                        format!("Could not create handler for {kind}"),
                    ),
                )
                .await;
            return;
        };

        if let Err(e) = handler.handle_message(&self.ctx, &envelope).await {
            warn!(
                kind = %kind,
                user_id = %envelope.user_id,
                error = %e,
                "Handler failed"
            );
            self.ctx
                .notifier
                .notify_connection(
                    envelope.connection_id,
                    ServerMessage::error(e.code(), e.to_string()),
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use parley_types::{ChatRole, RunStatus, Thread, ThreadId};

    use crate::testing::{ChannelNotifier, MockSupervisor};

    struct Fixture {
        service: Arc<MessageHandlerService>,
        router: MessageRouter,
        notifier: ChannelNotifier,
        store: Arc<ChatStore>,
        worker: JoinHandle<()>,
    }

    fn fixture_with(supervisor: Arc<dyn Supervisor>) -> Fixture {
        let store = Arc::new(ChatStore::open_in_memory().unwrap());
        let notifier = ChannelNotifier::new();
        let service = Arc::new(MessageHandlerService::new(
            ServiceConfig::default(),
            Arc::clone(&store),
            Arc::new(notifier.clone()),
            supervisor,
        ));
        let worker = service.spawn();
        let router = service.router();
        Fixture {
            service,
            router,
            notifier,
            store,
            worker,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MockSupervisor::with_reply("hello from agent")))
    }

    async fn settle(fixture: &Fixture) {
        // Let the worker drain; the queue length reaching zero is not enough
        // because the last envelope may still be in flight.
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if fixture.service.queue.is_empty() {
                return;
            }
        }
    }

    fn user() -> UserId {
        UserId::new("alice")
    }

    fn seeded_thread(store: &ChatStore, owner: &UserId) -> ThreadId {
        let thread = Thread::new(owner.clone());
        store
            .with_unit_of_work(|uow| uow.insert_thread(&thread))
            .unwrap();
        thread.id
    }

    #[tokio::test]
    async fn start_agent_creates_thread_and_run() {
        let fx = fixture();
        fx.router
            .dispatch(
                user(),
                ConnectionId::new(),
                ClientMessage::StartAgent {
                    thread_id: None,
                    agent: "researcher".into(),
                },
            )
            .unwrap();

        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let messages = fx.notifier.messages();
        let started = messages.iter().find_map(|m| match m {
            ServerMessage::AgentStarted {
                thread_id, agent, ..
            } => Some((*thread_id, agent.clone())),
            _ => None,
        });
        let (thread_id, agent) = started.expect("expected AgentStarted");
        assert_eq!(agent, "researcher");

        // The run is persisted and tracked as active.
        let active = fx
            .store
            .with_unit_of_work(|uow| uow.active_run_for_thread(thread_id))
            .unwrap();
        assert!(active.is_some());
        assert!(fx.service.active_runs().get(thread_id).is_some());

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn user_message_persists_and_streams_reply() {
        let fx = fixture();
        let owner = user();
        let thread_id = seeded_thread(&fx.store, &owner);

        fx.router
            .dispatch(
                owner.clone(),
                ConnectionId::new(),
                ClientMessage::UserMessage {
                    thread_id,
                    content: "  hi there ".into(),
                },
            )
            .unwrap();

        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = fx.notifier.messages();
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::MessageSaved { .. })));
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::AgentChunk { done: true, .. })));

        // Both the sanitized user message and the agent reply are persisted.
        let history = fx
            .store
            .with_unit_of_work(|uow| uow.list_messages(&owner, thread_id, 10))
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[0].content, "hi there");
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert!(history[1].content.contains("hello"));

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn history_is_returned_to_requester() {
        let fx = fixture();
        let owner = user();
        let thread_id = seeded_thread(&fx.store, &owner);
        fx.store
            .with_unit_of_work(|uow| {
                uow.insert_message(&parley_types::ChatMessage::new(
                    thread_id,
                    ChatRole::User,
                    "stored",
                ))
            })
            .unwrap();

        let conn = ConnectionId::new();
        fx.router
            .dispatch(
                owner,
                conn,
                ClientMessage::GetThreadHistory {
                    thread_id,
                    limit: None,
                },
            )
            .unwrap();

        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sent = fx.notifier.sent();
        let (to, history) = sent
            .iter()
            .find_map(|(c, m)| match m {
                ServerMessage::ThreadHistory { messages, .. } => Some((*c, messages.clone())),
                _ => None,
            })
            .expect("expected ThreadHistory");
        assert_eq!(to, conn);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "stored");

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn cross_tenant_access_is_contained_as_error() {
        let fx = fixture();
        let thread_id = seeded_thread(&fx.store, &UserId::new("alice"));

        fx.router
            .dispatch(
                UserId::new("mallory"),
                ConnectionId::new(),
                ClientMessage::GetThreadHistory {
                    thread_id,
                    limit: None,
                },
            )
            .unwrap();

        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let messages = fx.notifier.messages();
        assert!(messages.iter().any(
            |m| matches!(m, ServerMessage::Error { code, .. } if code == "forbidden")
        ));
        assert!(!messages
            .iter()
            .any(|m| matches!(m, ServerMessage::ThreadHistory { .. })));

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn stop_agent_cancels_active_run() {
        let fx = fixture();
        let owner = user();
        let conn = ConnectionId::new();

        fx.router
            .dispatch(
                owner.clone(),
                conn,
                ClientMessage::StartAgent {
                    thread_id: None,
                    agent: "researcher".into(),
                },
            )
            .unwrap();
        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let thread_id = fx
            .notifier
            .messages()
            .iter()
            .find_map(|m| match m {
                ServerMessage::AgentStarted { thread_id, .. } => Some(*thread_id),
                _ => None,
            })
            .unwrap();
        let token = fx.service.active_runs().get(thread_id).unwrap().cancel;

        fx.router
            .dispatch(owner, conn, ClientMessage::StopAgent { thread_id })
            .unwrap();
        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(token.is_cancelled());
        assert!(fx.service.active_runs().get(thread_id).is_none());
        assert!(fx.notifier.messages().iter().any(|m| matches!(
            m,
            ServerMessage::AgentStopped {
                status: RunStatus::Cancelled,
                ..
            }
        )));

        // The persisted run is terminal.
        let active = fx
            .store
            .with_unit_of_work(|uow| uow.active_run_for_thread(thread_id))
            .unwrap();
        assert!(active.is_none());

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_active_run_reports_error() {
        let fx = fixture();
        let owner = user();
        let thread_id = seeded_thread(&fx.store, &owner);

        fx.router
            .dispatch(
                owner,
                ConnectionId::new(),
                ClientMessage::StopAgent { thread_id },
            )
            .unwrap();
        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(fx.notifier.messages().iter().any(
            |m| matches!(m, ServerMessage::Error { code, .. } if code == "no_active_run")
        ));

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn second_start_on_same_thread_is_rejected() {
        let fx = fixture();
        let owner = user();
        let conn = ConnectionId::new();

        fx.router
            .dispatch(
                owner.clone(),
                conn,
                ClientMessage::StartAgent {
                    thread_id: None,
                    agent: "researcher".into(),
                },
            )
            .unwrap();
        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let thread_id = fx
            .notifier
            .messages()
            .iter()
            .find_map(|m| match m {
                ServerMessage::AgentStarted { thread_id, .. } => Some(*thread_id),
                _ => None,
            })
            .unwrap();

        fx.router
            .dispatch(
                owner,
                conn,
                ClientMessage::StartAgent {
                    thread_id: Some(thread_id),
                    agent: "researcher".into(),
                },
            )
            .unwrap();
        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(fx.notifier.messages().iter().any(
            |m| matches!(m, ServerMessage::Error { code, .. } if code == "run_active")
        ));

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn supervisor_failure_is_contained() {
        let fx = fixture_with(Arc::new(MockSupervisor::failing()));
        let owner = user();
        let thread_id = seeded_thread(&fx.store, &owner);

        fx.router
            .dispatch(
                owner.clone(),
                ConnectionId::new(),
                ClientMessage::UserMessage {
                    thread_id,
                    content: "hi".into(),
                },
            )
            .unwrap();
        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The user message is persisted, the failure is reported, and the
        // worker survives to handle the next message.
        assert!(fx.notifier.messages().iter().any(
            |m| matches!(m, ServerMessage::Error { code, .. } if code == "agent_error")
        ));

        fx.router
            .dispatch(
                owner,
                ConnectionId::new(),
                ClientMessage::GetThreadHistory {
                    thread_id,
                    limit: None,
                },
            )
            .unwrap();
        settle(&fx).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let history = fx
            .notifier
            .messages()
            .iter()
            .find_map(|m| match m {
                ServerMessage::ThreadHistory { messages, .. } => Some(messages.clone()),
                _ => None,
            })
            .expect("worker should still serve requests");
        assert_eq!(history.len(), 1);

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn failing_factory_yields_handler_unavailable() {
        struct RefusingFactory;

        #[async_trait]
        impl HandlerFactory for RefusingFactory {
            async fn create(
                &self,
                _key: &HandlerKey,
            ) -> Result<Arc<dyn crate::MessageHandler>, DispatchError> {
                Err(DispatchError::Invalid("no handlers today".into()))
            }
        }

        let store = Arc::new(ChatStore::open_in_memory().unwrap());
        let notifier = ChannelNotifier::new();
        let service = Arc::new(MessageHandlerService::with_factory(
            ServiceConfig::default(),
            Arc::clone(&store),
            Arc::new(notifier.clone()),
            Arc::new(MockSupervisor::with_reply("unused")),
            Arc::new(RefusingFactory),
        ));
        let worker = service.spawn();

        service
            .router()
            .dispatch(
                user(),
                ConnectionId::new(),
                ClientMessage::StartAgent {
                    thread_id: None,
                    agent: "researcher".into(),
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(notifier.messages().iter().any(
            |m| matches!(m, ServerMessage::Error { code, .. } if code == "handler_unavailable")
        ));

        service.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_enqueue() {
        let fx = fixture();
        let err = fx
            .router
            .dispatch(
                user(),
                ConnectionId::new(),
                ClientMessage::UserMessage {
                    thread_id: ThreadId::new(),
                    content: "   ".into(),
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
        assert!(fx.service.queue.is_empty());

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_assigns_static_priorities() {
        let fx = fixture();
        let conn = ConnectionId::new();

        let p = fx
            .router
            .dispatch(
                user(),
                conn,
                ClientMessage::StopAgent {
                    thread_id: ThreadId::new(),
                },
            )
            .unwrap();
        assert_eq!(p, Priority::High);

        let p = fx
            .router
            .dispatch(
                user(),
                conn,
                ClientMessage::GetThreadHistory {
                    thread_id: ThreadId::new(),
                    limit: None,
                },
            )
            .unwrap();
        assert_eq!(p, Priority::Low);

        fx.service.shutdown();
        fx.worker.await.unwrap();
    }
}
