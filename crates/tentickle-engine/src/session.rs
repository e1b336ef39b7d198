//! `Session` — the unit of conversation (spec §4.1). Owns the timeline (via
//! the store), the knob map, the event bus, and drives a queue of pending
//! `send()` inputs one execution at a time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tentickle_store::types::{ExecutionTrigger, MessageRole};
use tentickle_store::Store;

use crate::config::ExecutionConfig;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::execution::{run_execution, ExecutionRuntime, InputMessage};
use crate::knobs::KnobMap;
use crate::tools::{AutoApprove, ConfirmationHost, SpawnHost, ToolContext};
use tentickle_memory::MemoryManager;
use tentickle_protocol::frames::EventFrame;
use tentickle_sandbox::Sandbox;

fn new_exec_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Mints child sessions for `ctx.spawn(...)` (spec §4.1 "Spawning"). The
/// `tentickle-gateway` crate's `App` implements this so a spawned child
/// shares the parent's owning App without `tentickle-engine` depending on
/// the gateway's registry.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create (or resolve) the child session for `agent`, sharing the
    /// parent's sandbox and workspace (spec §4.1: "shares the parent's
    /// sandbox and workspace").
    async fn spawn_child(&self, parent: &Session, agent: &str) -> Result<Arc<Session>>;
}

struct QueuedInput {
    execution_id: String,
    trigger: ExecutionTrigger,
    messages: Vec<InputMessage>,
}

struct SessionInner {
    queue: VecDeque<QueuedInput>,
    current_cancel: Option<CancellationToken>,
}

/// A durable conversation context (spec §3 Session, §4.1). Exposes the
/// three client operations — `send`, `abort`, `subscribe` — and implements
/// [`SpawnHost`] so its own tool dispatch can spawn children.
pub struct Session {
    pub id: String,
    pub key: tentickle_core::types::SessionKey,
    store: Arc<Store>,
    config: Arc<ExecutionConfig>,
    knobs: Arc<Mutex<KnobMap>>,
    events: Arc<Mutex<EventBus>>,
    sandbox: Arc<dyn Sandbox>,
    memory: Option<Arc<MemoryManager>>,
    confirm: Arc<dyn ConfirmationHost>,
    factory: Option<Arc<dyn SessionFactory>>,
    inner: Mutex<SessionInner>,
    draining: AtomicBool,
    /// Cancellation tokens of spawned children, so aborting the root
    /// cancels the whole spawn tree (spec §4.1 "A spawn tree MUST
    /// terminate when the root session terminates").
    children: Mutex<Vec<CancellationToken>>,
    /// Handle to its own `Arc`, so `&self` methods can spawn background
    /// work that outlives the call (set via `Arc::new_cyclic` in `new`).
    self_weak: Weak<Session>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        key: tentickle_core::types::SessionKey,
        store: Arc<Store>,
        config: Arc<ExecutionConfig>,
        sandbox: Arc<dyn Sandbox>,
        memory: Option<Arc<MemoryManager>>,
        factory: Option<Arc<dyn SessionFactory>>,
    ) -> Arc<Self> {
        let knobs = store
            .load_snapshot(&id)
            .ok()
            .flatten()
            .map(|snap| Arc::new(Mutex::new(KnobMap::from_value(&snap.com_state))))
            .unwrap_or_else(|| Arc::new(Mutex::new(KnobMap::new())));

        Arc::new_cyclic(|weak| Self {
            id,
            key,
            store,
            config,
            knobs,
            events: Arc::new(Mutex::new(EventBus::new())),
            sandbox,
            memory,
            confirm: Arc::new(AutoApprove),
            factory,
            inner: Mutex::new(SessionInner {
                queue: VecDeque::new(),
                current_cancel: None,
            }),
            draining: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            self_weak: weak.clone(),
        })
    }

    /// Enqueue a batch of input messages and begin (or continue) an
    /// execution. If one is already running, the input queues and the
    /// drain loop picks it up next (spec §4.1 `send`).
    pub fn send(&self, trigger: ExecutionTrigger, messages: Vec<InputMessage>) -> String {
        let execution_id = new_exec_id();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.queue.push_back(QueuedInput {
                execution_id: execution_id.clone(),
                trigger,
                messages,
            });
        }
        self.kick_drain();
        execution_id
    }

    /// Convenience: queue a single user text message (spec §6 input
    /// envelope shape, simplified to one text block).
    pub fn send_text(&self, text: impl Into<String>, entity_id: Option<String>) -> String {
        self.send(
            ExecutionTrigger::Send,
            vec![InputMessage {
                role: MessageRole::User,
                text: text.into(),
                entity_id,
            }],
        )
    }

    /// Signal cancellation to the active execution (spec §4.1 `abort`).
    /// Cooperative: the engine stops after the in-flight tool/model call
    /// resolves. Cascades to every tracked spawned child.
    pub fn abort(&self) {
        if let Some(token) = self.inner.lock().unwrap().current_cancel.clone() {
            token.cancel();
        }
        for child in self.children.lock().unwrap().iter() {
            child.cancel();
        }
    }

    /// Attach a listener, optionally filtered by event type name (spec
    /// §4.1 `subscribe`).
    pub fn subscribe(&self, filter: Option<Vec<String>>) -> tokio::sync::mpsc::Receiver<EventFrame> {
        self.events.lock().unwrap().subscribe(filter)
    }

    fn kick_drain(&self) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(this) = self.self_weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.drain_loop().await;
        });
    }

    async fn drain_loop(self: Arc<Self>) {
        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap();
                inner.queue.pop_front()
            };
            let Some(item) = next else {
                self.draining.store(false, Ordering::Release);
                return;
            };

            let cancel = CancellationToken::new();
            {
                let mut inner = self.inner.lock().unwrap();
                inner.current_cancel = Some(cancel.clone());
            }

            let spawn_host: Option<Arc<dyn SpawnHost>> = self.factory.clone().map(|factory| {
                Arc::new(FactorySpawnHost {
                    parent: self.clone(),
                    factory,
                }) as Arc<dyn SpawnHost>
            });

            let tool_ctx_template = Arc::new(ToolContext {
                session_id: self.id.clone(),
                sandbox: self.sandbox.clone(),
                memory: self.memory.clone(),
                cancel: cancel.clone(),
                confirm: self.confirm.clone(),
                spawn_host,
            });

            let rt = ExecutionRuntime {
                store: self.store.clone(),
                session_id: self.id.clone(),
                config: self.config.clone(),
                knobs: self.knobs.clone(),
                events: self.events.clone(),
                tool_ctx_template,
            };

            if let Err(e) = run_execution(&rt, &item.execution_id, item.trigger, item.messages, cancel).await {
                warn!(session_id = %self.id, execution_id = %item.execution_id, error = %e, "execution bubbled an error");
            }

            // Snapshot the knobs back so `ref:<index>` expansion state
            // (and any other session_snapshots-backed knob) survives a
            // restart (spec §4.3 save, §4.6).
            self.flush_knobs();

            {
                let mut inner = self.inner.lock().unwrap();
                inner.current_cancel = None;
            }
        }
    }

    fn flush_knobs(&self) {
        let Some(mut snapshot) = self.store.load_snapshot(&self.id).ok().flatten() else {
            return;
        };
        snapshot.com_state = self.knobs.lock().unwrap().to_value();
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            warn!(session_id = %self.id, error = %e, "failed to persist knob snapshot");
        }
    }

    /// True while an execution is running or input is queued.
    pub fn is_busy(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SpawnHost for Session {
    async fn spawn(
        &self,
        _agent: &str,
        _input: Value,
        _label: Option<String>,
        _max_ticks: Option<u32>,
    ) -> std::result::Result<Value, String> {
        Err("spawning requires an App-backed session factory".to_string())
    }
}

/// Spawn-capable wrapper bound to a concrete [`SessionFactory`] — installed
/// as `Arc<dyn SpawnHost>` in place of `Session` itself whenever a factory
/// is available, since `SpawnHost::spawn` needs `&Arc<Session>` semantics
/// that a plain `&self` trait method on `Session` cannot provide.
pub struct FactorySpawnHost {
    pub parent: Arc<Session>,
    pub factory: Arc<dyn SessionFactory>,
}

#[async_trait]
impl SpawnHost for FactorySpawnHost {
    async fn spawn(
        &self,
        agent: &str,
        input: Value,
        label: Option<String>,
        max_ticks: Option<u32>,
    ) -> std::result::Result<Value, String> {
        let child = self
            .factory
            .spawn_child(&self.parent, agent)
            .await
            .map_err(|e| e.to_string())?;

        {
            let mut siblings = self.parent.children.lock().unwrap();
            let child_cancel = CancellationToken::new();
            siblings.push(child_cancel);
        }

        let text = input
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string());
        let exec_id = child.send_text(text, None);
        if let Some(max_ticks) = max_ticks {
            let _ = max_ticks; // informational; the child's own config.max_ticks remains the hard ceiling (spec §9 open question 1).
        }
        let _ = label;

        // Await the child's own drain loop finishing this execution.
        let mut rx = child.subscribe(Some(vec!["execution_end".to_string()]));
        while let Some(frame) = rx.recv().await {
            if frame.execution_id.as_deref() == Some(exec_id.as_str()) {
                return Ok(frame.payload.unwrap_or(Value::Null));
            }
        }
        Err("child session closed before execution_end".to_string())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolUseContinuation;
    use crate::model::FakeModelClient;
    use tentickle_core::types::{EntityId, EntityType, SessionKey};
    use tentickle_sandbox::LocalSandbox;

    fn test_session() -> (Arc<Store>, Arc<Session>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let owner = EntityId::new();
        store
            .upsert_entity(&tentickle_store::types::Entity {
                id: owner.clone(),
                entity_type: EntityType::Person,
                name: "ryan".into(),
                summary: None,
                is_owner: true,
                metadata: serde_json::json!({}),
                created_at: chrono::Utc::now().to_rfc3339(),
                updated_at: chrono::Utc::now().to_rfc3339(),
            })
            .unwrap();
        let key = SessionKey::unscoped("main");
        let row = store
            .get_or_create_session(&key, owner.as_str(), "/tmp/ws")
            .unwrap();

        let config = Arc::new(ExecutionConfig {
            model_name: "echo".to_string(),
            model: Arc::new(FakeModelClient::text_only("hi")),
            max_tokens: 1024,
            max_ticks: 5,
            grounding: vec![],
            tools: vec![],
            continuation: Arc::new(ToolUseContinuation),
        });

        let session = Session::new(
            row.id.clone(),
            key,
            store.clone(),
            config,
            Arc::new(LocalSandbox::mount("/tmp/ws")),
            None,
            None,
        );
        (store, session)
    }

    #[tokio::test]
    async fn send_drains_and_commits_entries() {
        let (store, session) = test_session();
        let mut rx = session.subscribe(Some(vec!["execution_end".to_string()]));
        session.send_text("hello", None);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "execution_end");

        let snapshot = store.load_snapshot(&session.id).unwrap().unwrap();
        assert_eq!(snapshot.timeline.len(), 2); // user + assistant
    }

    #[tokio::test]
    async fn queued_sends_drain_one_execution_at_a_time() {
        let (store, session) = test_session();
        let mut rx = session.subscribe(Some(vec!["execution_end".to_string()]));
        session.send_text("first", None);
        session.send_text("second", None);

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let snapshot = store.load_snapshot(&session.id).unwrap().unwrap();
        assert_eq!(snapshot.timeline.len(), 4);
    }
}
