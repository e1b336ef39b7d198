//! `App` — a named agent factory that mints [`Session`]s on demand, keyed by
//! an arbitrary local session key (spec §4.2). Sessions are owned
//! exclusively by their `App`; the [`crate::gateway::Gateway`] only holds
//! weak references by key.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use tentickle_core::types::{EntityId, SessionKey};
use tentickle_engine::{ExecutionConfig, Session, SessionFactory};
use tentickle_memory::MemoryManager;
use tentickle_sandbox::{LocalSandbox, Sandbox};
use tentickle_store::types::Entity;
use tentickle_store::Store;

use crate::error::{GatewayError, Result};

/// One named agent: its model/tool configuration, its own sandbox root, and
/// the set of sessions it has minted so far.
pub struct App {
    pub name: String,
    store: Arc<Store>,
    config: Arc<ExecutionConfig>,
    workspace_root: PathBuf,
    memory: Option<Arc<MemoryManager>>,
    owner_entity_id: String,
    sessions: DashMap<String, Arc<Session>>,
    /// Coarse creation lock — session creation is cheap and rare enough that
    /// a single lock per App is simpler than per-key locking, and it still
    /// gives `get_or_create_session` the idempotent-under-concurrency
    /// property spec §4.2 requires.
    creation_lock: AsyncMutex<()>,
    self_weak: Weak<App>,
}

impl App {
    pub fn new(
        name: impl Into<String>,
        store: Arc<Store>,
        config: Arc<ExecutionConfig>,
        workspace_root: PathBuf,
        memory: Option<Arc<MemoryManager>>,
        owner_entity_id: String,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name: name.into(),
            store,
            config,
            workspace_root,
            memory,
            owner_entity_id,
            sessions: DashMap::new(),
            creation_lock: AsyncMutex::new(()),
            self_weak: weak.clone(),
        })
    }

    /// Resolve (creating if absent) the session for `local_key`. Concurrent
    /// calls for the same never-seen key are serialized behind
    /// `creation_lock`, so only one is ever actually constructed.
    pub async fn get_or_create_session(&self, local_key: &str) -> Result<Arc<Session>> {
        if let Some(session) = self.sessions.get(local_key) {
            return Ok(session.clone());
        }

        let _guard = self.creation_lock.lock().await;
        if let Some(session) = self.sessions.get(local_key) {
            return Ok(session.clone());
        }

        let key = SessionKey::scoped(self.name.clone(), local_key);
        let workspace_path = self.workspace_root.join(local_key);
        std::fs::create_dir_all(&workspace_path).map_err(GatewayError::Io)?;

        let row = self.store.get_or_create_session(
            &key,
            &self.owner_entity_id,
            &workspace_path.to_string_lossy(),
        )?;

        let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::mount(workspace_path.clone()));
        let factory: Option<Arc<dyn SessionFactory>> = self
            .self_weak
            .upgrade()
            .map(|arc| arc as Arc<dyn SessionFactory>);
        let session = Session::new(
            row.id.clone(),
            key,
            self.store.clone(),
            self.config.clone(),
            sandbox,
            self.memory.clone(),
            factory,
        );

        self.sessions.insert(local_key.to_string(), session.clone());
        Ok(session)
    }

    /// An already-minted session, if one exists in memory for this key.
    pub fn peek_session(&self, local_key: &str) -> Option<Arc<Session>> {
        self.sessions.get(local_key).map(|s| s.clone())
    }

    pub fn session_keys(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Cooperatively abort every session this App has minted (spec §4.2
    /// daemon lifecycle: `stopDaemon()` MUST abort active executions).
    pub fn abort_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().abort();
        }
    }
}

/// Ensures `App::owner_entity_id` refers to a real row (idempotent —
/// `upsert_entity` is `INSERT ... ON CONFLICT DO UPDATE`).
pub fn ensure_owner_entity(store: &Store, owner: &Entity) -> Result<()> {
    store.upsert_entity(owner)?;
    Ok(())
}

pub fn default_owner(name: &str) -> Entity {
    let now = chrono::Utc::now().to_rfc3339();
    Entity {
        id: EntityId::new(),
        entity_type: tentickle_core::types::EntityType::Person,
        name: name.to_string(),
        summary: None,
        is_owner: true,
        metadata: serde_json::json!({}),
        created_at: now.clone(),
        updated_at: now,
    }
}

#[async_trait]
impl SessionFactory for App {
    /// Mint (or resolve) the child session for a spawned agent. `agent`
    /// names the local key the child is addressed by within this App — the
    /// spawn tree shares the parent's owning App, not a separate one (spec
    /// §4.1 "Spawning").
    async fn spawn_child(
        &self,
        parent: &Session,
        agent: &str,
    ) -> tentickle_engine::Result<Arc<Session>> {
        let local_key = format!("{}::spawn::{agent}", parent.key.local_key());
        self.get_or_create_session(&local_key)
            .await
            .map_err(|e| tentickle_engine::EngineError::Internal(e.to_string()))
    }
}
