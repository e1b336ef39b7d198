//! `Gateway` — the single entry point every transport (in-process, Unix
//! socket, WebSocket) and every [`crate::plugin::GatewayPlugin`] calls into
//! (spec §4.2). Holds the App registry, resolves session keys, and
//! dispatches well-known `req` methods onto `App`/`Session` operations.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use async_trait::async_trait;

use tentickle_core::config::AuthConfig;
use tentickle_core::types::SessionKey;
use tentickle_engine::InputMessage;
use tentickle_protocol::frames::{EventFrame, ReqFrame, ResFrame};
use tentickle_protocol::handshake::ConnectParams;
use tentickle_protocol::methods;
use tentickle_scheduler::{Trigger, TriggerSink};
use tentickle_store::types::{ExecutionTrigger, MessageRole};
use tentickle_store::Store;

use crate::app::App;
use crate::error::{GatewayError, Result};
use crate::plugin::GatewayPlugin;
use crate::ws::broadcast::WsClients;
use crate::ws::handshake;

/// Registry of named [`App`]s plus the method dispatcher (spec §4.2).
pub struct Gateway {
    store: Arc<Store>,
    apps: DashMap<String, Arc<App>>,
    default_app: String,
    plugins: DashMap<String, Arc<dyn GatewayPlugin>>,
    auth: AuthConfig,
    ws_clients: WsClients,
}

impl Gateway {
    pub fn new(store: Arc<Store>, default_app: impl Into<String>, auth: AuthConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            apps: DashMap::new(),
            default_app: default_app.into(),
            plugins: DashMap::new(),
            auth,
            ws_clients: WsClients::new(),
        })
    }

    pub fn ws_client_connected(&self, conn_id: &str) {
        self.ws_clients.insert(conn_id.to_string());
    }

    pub fn ws_client_disconnected(&self, conn_id: &str) {
        self.ws_clients.remove(conn_id);
    }

    pub fn ws_client_count(&self) -> usize {
        self.ws_clients.len()
    }

    /// Verify a `connect` handshake's auth payload against the configured
    /// policy (spec §6 handshake, §7 auth).
    pub fn verify_auth(&self, params: &ConnectParams) -> std::result::Result<(), String> {
        handshake::verify_auth(params, &self.auth)
    }

    pub fn register_app(&self, app: Arc<App>) {
        info!(app = %app.name, "registered app");
        self.apps.insert(app.name.clone(), app);
    }

    pub fn register_plugin(&self, plugin: Arc<dyn GatewayPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn app_names(&self) -> Vec<String> {
        self.apps.iter().map(|e| e.key().clone()).collect()
    }

    fn resolve_app(&self, key: &SessionKey) -> Result<Arc<App>> {
        let name = key.app_name().unwrap_or(&self.default_app);
        self.apps
            .get(name)
            .map(|a| a.clone())
            .ok_or_else(|| GatewayError::UnknownApp(name.to_string()))
    }

    /// Resolve (creating if absent) the session addressed by `key` and
    /// queue `text` as a user message (spec §4.1 `send`, §6 `session.send`).
    pub async fn send(&self, key: &SessionKey, text: impl Into<String>) -> Result<(String, String)> {
        let app = self.resolve_app(key)?;
        let session = app.get_or_create_session(key.local_key()).await?;
        let execution_id = session.send_text(text, None);
        Ok((session.id.clone(), execution_id))
    }

    /// Deliver a fired cron/oneshot trigger as an `ExecutionTrigger::Cron`
    /// send, distinct from an ordinary client `session.send` (spec §4.4).
    pub async fn send_cron(&self, key: &SessionKey, prompt: &str) -> Result<(String, String)> {
        let app = self.resolve_app(key)?;
        let session = app.get_or_create_session(key.local_key()).await?;
        let execution_id = session.send(
            ExecutionTrigger::Cron,
            vec![InputMessage {
                role: MessageRole::User,
                text: prompt.to_string(),
                entity_id: None,
            }],
        );
        Ok((session.id.clone(), execution_id))
    }

    pub async fn abort(&self, key: &SessionKey) -> Result<()> {
        let app = self.resolve_app(key)?;
        if let Some(session) = app.peek_session(key.local_key()) {
            session.abort();
        }
        Ok(())
    }

    pub async fn subscribe(
        &self,
        key: &SessionKey,
        filter: Option<Vec<String>>,
    ) -> Result<tokio::sync::mpsc::Receiver<EventFrame>> {
        let app = self.resolve_app(key)?;
        let session = app.get_or_create_session(key.local_key()).await?;
        Ok(session.subscribe(filter))
    }

    /// Emergency stop (spec §4.2, §6 `stop`): abort every session in every
    /// registered App. Cooperative — executions still persist their
    /// partial state on the way out, via the same drain-loop path abort()
    /// always takes.
    pub fn stop_all(&self) {
        warn!("gateway stop_all invoked: aborting every session in every app");
        for app in self.apps.iter() {
            app.value().abort_all();
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Dispatch a parsed request frame to the matching operation (spec §6
    /// method table). Transports (WS, Unix socket, in-process) all funnel
    /// through this so the dispatch logic exists exactly once.
    pub async fn dispatch(&self, req: &ReqFrame) -> ResFrame {
        match self.dispatch_inner(req).await {
            Ok(payload) => ResFrame::ok(req.id.clone(), payload),
            Err(e) => ResFrame::err(req.id.clone(), e.code(), &e.to_string()),
        }
    }

    async fn dispatch_inner(&self, req: &ReqFrame) -> Result<serde_json::Value> {
        match req.method.as_str() {
            methods::SESSION_SEND => {
                let key = self.session_key_of(req)?;
                let text = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("text"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let (session_id, execution_id) = self.send(&key, text).await?;
                Ok(serde_json::json!({ "sessionId": session_id, "executionId": execution_id }))
            }
            methods::SESSION_ABORT => {
                let key = self.session_key_of(req)?;
                self.abort(&key).await?;
                Ok(serde_json::json!({ "ok": true }))
            }
            methods::SESSION_LOAD => {
                let key = self.session_key_of(req)?;
                let app = self.resolve_app(&key)?;
                let session = app.get_or_create_session(key.local_key()).await?;
                let snapshot = self.store.load_snapshot(&session.id)?;
                Ok(serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null))
            }
            methods::SESSIONS_LIST => {
                let app_name = req
                    .params
                    .as_ref()
                    .and_then(|p| p.get("app"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(&self.default_app);
                let app = self
                    .apps
                    .get(app_name)
                    .map(|a| a.clone())
                    .ok_or_else(|| GatewayError::UnknownApp(app_name.to_string()))?;
                Ok(serde_json::json!({ "sessions": app.session_keys() }))
            }
            methods::SESSIONS_RESOLVE => {
                let key = self.session_key_of(req)?;
                let app = self.resolve_app(&key)?;
                match self.store.get_session_by_key(&key)? {
                    Some(row) => Ok(serde_json::to_value(row).unwrap_or(serde_json::Value::Null)),
                    None => {
                        let _ = app;
                        Err(GatewayError::InvalidSessionKey(key.to_string()))
                    }
                }
            }
            methods::AGENT_LIST => Ok(serde_json::json!({ "apps": self.app_names() })),
            methods::AGENT_STATUS => {
                let key = self.session_key_of(req)?;
                let app = self.resolve_app(&key)?;
                let busy = app
                    .peek_session(key.local_key())
                    .map(|s| s.is_busy())
                    .unwrap_or(false);
                Ok(serde_json::json!({ "busy": busy }))
            }
            methods::STOP => {
                self.stop_all();
                Ok(serde_json::json!({ "ok": true }))
            }
            other => Err(GatewayError::InvalidSessionKey(format!(
                "unknown method: {other}"
            ))),
        }
    }

    fn session_key_of(&self, req: &ReqFrame) -> Result<SessionKey> {
        let raw = req
            .session_id
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidSessionKey("missing sessionId".to_string()))?;
        SessionKey::parse(raw).map_err(GatewayError::InvalidSessionKey)
    }
}

/// Routes fired cron/oneshot triggers into sessions (spec §4.4:
/// `Gateway.send(trigger.target || defaultTarget, ...)`).
#[async_trait]
impl TriggerSink for Gateway {
    async fn deliver(&self, trigger: &Trigger) -> std::result::Result<(), String> {
        let target = trigger
            .target
            .as_deref()
            .ok_or_else(|| "trigger has no resolved target".to_string())?;
        let key = SessionKey::parse(target)?;
        self.send_cron(&key, &trigger.prompt)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
