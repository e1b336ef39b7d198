use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use tentickle_core::config::PROTOCOL_VERSION;

use crate::gateway::Gateway;

/// GET /health — liveness probe: process metadata and the registered apps.
pub async fn health_handler(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
        "apps": gateway.app_names(),
        "wsClients": gateway.ws_client_count(),
    }))
}
