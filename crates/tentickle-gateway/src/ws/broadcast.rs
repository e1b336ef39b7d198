//! Per-connection subscription plumbing for the WebSocket transport. Unlike
//! a single fan-out broadcaster, each client subscribes to a specific
//! session's event bus (spec §4.1 `subscribe`), so this module only tracks
//! the small bit of connection bookkeeping the gateway needs: how many WS
//! clients are currently attached.

use dashmap::DashSet;

/// Tracks live WS connection ids for `/health`'s `ws_clients` count.
#[derive(Default)]
pub struct WsClients {
    ids: DashSet<String>,
}

impl WsClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: String) {
        self.ids.insert(id);
    }

    pub fn remove(&self, id: &str) {
        self.ids.remove(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
