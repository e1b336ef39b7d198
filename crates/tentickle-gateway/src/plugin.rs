//! Hot-pluggable gateway connectors (spec §4.2: "accept hot-pluggable
//! `GatewayPlugin` instances ... which spawn long-lived ... workers, read
//! external events, and call `gateway.send` on behalf of remote users").
//!
//! Unlike [`tentickle_channels::Channel`] (an outbound delivery adapter for
//! a specific external service), a `GatewayPlugin` is the inbound half: it
//! owns its own event loop and drives the [`crate::gateway::Gateway`] from
//! the outside. The reconnect-with-backoff shape is shared with
//! `tentickle-channels`'s `ChannelManager`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gateway::Gateway;

const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 300;

/// A long-lived connector registered with the gateway (spec §4.2).
#[async_trait::async_trait]
pub trait GatewayPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Run the plugin's event loop until `cancel` fires. Implementations
    /// should call `gateway.send(...)` as external events arrive and return
    /// promptly once cancellation is observed.
    async fn run(&self, gateway: Arc<Gateway>, cancel: CancellationToken) -> Result<(), String>;
}

/// Drive a plugin with exponential backoff + jitter between restarts
/// (mirrors `tentickle_channels::manager::connect_with_backoff`). Runs until
/// `cancel` fires; a plugin that exits cleanly (`Ok(())`) is not restarted.
pub async fn run_with_backoff(
    plugin: Arc<dyn GatewayPlugin>,
    gateway: Arc<Gateway>,
    cancel: CancellationToken,
) {
    let mut delay = Duration::from_secs(BACKOFF_BASE_SECS);
    loop {
        if cancel.is_cancelled() {
            return;
        }
        info!(plugin = plugin.name(), "starting gateway plugin");
        match plugin.run(gateway.clone(), cancel.clone()).await {
            Ok(()) => {
                info!(plugin = plugin.name(), "gateway plugin exited cleanly");
                return;
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return;
                }
                warn!(plugin = plugin.name(), error = %e, delay_secs = delay.as_secs(), "plugin crashed, restarting after backoff");
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => return,
                }
                delay = (delay * 2).min(Duration::from_secs(BACKOFF_MAX_SECS));
            }
        }
    }
}
