use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server → Client: initial challenge on WS connect.
/// Sent as: `EVENT connect.challenge { nonce: "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectChallenge {
    pub nonce: String,
}

/// Client → Server: authentication request.
/// Sent as: `REQ connect { auth: { mode: "token", token: "..." }, ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    pub auth: AuthPayload,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Discriminated auth payload — mode determines which fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AuthPayload {
    Token { token: String },
    Password { password: String },
    TrustedProxy { forwarded_user: String },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
}

/// Server → Client: successful auth response payload.
/// Sent as: `RES hello-ok { protocol: 1, server: {...}, ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOk {
    pub protocol: u32,
    pub server: ServerInfo,
    pub features: ServerFeatures,
    /// Snapshot of the resolved session, if the `connect` request named one.
    pub snapshot: Value,
    pub policy: ClientPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerFeatures {
    pub multi_agent: bool,
    pub spawn: bool,
    pub hybrid_memory: bool,
    pub scheduler: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientPolicy {
    pub max_message_size: usize,
    pub rate_limit: Option<RateLimitPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub requests_per_minute: u32,
}
