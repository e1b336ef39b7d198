use tentickle_core::config::{AuthConfig, AuthMode, MAX_PAYLOAD_BYTES, PROTOCOL_VERSION};
use tentickle_protocol::frames::EventFrame;
use tentickle_protocol::handshake::{
    AuthPayload, ClientPolicy, ConnectChallenge, ConnectParams, HelloOk, ServerFeatures, ServerInfo,
};
use uuid::Uuid;

/// Random nonce for the connect challenge.
pub fn make_nonce() -> String {
    Uuid::new_v4().to_string().replace('-', "")
}

/// Serialize the `connect.challenge` event that opens every WS session.
pub fn challenge_event(nonce: &str) -> String {
    let frame = EventFrame::new(
        "connect.challenge",
        "",
        0,
        ConnectChallenge {
            nonce: nonce.to_string(),
        },
    );
    serde_json::to_string(&frame).expect("challenge serialization is infallible")
}

/// Verify client auth against server config.
pub fn verify_auth(params: &ConnectParams, config: &AuthConfig) -> Result<(), String> {
    match &config.mode {
        AuthMode::None => Ok(()),

        AuthMode::Token => match &params.auth {
            AuthPayload::Token { token } => {
                if Some(token) == config.token.as_ref() {
                    Ok(())
                } else {
                    Err("invalid token".to_string())
                }
            }
            _ => Err("expected token auth mode".to_string()),
        },

        AuthMode::Password => match &params.auth {
            AuthPayload::Password { password } => {
                if Some(password) == config.password.as_ref() {
                    Ok(())
                } else {
                    Err("invalid password".to_string())
                }
            }
            _ => Err("expected password auth mode".to_string()),
        },

        AuthMode::TrustedProxy => match &params.auth {
            AuthPayload::TrustedProxy { forwarded_user } if !forwarded_user.is_empty() => Ok(()),
            _ => Err("expected trusted-proxy auth mode".to_string()),
        },
    }
}

/// Build the `hello-ok` response payload after successful authentication.
pub fn hello_ok_payload(node_id: &str) -> HelloOk {
    HelloOk {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            name: "tentickled".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            node_id: node_id.to_string(),
        },
        features: ServerFeatures {
            multi_agent: true,
            spawn: true,
            hybrid_memory: true,
            scheduler: true,
        },
        snapshot: serde_json::Value::Null,
        policy: ClientPolicy {
            max_message_size: MAX_PAYLOAD_BYTES,
            rate_limit: None,
        },
    }
}
