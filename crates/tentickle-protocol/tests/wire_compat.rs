// Wire-format compatibility tests — the gateway and every client must agree
// on these shapes, so any breaking change here must be deliberate.

use tentickle_protocol::frames::{EventFrame, InboundFrame, ResFrame};
use tentickle_protocol::handshake::{AuthPayload, ConnectParams, HelloOk};

#[test]
fn req_frame_round_trip() {
    let json = r#"{"type":"req","id":"abc-123","sessionId":"alice","method":"session.send","params":{"text":"hello"}}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    assert_eq!(frame.frame_type, "req");

    let req = frame.as_req().unwrap();
    assert_eq!(req.method, "session.send");
    assert_eq!(req.id, "abc-123");
    assert_eq!(req.session_id.as_deref(), Some("alice"));
}

#[test]
fn req_frame_session_id_optional() {
    let json = r#"{"type":"req","id":"abc-124","method":"sessions.list"}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    let req = frame.as_req().unwrap();
    assert!(req.session_id.is_none());
}

#[test]
fn res_ok_serialization() {
    let res = ResFrame::ok("req-1", serde_json::json!({"pong": true}));
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""type":"res""#));
    assert!(json.contains(r#""ok":true"#));
    assert!(json.contains(r#""pong":true"#));
    // error field must be absent on success
    assert!(!json.contains(r#""error""#));
}

#[test]
fn res_err_serialization() {
    let res = ResFrame::err("req-2", "AUTH_FAILED", "bad token");
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""ok":false"#));
    assert!(json.contains(r#""AUTH_FAILED""#));
    // payload must be absent on error
    assert!(!json.contains(r#""payload""#));
}

#[test]
fn event_frame_carries_session_and_sequence() {
    let ev = EventFrame::new("tick_start", "alice", 42, serde_json::json!({"tick": 1}))
        .with_execution("exec-1")
        .with_tick(1);
    let json = serde_json::to_string(&ev).unwrap();

    assert!(json.contains(r#""type":"event""#));
    assert!(json.contains(r#""event":"tick_start""#));
    assert!(json.contains(r#""sessionId":"alice""#));
    assert!(json.contains(r#""sequence":42"#));
    assert!(json.contains(r#""executionId":"exec-1""#));
}

#[test]
fn critical_events_are_flagged() {
    assert!(EventFrame::is_critical("entry_committed"));
    assert!(EventFrame::is_critical("tick_end"));
    assert!(EventFrame::is_critical("execution_end"));
    assert!(!EventFrame::is_critical("tick_partial"));
}

#[test]
fn connect_params_token_auth() {
    let json = r#"{"auth":{"mode":"token","token":"secret-123"}}"#;
    let params: ConnectParams = serde_json::from_str(json).unwrap();

    match params.auth {
        AuthPayload::Token { ref token } => assert_eq!(token, "secret-123"),
        _ => panic!("expected token auth"),
    }
}

#[test]
fn connect_params_none_auth() {
    let json = r#"{"auth":{"mode":"none"}}"#;
    let params: ConnectParams = serde_json::from_str(json).unwrap();

    assert!(matches!(params.auth, AuthPayload::None));
}

#[test]
fn hello_ok_protocol_version() {
    let hello = HelloOk {
        protocol: 1,
        server: tentickle_protocol::handshake::ServerInfo {
            name: "tentickle".into(),
            version: "0.1.0".into(),
            node_id: "test".into(),
        },
        features: Default::default(),
        snapshot: serde_json::Value::Object(Default::default()),
        policy: Default::default(),
    };
    let json = serde_json::to_string(&hello).unwrap();
    assert!(json.contains(r#""protocol":1"#));
}

#[test]
fn inbound_frame_rejects_non_req() {
    let json = r#"{"type":"event","event":"tick_start","payload":{}}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    assert!(frame.as_req().is_none(), "event frame must not parse as req");
}
