//! Well-known `req` method names for the gateway wire protocol (spec §4.2, §6).

// session (spec §4.1 client operations)
pub const SESSION_SEND: &str = "session.send";
pub const SESSION_ABORT: &str = "session.abort";
pub const SESSION_SUBSCRIBE: &str = "session.subscribe";
pub const SESSION_LOAD: &str = "session.load";

// sessions registry
pub const SESSIONS_LIST: &str = "sessions.list";
pub const SESSIONS_RESOLVE: &str = "sessions.resolve";

// config
pub const CONFIG_GET: &str = "config.get";

// agent
pub const AGENT_STATUS: &str = "agent.status";
pub const AGENT_LIST: &str = "agent.list";

// scheduler (spec §4.4)
pub const CRON_LIST: &str = "cron.list";
pub const CRON_ADD: &str = "cron.add";
pub const CRON_DELETE: &str = "cron.delete";

// gateway lifecycle
pub const STOP: &str = "stop";

// handshake
pub const CONNECT: &str = "connect";
