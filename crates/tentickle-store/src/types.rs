use serde::{Deserialize, Serialize};
use serde_json::Value;
use tentickle_core::types::{EntityId, EntityType, SessionKey};

/// A person, model, org, agent, or project (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    pub summary: Option<String>,
    pub is_owner: bool,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Chat,
    Fork,
    Spawn,
    System,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Chat => "chat",
            SessionType::Fork => "fork",
            SessionType::Spawn => "spawn",
            SessionType::System => "system",
        }
    }
}

impl std::str::FromStr for SessionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "fork" => Ok(Self::Fork),
            "spawn" => Ok(Self::Spawn),
            "system" => Ok(Self::System),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Archived => "archived",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// A durable conversation context (spec §3). `tick` is strictly non-decreasing
/// over the session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub key: SessionKey,
    pub parent_id: Option<String>,
    pub fork_after_message_id: Option<String>,
    pub session_type: SessionType,
    pub workspace_path: String,
    pub status: SessionStatus,
    pub owner_entity_id: String,
    pub tick: u32,
    pub schema_version: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    Send,
    Cron,
    Restart,
    Spawn,
}

impl ExecutionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionTrigger::Send => "send",
            ExecutionTrigger::Cron => "cron",
            ExecutionTrigger::Restart => "restart",
            ExecutionTrigger::Spawn => "spawn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Aborted,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Aborted => "aborted",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One invocation of the engine, possibly spanning multiple ticks (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub session_id: String,
    pub trigger: ExecutionTrigger,
    pub status: ExecutionStatus,
    pub tick_count: u32,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Token usage for a single model round-trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// One model round-trip within an execution (spec §3). Primary key is
/// `(execution_id, tick_number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub execution_id: String,
    pub tick_number: u32,
    pub model: Option<String>,
    pub usage: Usage,
    pub stop_reason: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
    Event,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
            MessageRole::Event => "event",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            "event" => Ok(Self::Event),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Model,
    Observer,
    Log,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Model => "model",
            Visibility::Observer => "observer",
            Visibility::Log => "log",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(Self::Model),
            "observer" => Ok(Self::Observer),
            "log" => Ok(Self::Log),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

/// Text previews are truncated to this many characters at write time
/// (spec §4.3); full content survives in `content_json`.
pub const TEXT_PREVIEW_MAX_CHARS: usize = 500;

/// One timeline entry (spec §3). Ordering `(session_id, tick,
/// sequence_in_tick)` is a total order per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub execution_id: Option<String>,
    pub entity_id: Option<String>,
    pub role: MessageRole,
    pub tick: u32,
    pub sequence_in_tick: u32,
    pub text_preview: Option<String>,
    pub visibility: Visibility,
    pub tags: Vec<String>,
    pub token_count: u64,
    pub metadata: Value,
    pub created_at: String,
    pub blocks: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Image,
    Audio,
    Video,
    Document,
    ToolUse,
    ToolResult,
    Code,
    Json,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Image => "image",
            BlockType::Audio => "audio",
            BlockType::Video => "video",
            BlockType::Document => "document",
            BlockType::ToolUse => "tool_use",
            BlockType::ToolResult => "tool_result",
            BlockType::Code => "code",
            BlockType::Json => "json",
        }
    }

    /// Media block detection MUST distinguish `tool_use` (never media) from
    /// `image|audio|video|document` (always media) — spec §4.6.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            BlockType::Image | BlockType::Audio | BlockType::Video | BlockType::Document
        )
    }
}

impl std::str::FromStr for BlockType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "tool_use" => Ok(Self::ToolUse),
            "tool_result" => Ok(Self::ToolResult),
            "code" => Ok(Self::Code),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown block type: {other}")),
        }
    }
}

/// One element of a message's content (spec §3). Persisted stripped of
/// transient semantic/formatter fields; round-trip through JSON preserves
/// all stored fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    pub message_id: String,
    pub position: u32,
    pub block_type: BlockType,
    pub text_content: Option<String>,
    pub content_json: Value,
    pub metadata: Value,
}

/// A keyed JSON blob per session for non-timeline component state, e.g. the
/// reactive knob map (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub key: String,
    pub value: Value,
    pub updated_at: String,
}

/// Truncate `s` to at most [`TEXT_PREVIEW_MAX_CHARS`] chars, respecting
/// UTF-8 boundaries.
pub fn truncate_preview(s: &str) -> String {
    if s.chars().count() <= TEXT_PREVIEW_MAX_CHARS {
        return s.to_string();
    }
    s.chars().take(TEXT_PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_preview_respects_limit() {
        let long = "x".repeat(600);
        let preview = truncate_preview(&long);
        assert_eq!(preview.chars().count(), TEXT_PREVIEW_MAX_CHARS);
    }

    #[test]
    fn truncate_preview_leaves_short_text_intact() {
        assert_eq!(truncate_preview("short"), "short");
    }

    #[test]
    fn block_type_media_detection() {
        assert!(BlockType::Image.is_media());
        assert!(BlockType::Document.is_media());
        assert!(!BlockType::ToolUse.is_media());
        assert!(!BlockType::Text.is_media());
    }
}
