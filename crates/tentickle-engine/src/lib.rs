//! The session/execution engine (spec §4.1): the tick loop, the event bus,
//! the knob map, the model/tool/grounding abstractions, and the `Session`
//! type that ties them together behind `send`/`abort`/`subscribe`.

pub mod anthropic;
pub mod anthropic_stream;
pub mod compact;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod grounding;
pub mod knobs;
pub mod model;
pub mod openai;
pub mod prompt;
pub mod session;
pub mod stream;
pub mod thinking;
pub mod tools;

pub use config::{ContinuationPolicy, ExecutionConfig, ToolUseContinuation, DEFAULT_MAX_TICKS};
pub use error::{EngineError, Result};
pub use events::{Event, EventBus};
pub use execution::{ExecutionRuntime, InputMessage};
pub use knobs::KnobMap;
pub use model::{ChatRequest, ChatResponse, ModelClient, ModelError, ResponseBlock, Role, ToolCall, ToolDefinition};
pub use session::{FactorySpawnHost, Session, SessionFactory};
pub use tools::{ConfirmationHost, SpawnHost, Tool, ToolContext};
