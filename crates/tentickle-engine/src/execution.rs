//! The execution state machine (spec §4.1): `start → render → call_model →
//! dispatch_tools → continue?`, looping until the continuation policy says
//! stop or `maxTicks` is hit.

use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tentickle_store::types::{
    BlockType, ContentBlock, ExecutionStatus, ExecutionTrigger, Message, MessageRole, Usage,
    Visibility,
};
use tentickle_store::Store;

use crate::compact::compact_timeline;
use crate::config::ExecutionConfig;
use crate::error::{EngineError, Result};
use crate::events::{tool_call_start, Event, EventBus};
use crate::grounding::render_all;
use crate::knobs::KnobMap;
use crate::model::{ChatRequest, ResponseBlock, ToolCall};
use crate::prompt::SystemPrompt;
use crate::tools::ToolContext;

/// Shared runtime handle an `Execution` needs from its owning `Session`
/// (spec §4.1 data owned by a Session, minus the timeline/knobs/events
/// plumbing that `Execution::run` mutates directly).
pub struct ExecutionRuntime {
    pub store: Arc<Store>,
    pub session_id: String,
    pub config: Arc<ExecutionConfig>,
    pub knobs: Arc<Mutex<KnobMap>>,
    pub events: Arc<Mutex<EventBus>>,
    pub tool_ctx_template: Arc<ToolContext>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn emit(
    rt: &ExecutionRuntime,
    event: Event,
    execution_id: Option<&str>,
    tick: Option<u32>,
) {
    rt.events
        .lock()
        .unwrap()
        .emit(event, &rt.session_id, execution_id, tick);
}

/// Run one execution to completion (spec §4.1 state machine). Absorbs
/// model/tool errors into `execution_end`/`tool_result{isError}` per §7 —
/// this function itself only returns `Err` for store/persistence failures
/// that must bubble (FK violation on commit, per §7 "Bubbles; session
/// execution ends failed").
pub async fn run_execution(
    rt: &ExecutionRuntime,
    execution_id: &str,
    trigger: ExecutionTrigger,
    input_messages: Vec<InputMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    rt.store
        .create_execution(execution_id, &rt.session_id, trigger)?;
    emit(rt, Event::ExecutionStart, Some(execution_id), None);

    // Expansion knobs reset each execution (spec §4.6, §9 open question 3).
    rt.knobs.lock().unwrap().clear_prefixed("ref:");

    let execution_start = now();
    let mut tick: u32 = 0;
    let mut final_stop_reason: Option<String> = None;
    let mut aborted = false;
    let mut error_message: Option<String> = None;

    loop {
        rt.store.record_tick_start(execution_id, tick)?;
        emit(rt, Event::TickStart, Some(execution_id), Some(tick));

        if tick == 0 {
            commit_input_messages(rt, execution_id, tick, &input_messages)?;
        }

        for provider in &rt.config.grounding {
            provider.on_tick_start().await;
        }

        let snapshot = rt
            .store
            .load_snapshot(&rt.session_id)?
            .ok_or_else(|| EngineError::SessionNotFound {
                id: rt.session_id.clone(),
            })?;

        let knobs_view = { rt.knobs.lock().unwrap().to_value() };
        let knobs_for_compact = KnobMap::from_value(&knobs_view);
        let compacted = compact_timeline(&snapshot.timeline, &execution_start, &knobs_for_compact);

        let system_text = render_all(&rt.config.grounding);
        let system_prompt = SystemPrompt {
            static_tier: system_text.clone(),
            user_tier: String::new(),
            volatile_tier: format!("[session: {} | tick: {}]", rt.session_id, tick),
        };

        let req = ChatRequest {
            model: rt.config.model_name.clone(),
            system: system_text,
            system_prompt: Some(system_prompt),
            raw_messages: compacted.iter().filter_map(message_to_raw).collect(),
            max_tokens: rt.config.max_tokens,
            stream: false,
            thinking: None,
            tools: rt.config.tool_definitions(),
        };

        let resp = match crate::model::send_with_retry(rt.config.model.as_ref(), &req, 3).await {
            Ok(resp) => resp,
            Err(e) => {
                error_message = Some(e.to_string());
                break;
            }
        };

        let tool_calls: Vec<ToolCall> = resp.tool_calls().into_iter().cloned().collect();
        let assistant_message = build_assistant_message(rt, execution_id, tick, 0, &resp.blocks);
        let assistant_index = snapshot.timeline.len();
        rt.store.commit_entry(&assistant_message)?;
        emit(
            rt,
            Event::EntryCommitted {
                entry: serde_json::to_value(&assistant_message)?,
                timeline_index: assistant_index,
            },
            Some(execution_id),
            Some(tick),
        );

        if !tool_calls.is_empty() {
            let results = dispatch_tools(rt, execution_id, tick, &tool_calls, &cancel).await;
            let tool_message = build_tool_result_message(rt, execution_id, tick, 1, &results);
            rt.store.commit_entry(&tool_message)?;
            emit(
                rt,
                Event::EntryCommitted {
                    entry: serde_json::to_value(&tool_message)?,
                    timeline_index: assistant_index + 1,
                },
                Some(execution_id),
                Some(tick),
            );
        }

        let usage = serde_json::json!({
            "inputTokens": resp.tokens_in,
            "outputTokens": resp.tokens_out,
        });
        rt.store.record_tick_end(
            execution_id,
            tick,
            &resp.model,
            &Usage {
                input_tokens: resp.tokens_in as u64,
                output_tokens: resp.tokens_out as u64,
            },
            &resp.stop_reason,
        )?;
        emit(
            rt,
            Event::TickEnd {
                model: resp.model.clone(),
                usage,
                stop_reason: resp.stop_reason.clone(),
            },
            Some(execution_id),
            Some(tick),
        );

        final_stop_reason = Some(resp.stop_reason.clone());
        aborted = cancel.is_cancelled();

        let had_tool_calls = !tool_calls.is_empty();
        let next_tick = tick + 1;
        let ceiling_hit = next_tick >= rt.config.max_ticks;
        let should_continue = !aborted
            && !ceiling_hit
            && rt
                .config
                .continuation
                .should_continue(tick, &resp.stop_reason, had_tool_calls);

        if !should_continue {
            break;
        }
        tick = next_tick;
    }

    let (status, tick_count) = if error_message.is_some() {
        (ExecutionStatus::Failed, tick + 1)
    } else if aborted {
        (ExecutionStatus::Aborted, tick + 1)
    } else {
        (ExecutionStatus::Completed, tick + 1)
    };

    rt.store.complete_execution(
        execution_id,
        status,
        tick_count,
        error_message.as_deref(),
    )?;

    emit(
        rt,
        Event::ExecutionEnd {
            stop_reason: final_stop_reason,
            aborted,
            error: error_message,
            new_timeline_entries: None,
            output: None,
        },
        Some(execution_id),
        None,
    );

    Ok(())
}

/// One message from the send input envelope (spec §6 "Input envelope").
#[derive(Debug, Clone)]
pub struct InputMessage {
    pub role: MessageRole,
    pub text: String,
    pub entity_id: Option<String>,
}

fn commit_input_messages(
    rt: &ExecutionRuntime,
    execution_id: &str,
    tick: u32,
    inputs: &[InputMessage],
) -> Result<()> {
    for (i, input) in inputs.iter().enumerate() {
        let message_id = new_id();
        let message = Message {
            id: message_id.clone(),
            session_id: rt.session_id.clone(),
            execution_id: Some(execution_id.to_string()),
            entity_id: input.entity_id.clone(),
            role: input.role,
            tick,
            sequence_in_tick: i as u32,
            text_preview: Some(input.text.clone()),
            visibility: Visibility::Model,
            tags: vec![],
            token_count: 0,
            metadata: serde_json::json!({}),
            created_at: now(),
            blocks: vec![ContentBlock {
                id: format!("{message_id}-0"),
                message_id: message_id.clone(),
                position: 0,
                block_type: BlockType::Text,
                text_content: Some(input.text.clone()),
                content_json: serde_json::json!({ "text": input.text }),
                metadata: serde_json::json!({}),
            }],
        };
        rt.store.commit_entry(&message)?;
        emit(
            rt,
            Event::EntryCommitted {
                entry: serde_json::to_value(&message)?,
                timeline_index: i,
            },
            Some(execution_id),
            Some(tick),
        );
    }
    Ok(())
}

fn build_assistant_message(
    rt: &ExecutionRuntime,
    execution_id: &str,
    tick: u32,
    sequence_in_tick: u32,
    blocks: &[ResponseBlock],
) -> Message {
    let message_id = new_id();
    let mut content_blocks = Vec::with_capacity(blocks.len());
    let mut preview = String::new();

    for (i, block) in blocks.iter().enumerate() {
        match block {
            ResponseBlock::Text { text } => {
                preview.push_str(text);
                content_blocks.push(ContentBlock {
                    id: format!("{message_id}-{i}"),
                    message_id: message_id.clone(),
                    position: i as u32,
                    block_type: BlockType::Text,
                    text_content: Some(text.clone()),
                    content_json: serde_json::json!({ "text": text }),
                    metadata: serde_json::json!({}),
                });
            }
            ResponseBlock::ToolUse(call) => {
                content_blocks.push(ContentBlock {
                    id: format!("{message_id}-{i}"),
                    message_id: message_id.clone(),
                    position: i as u32,
                    block_type: BlockType::ToolUse,
                    text_content: None,
                    content_json: serde_json::json!({
                        "id": call.id, "name": call.name, "input": call.input
                    }),
                    metadata: serde_json::json!({}),
                });
            }
        }
    }

    Message {
        id: message_id,
        session_id: rt.session_id.clone(),
        execution_id: Some(execution_id.to_string()),
        entity_id: None,
        role: MessageRole::Assistant,
        tick,
        sequence_in_tick,
        text_preview: Some(tentickle_store::types::truncate_preview(&preview)),
        visibility: Visibility::Model,
        tags: vec![],
        token_count: 0,
        metadata: serde_json::json!({}),
        created_at: now(),
        blocks: content_blocks,
    }
}

struct ToolDispatchResult {
    call: ToolCall,
    blocks: Vec<Value>,
    is_error: bool,
}

/// Fan tool calls out in parallel and join before the tick ends (spec §5
/// "tool dispatch fans out in parallel ... and joins before the tick ends").
async fn dispatch_tools(
    rt: &ExecutionRuntime,
    execution_id: &str,
    tick: u32,
    calls: &[ToolCall],
    cancel: &CancellationToken,
) -> Vec<ToolDispatchResult> {
    for call in calls {
        emit(
            rt,
            tool_call_start(call),
            Some(execution_id),
            Some(tick),
        );
    }

    let futures = calls.iter().map(|call| {
        let tool = rt.config.find_tool(&call.name).cloned();
        let input = call.input.clone();
        let mut ctx = (*rt.tool_ctx_template).clone_with(cancel.clone());
        ctx.session_id = rt.session_id.clone();
        async move {
            let outcome = match tool {
                Some(tool) => tool.call(input, &ctx).await,
                None => Err(format!("unknown tool: {}", call.name)),
            };
            outcome
        }
    });

    let outcomes = join_all(futures).await;

    calls
        .iter()
        .zip(outcomes)
        .map(|(call, outcome)| match outcome {
            Ok(blocks) => {
                emit(
                    rt,
                    Event::ToolResult {
                        call_id: call.id.clone(),
                        result_blocks: Value::Array(blocks.clone()),
                        is_error: false,
                    },
                    Some(execution_id),
                    Some(tick),
                );
                ToolDispatchResult {
                    call: call.clone(),
                    blocks,
                    is_error: false,
                }
            }
            Err(msg) => {
                let blocks = vec![crate::tools::text_block(msg.clone())];
                emit(
                    rt,
                    Event::ToolResult {
                        call_id: call.id.clone(),
                        result_blocks: Value::Array(blocks.clone()),
                        is_error: true,
                    },
                    Some(execution_id),
                    Some(tick),
                );
                ToolDispatchResult {
                    call: call.clone(),
                    blocks,
                    is_error: true,
                }
            }
        })
        .collect()
}

fn build_tool_result_message(
    rt: &ExecutionRuntime,
    execution_id: &str,
    tick: u32,
    sequence_in_tick: u32,
    results: &[ToolDispatchResult],
) -> Message {
    let message_id = new_id();
    let content_blocks = results
        .iter()
        .enumerate()
        .map(|(i, r)| ContentBlock {
            id: format!("{message_id}-{i}"),
            message_id: message_id.clone(),
            position: i as u32,
            block_type: BlockType::ToolResult,
            text_content: None,
            content_json: serde_json::json!({
                "call_id": r.call.id,
                "resultBlocks": r.blocks,
                "isError": r.is_error,
            }),
            metadata: serde_json::json!({}),
        })
        .collect();

    Message {
        id: message_id,
        session_id: rt.session_id.clone(),
        execution_id: Some(execution_id.to_string()),
        entity_id: None,
        role: MessageRole::Tool,
        tick,
        sequence_in_tick,
        text_preview: None,
        visibility: Visibility::Model,
        tags: vec![],
        token_count: 0,
        metadata: serde_json::json!({}),
        created_at: now(),
        blocks: content_blocks,
    }
}

/// Translate one (possibly compacted) timeline message into the
/// Anthropic-style raw content-block shape `ModelClient` implementations
/// expect (spec's `raw_messages`). System-role messages are carried by the
/// request's dedicated `system`/`system_prompt` fields instead, so they are
/// skipped here.
fn message_to_raw(message: &Message) -> Option<Value> {
    let role = match message.role {
        MessageRole::Assistant => "assistant",
        MessageRole::User | MessageRole::Event | MessageRole::Tool => "user",
        MessageRole::System => return None,
    };

    let content: Vec<Value> = message.blocks.iter().map(block_to_raw).collect();
    Some(serde_json::json!({ "role": role, "content": content }))
}

fn block_to_raw(block: &ContentBlock) -> Value {
    match block.block_type {
        BlockType::Text => serde_json::json!({
            "type": "text",
            "text": block.text_content.clone().unwrap_or_default(),
        }),
        BlockType::ToolUse => {
            let mut v = block.content_json.clone();
            if let Value::Object(ref mut obj) = v {
                obj.insert("type".to_string(), Value::String("tool_use".to_string()));
            }
            v
        }
        BlockType::ToolResult => {
            let call_id = block
                .content_json
                .get("call_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let result_blocks = block
                .content_json
                .get("resultBlocks")
                .cloned()
                .unwrap_or_else(|| Value::Array(vec![]));
            let is_error = block
                .content_json
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call_id,
                "content": result_blocks,
                "is_error": is_error,
            })
        }
        BlockType::Image | BlockType::Audio | BlockType::Video | BlockType::Document => {
            let mut v = block.content_json.clone();
            if let Value::Object(ref mut obj) = v {
                obj.insert(
                    "type".to_string(),
                    Value::String(block.block_type.as_str().to_string()),
                );
            }
            v
        }
        BlockType::Code | BlockType::Json => {
            let mut v = block.content_json.clone();
            if let Value::Object(ref mut obj) = v {
                obj.insert(
                    "type".to_string(),
                    Value::String(block.block_type.as_str().to_string()),
                );
            }
            v
        }
    }
}
