//! Internal event representation and per-subscriber fan-out (spec §4.1
//! "Events emitted", §5 ordering/backpressure guarantees).
//!
//! Events are emitted in-process as [`Event`] and translated to the wire
//! shape ([`tentickle_protocol::frames::EventFrame`]) at the transport
//! boundary, never constructed directly by the engine — `EventFrame`
//! carries a `session_id`/`sequence` pair the engine assigns centrally.

use serde::Serialize;
use serde_json::Value;
use tentickle_protocol::frames::EventFrame;
use tokio::sync::mpsc;

use crate::model::ToolCall;

/// Sum type for everything a session can emit (spec §9 "tagged unions for
/// events"). Exhaustive matches are required at dispatch sites.
#[derive(Debug, Clone)]
pub enum Event {
    ExecutionStart,
    TickStart,
    EntryCommitted {
        entry: Value,
        timeline_index: usize,
    },
    ToolCallStart {
        call_id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        call_id: String,
        result_blocks: Value,
        is_error: bool,
    },
    ToolConfirmationRequest {
        tool_use_id: String,
        name: String,
        arguments: Value,
        message: Option<String>,
    },
    TickEnd {
        model: String,
        usage: Value,
        stop_reason: String,
    },
    ExecutionEnd {
        stop_reason: Option<String>,
        aborted: bool,
        error: Option<String>,
        new_timeline_entries: Option<Value>,
        output: Option<Value>,
    },
}

impl Event {
    /// The wire discriminator (spec §6 event envelope `type`).
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ExecutionStart => "execution_start",
            Event::TickStart => "tick_start",
            Event::EntryCommitted { .. } => "entry_committed",
            Event::ToolCallStart { .. } => "tool_call_start",
            Event::ToolResult { .. } => "tool_result",
            Event::ToolConfirmationRequest { .. } => "tool_confirmation_request",
            Event::TickEnd { .. } => "tick_end",
            Event::ExecutionEnd { .. } => "execution_end",
        }
    }

    /// Critical events MUST be delivered or the subscriber is evicted
    /// (spec §4.1, §5 backpressure) — delegates to the wire-level
    /// classification so both stay in lockstep.
    pub fn is_critical(&self) -> bool {
        EventFrame::is_critical(self.type_name())
    }

    fn payload(&self) -> Value {
        match self {
            Event::ExecutionStart | Event::TickStart => Value::Null,
            Event::EntryCommitted {
                entry,
                timeline_index,
            } => serde_json::json!({ "entry": entry, "timelineIndex": timeline_index }),
            Event::ToolCallStart {
                call_id,
                name,
                input,
            } => serde_json::json!({ "callId": call_id, "name": name, "input": input }),
            Event::ToolResult {
                call_id,
                result_blocks,
                is_error,
            } => serde_json::json!({
                "callId": call_id, "resultBlocks": result_blocks, "isError": is_error
            }),
            Event::ToolConfirmationRequest {
                tool_use_id,
                name,
                arguments,
                message,
            } => serde_json::json!({
                "toolUseId": tool_use_id, "name": name, "arguments": arguments, "message": message
            }),
            Event::TickEnd {
                model,
                usage,
                stop_reason,
            } => serde_json::json!({ "model": model, "usage": usage, "stopReason": stop_reason }),
            Event::ExecutionEnd {
                stop_reason,
                aborted,
                error,
                new_timeline_entries,
                output,
            } => serde_json::json!({
                "stopReason": stop_reason, "aborted": aborted, "error": error,
                "newTimelineEntries": new_timeline_entries, "output": output
            }),
        }
    }

    /// Build the wire frame for this event. `sequence` must be the
    /// session-monotone counter assigned at emission time.
    pub fn into_frame(
        self,
        session_id: &str,
        sequence: u64,
        execution_id: Option<&str>,
        tick: Option<u32>,
    ) -> EventFrame {
        let type_name = self.type_name();
        let payload = self.payload();
        let mut frame = EventFrame::new(type_name, session_id, sequence, payload);
        if let Some(exec_id) = execution_id {
            frame = frame.with_execution(exec_id);
        }
        if let Some(tick) = tick {
            frame = frame.with_tick(tick);
        }
        frame
    }
}

fn tool_call_json(call: &ToolCall) -> Value {
    serde_json::json!({ "id": call.id, "name": call.name, "input": call.input })
}

pub fn tool_call_start(call: &ToolCall) -> Event {
    Event::ToolCallStart {
        call_id: call.id.clone(),
        name: call.name.clone(),
        input: tool_call_json(call),
    }
}

/// High-water mark for a subscriber's queue (spec §5 backpressure).
pub const BACKPRESSURE_HIGH_WATER_MARK: usize = 1024;

/// One subscriber's channel, created by `Session::subscribe`.
pub struct Subscriber {
    pub tx: mpsc::Sender<EventFrame>,
    /// Optional filter — if non-empty, only these event type names are
    /// delivered (spec §4.1 `subscribe(filter)`).
    pub filter: Option<Vec<String>>,
}

impl Subscriber {
    pub fn new(filter: Option<Vec<String>>) -> (Self, mpsc::Receiver<EventFrame>) {
        let (tx, rx) = mpsc::channel(BACKPRESSURE_HIGH_WATER_MARK);
        (Self { tx, filter }, rx)
    }

    fn accepts(&self, event_type: &str) -> bool {
        match &self.filter {
            Some(types) => types.iter().any(|t| t == event_type),
            None => true,
        }
    }

    /// Deliver `frame`. Returns `false` if the subscriber should be evicted:
    /// that happens only for a critical event whose channel is full —
    /// non-critical events are silently dropped under backpressure instead
    /// (spec §5).
    pub fn deliver(&self, frame: &EventFrame, is_critical: bool) -> bool {
        if !self.accepts(&frame.event) {
            return true;
        }
        match self.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => !is_critical,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Fan-out list plus the session-monotone sequence counter (spec §5
/// "Event order within a session is totally ordered by a monotone
/// per-session sequence number").
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    next_sequence: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, filter: Option<Vec<String>>) -> mpsc::Receiver<EventFrame> {
        let (sub, rx) = Subscriber::new(filter);
        self.subscribers.push(sub);
        rx
    }

    /// Assign the next sequence number and fan the event out to every
    /// subscriber, evicting any whose channel is full on a critical event.
    pub fn emit(
        &mut self,
        event: Event,
        session_id: &str,
        execution_id: Option<&str>,
        tick: Option<u32>,
    ) -> EventFrame {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        let critical = event.is_critical();
        let frame = event.into_frame(session_id, seq, execution_id, tick);

        self.subscribers.retain(|sub| sub.deliver(&frame, critical));
        frame
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelopeStub; // kept for forward-compat payload shape checks in tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_events_match_protocol_classification() {
        assert!(Event::EntryCommitted {
            entry: Value::Null,
            timeline_index: 0
        }
        .is_critical());
        assert!(!Event::TickStart.is_critical());
    }

    #[test]
    fn sequence_numbers_are_monotone_per_session() {
        let mut bus = EventBus::new();
        let f1 = bus.emit(Event::ExecutionStart, "s1", None, None);
        let f2 = bus.emit(Event::TickStart, "s1", None, None);
        assert_eq!(f1.sequence, 0);
        assert_eq!(f2.sequence, 1);
    }

    #[tokio::test]
    async fn non_critical_event_dropped_when_subscriber_full() {
        let mut bus = EventBus::new();
        let mut rx = bus.subscribe(None);
        // Fill the channel without draining.
        for _ in 0..BACKPRESSURE_HIGH_WATER_MARK {
            bus.emit(Event::TickStart, "s1", None, None);
        }
        // One more non-critical push should be silently dropped, not evict.
        bus.emit(Event::TickStart, "s1", None, None);
        assert_eq!(bus.subscribers.len(), 1);

        // Drain one slot then confirm delivery still flows.
        let _ = rx.recv().await;
    }

    #[tokio::test]
    async fn critical_event_evicts_full_subscriber() {
        let mut bus = EventBus::new();
        let _rx = bus.subscribe(None);
        for _ in 0..BACKPRESSURE_HIGH_WATER_MARK {
            bus.emit(Event::TickStart, "s1", None, None);
        }
        bus.emit(
            Event::EntryCommitted {
                entry: Value::Null,
                timeline_index: 0,
            },
            "s1",
            None,
            None,
        );
        assert!(bus.subscribers.is_empty());
    }
}
