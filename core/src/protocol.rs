//! Ordering rules of a turn and the reference consumer.
//!
//! A turn is `start → analysis? → (tool_started → tool_result)* → (dday |
//! confirmation_required)? → token* → assistant_message → end`, where `error`
//! may cut in anywhere after `start` and is then followed only by `end`.

use crate::countdown::CountdownRecord;
use crate::error::ApiError;
use crate::events::{EventKind, StageEvent, StreamFrame, ToolResultPayload, TurnOutcome};
use crate::session::PendingConfirmation;
use crate::tool::ToolKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("{got:?} is not allowed after {after:?}")]
    OutOfOrder {
        after: Option<EventKind>,
        got: EventKind,
    },
    #[error("expected seq {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
    #[error("turn ended without an assistant_message or error")]
    MissingAssistantMessage,
    #[error("event received after end")]
    AfterEnd,
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Position of each kind in the canonical order; `error` has none.
fn stage_rank(kind: EventKind) -> u8 {
    match kind {
        EventKind::Start => 0,
        EventKind::Analysis => 1,
        EventKind::ToolStarted | EventKind::ToolResult => 2,
        EventKind::Dday | EventKind::ConfirmationRequired => 3,
        EventKind::Token => 4,
        EventKind::AssistantMessage => 5,
        EventKind::End => 6,
        EventKind::Error => u8::MAX,
    }
}

/// Checks a stream of frames against the turn grammar.
#[derive(Debug, Clone, Default)]
pub struct SequenceValidator {
    next_seq: u64,
    last: Option<EventKind>,
    rank: u8,
    tool_open: bool,
    saw_decision: bool,
    saw_message: bool,
    errored: bool,
    ended: bool,
}

impl SequenceValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn accept(&mut self, frame: &StreamFrame) -> Result<(), ProtocolError> {
        if self.ended {
            return Err(ProtocolError::AfterEnd);
        }
        if frame.seq != self.next_seq {
            return Err(ProtocolError::SequenceGap {
                expected: self.next_seq,
                got: frame.seq,
            });
        }
        let kind = frame.kind();
        self.check(kind)?;
        self.advance(kind);
        self.next_seq += 1;
        Ok(())
    }

    fn check(&self, kind: EventKind) -> Result<(), ProtocolError> {
        let out_of_order = Err(ProtocolError::OutOfOrder {
            after: self.last,
            got: kind,
        });
        let Some(_) = self.last else {
            return if kind == EventKind::Start {
                Ok(())
            } else {
                out_of_order
            };
        };
        if self.errored {
            return if kind == EventKind::End {
                Ok(())
            } else {
                out_of_order
            };
        }
        let allowed = match kind {
            EventKind::Start => false,
            EventKind::Analysis => self.rank == 0,
            EventKind::ToolStarted => self.rank <= 2 && !self.tool_open,
            EventKind::ToolResult => self.tool_open,
            EventKind::Dday | EventKind::ConfirmationRequired => {
                self.rank <= 2 && !self.tool_open && !self.saw_decision
            }
            EventKind::Token => self.rank <= 4 && !self.tool_open,
            EventKind::AssistantMessage => self.rank <= 4 && !self.tool_open,
            EventKind::Error => true,
            EventKind::End => {
                if !self.saw_message {
                    return Err(ProtocolError::MissingAssistantMessage);
                }
                true
            }
        };
        if allowed { Ok(()) } else { out_of_order }
    }

    fn advance(&mut self, kind: EventKind) {
        match kind {
            EventKind::ToolStarted => self.tool_open = true,
            EventKind::ToolResult => self.tool_open = false,
            EventKind::Dday | EventKind::ConfirmationRequired => self.saw_decision = true,
            EventKind::AssistantMessage => self.saw_message = true,
            EventKind::Error => self.errored = true,
            EventKind::End => self.ended = true,
            _ => {}
        }
        if kind != EventKind::Error {
            self.rank = self.rank.max(stage_rank(kind));
        }
        self.last = Some(kind);
    }
}

/// One run of consecutive same-kind events, as a UI would collapse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub kind: EventKind,
    pub count: usize,
}

/// Reference consumer: folds frames in arrival order into the state a client
/// renders. Replayed frames (seq already seen) are ignored, tokens are
/// last-snapshot-wins, and the turn counts as finished only once `end` arrives.
#[derive(Debug, Clone, Default)]
pub struct TurnView {
    validator: SequenceValidator,
    timeline: Vec<TimelineEntry>,
    pub analysis: Option<String>,
    pub tools: Vec<(ToolKind, Option<ToolResultPayload>)>,
    pub record: Option<CountdownRecord>,
    pub dday: Option<String>,
    pub created: bool,
    pub pending: Option<PendingConfirmation>,
    pub text: String,
    pub assistant_message: Option<String>,
    pub error: Option<ApiError>,
    pub outcome: Option<TurnOutcome>,
}

impl TurnView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame. Returns `Ok(false)` for a duplicate that was skipped.
    pub fn apply(&mut self, frame: StreamFrame) -> Result<bool, ProtocolError> {
        if frame.seq < self.validator.next_seq() {
            return Ok(false);
        }
        self.validator.accept(&frame)?;

        let kind = frame.kind();
        match self.timeline.last_mut() {
            Some(entry) if entry.kind == kind => entry.count += 1,
            _ => self.timeline.push(TimelineEntry { kind, count: 1 }),
        }

        match frame.event {
            StageEvent::Start { .. } => {}
            StageEvent::Analysis { message } => self.analysis = Some(message),
            StageEvent::ToolStarted { tool, .. } => self.tools.push((tool, None)),
            StageEvent::ToolResult { tool, result, .. } => {
                match self.tools.last_mut() {
                    Some((open, slot)) if *open == tool && slot.is_none() => *slot = Some(result),
                    _ => self.tools.push((tool, Some(result))),
                }
            }
            StageEvent::Dday {
                dday,
                created,
                record,
                ..
            } => {
                self.dday = Some(dday);
                self.created = created;
                self.record = Some(record);
            }
            StageEvent::ConfirmationRequired { pending, .. } => self.pending = Some(pending),
            StageEvent::Token { message } => self.text = message,
            StageEvent::AssistantMessage { message } => {
                self.text = message.clone();
                self.assistant_message = Some(message);
            }
            StageEvent::Error { error, .. } => self.error = Some(error),
            StageEvent::End { outcome } => self.outcome = Some(outcome),
        }
        Ok(true)
    }

    pub fn is_complete(&self) -> bool {
        self.validator.is_ended()
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }
}
