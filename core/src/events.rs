//! Typed lifecycle events of one turn and their wire framing.
//!
//! On the wire every event is one Server-Sent Event: the SSE `event:` field is the
//! event kind and `data:` is the JSON frame `{"type": <kind>, "seq": <n>, ...}`.
//! `seq` counts from zero within a turn so consumers can drop replays.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::countdown::CountdownRecord;
use crate::error::ApiError;
use crate::protocol::ProtocolError;
use crate::session::{PendingConfirmation, ReasonCode};
use crate::tool::{TitleLookupRequest, TitleLookupResponse, ToolError, ToolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Analysis,
    ToolStarted,
    ToolResult,
    Dday,
    ConfirmationRequired,
    Token,
    AssistantMessage,
    Error,
    End,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Start,
        EventKind::Analysis,
        EventKind::ToolStarted,
        EventKind::ToolResult,
        EventKind::Dday,
        EventKind::ConfirmationRequired,
        EventKind::Token,
        EventKind::AssistantMessage,
        EventKind::Error,
        EventKind::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Analysis => "analysis",
            EventKind::ToolStarted => "tool_started",
            EventKind::ToolResult => "tool_result",
            EventKind::Dday => "dday",
            EventKind::ConfirmationRequired => "confirmation_required",
            EventKind::Token => "token",
            EventKind::AssistantMessage => "assistant_message",
            EventKind::Error => "error",
            EventKind::End => "end",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

/// How a turn finished; carried by the terminal `end` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Found,
    Created,
    Unresolvable,
    AwaitingConfirmation,
    Refused,
    Failed,
}

/// Tool response or error summary attached to `tool_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResultPayload {
    Found {
        response: TitleLookupResponse,
    },
    NotFound {
        message: String,
    },
    Ambiguous {
        message: String,
        candidates: Vec<TitleLookupResponse>,
    },
    Transient {
        message: String,
    },
}

impl From<&Result<TitleLookupResponse, ToolError>> for ToolResultPayload {
    fn from(result: &Result<TitleLookupResponse, ToolError>) -> Self {
        match result {
            Ok(response) => ToolResultPayload::Found {
                response: response.clone(),
            },
            Err(err @ ToolError::NotFound { .. }) => ToolResultPayload::NotFound {
                message: err.to_string(),
            },
            Err(err @ ToolError::Ambiguous { candidates, .. }) => ToolResultPayload::Ambiguous {
                message: err.to_string(),
                candidates: candidates.clone(),
            },
            Err(err @ ToolError::Transient(_)) => ToolResultPayload::Transient {
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    Start {
        session_id: Uuid,
        query: String,
    },
    Analysis {
        message: String,
    },
    ToolStarted {
        message: String,
        tool: ToolKind,
        request: TitleLookupRequest,
    },
    ToolResult {
        message: String,
        tool: ToolKind,
        result: ToolResultPayload,
    },
    Dday {
        message: String,
        /// Label as of the moment the event was produced
        dday: String,
        /// Whether this turn created the record
        created: bool,
        record: CountdownRecord,
    },
    ConfirmationRequired {
        message: String,
        reason: ReasonCode,
        pending: PendingConfirmation,
    },
    /// Cumulative snapshot of the assistant text so far
    Token {
        message: String,
    },
    AssistantMessage {
        message: String,
    },
    Error {
        message: String,
        error: ApiError,
    },
    End {
        outcome: TurnOutcome,
    },
}

impl StageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StageEvent::Start { .. } => EventKind::Start,
            StageEvent::Analysis { .. } => EventKind::Analysis,
            StageEvent::ToolStarted { .. } => EventKind::ToolStarted,
            StageEvent::ToolResult { .. } => EventKind::ToolResult,
            StageEvent::Dday { .. } => EventKind::Dday,
            StageEvent::ConfirmationRequired { .. } => EventKind::ConfirmationRequired,
            StageEvent::Token { .. } => EventKind::Token,
            StageEvent::AssistantMessage { .. } => EventKind::AssistantMessage,
            StageEvent::Error { .. } => EventKind::Error,
            StageEvent::End { .. } => EventKind::End,
        }
    }

    /// The human-readable line of the event, if it has one. `start` and `end` carry none.
    pub fn message(&self) -> Option<&str> {
        match self {
            StageEvent::Analysis { message }
            | StageEvent::ToolStarted { message, .. }
            | StageEvent::ToolResult { message, .. }
            | StageEvent::Dday { message, .. }
            | StageEvent::ConfirmationRequired { message, .. }
            | StageEvent::Token { message }
            | StageEvent::AssistantMessage { message }
            | StageEvent::Error { message, .. } => Some(message),
            StageEvent::Start { .. } | StageEvent::End { .. } => None,
        }
    }
}

/// One numbered event as it travels over the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub seq: u64,
    #[serde(flatten)]
    pub event: StageEvent,
}

impl StreamFrame {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// SSE `(event, data)` pair for this frame.
    pub fn encode(&self) -> Result<(&'static str, String), ProtocolError> {
        let data = serde_json::to_string(self)
            .map_err(|e| ProtocolError::Malformed(format!("failed to encode frame: {e}")))?;
        Ok((self.kind().as_str(), data))
    }

    /// Parse an SSE `(event, data)` pair, checking that both agree on the kind.
    pub fn decode(event: &str, data: &str) -> Result<Self, ProtocolError> {
        let declared =
            EventKind::parse(event).ok_or_else(|| ProtocolError::UnknownKind(event.to_string()))?;
        let frame: StreamFrame = serde_json::from_str(data)
            .map_err(|e| ProtocolError::Malformed(format!("invalid {event} frame: {e}")))?;
        if frame.kind() != declared {
            return Err(ProtocolError::Malformed(format!(
                "frame declared as {} carries {}",
                declared.as_str(),
                frame.kind().as_str()
            )));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_json_is_flat_with_type_and_seq() {
        let frame = StreamFrame {
            seq: 3,
            event: StageEvent::Token {
                message: "프로젝트".to_string(),
            },
        };
        let (kind, data) = frame.encode().expect("encodes");
        assert_eq!(kind, "token");
        let value: serde_json::Value = serde_json::from_str(&data).expect("json");
        assert_eq!(value["type"], "token");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["message"], "프로젝트");
    }

    #[test]
    fn decode_rejects_kind_mismatch_and_unknown_kinds() {
        let data = r#"{"type":"end","seq":4,"outcome":"found"}"#;
        let frame = StreamFrame::decode("end", data).expect("decodes");
        assert_eq!(
            frame.event,
            StageEvent::End {
                outcome: TurnOutcome::Found
            }
        );

        assert!(matches!(
            StreamFrame::decode("token", data),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            StreamFrame::decode("movie", data),
            Err(ProtocolError::UnknownKind(_))
        ));
    }

    #[test]
    fn tool_errors_become_status_tagged_payloads() {
        let result: Result<TitleLookupResponse, ToolError> = Err(ToolError::NotFound {
            title: "없는 영화".to_string(),
        });
        let payload = ToolResultPayload::from(&result);
        let value = serde_json::to_value(&payload).expect("json");
        assert_eq!(value["status"], "not_found");
        assert!(value["message"].as_str().unwrap_or_default().contains("없는 영화"));
    }

    #[test]
    fn every_kind_parses_from_its_name() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
    }
}
