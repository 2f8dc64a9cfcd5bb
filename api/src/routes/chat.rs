use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::Router;
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use utoipa::ToSchema;

use waitwith_core::error::codes;
use waitwith_core::events::{EventKind, StageEvent, StreamFrame, TurnOutcome};
use waitwith_core::session::{ConfirmationEdits, PendingConfirmation};
use waitwith_core::turn::{ConfirmAction, MSG_INTERNAL, run_chat_turn, run_confirm_turn};

use crate::extract::AppJson;
use crate::state::AppState;

/// Frames buffered between the turn task and the HTTP writer.
const STREAM_BUFFER: usize = 32;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/chat/confirm", post(confirm))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// Free-text request, e.g. "프로젝트 헤일메리 개봉일 디데이 설정"
    pub query: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmRequest {
    /// Payload from the `confirmation_required` event, echoed back unchanged
    pub pending: PendingConfirmation,
    pub action: ConfirmAction,
    #[serde(default)]
    pub edits: ConfirmationEdits,
}

/// Resolve a query and stream the turn
///
/// Responds with `text/event-stream`. Every SSE `event:` is a stage kind and
/// every `data:` is a JSON frame with `type` and `seq`. The stream always ends
/// with an `end` event; failures arrive as an `error` event before it.
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Turn event stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Malformed request body", body = waitwith_core::error::ApiError)
    ),
    tag = "chat"
)]
pub async fn chat(
    State(state): State<AppState>,
    AppJson(req): AppJson<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let engine = state.engine.clone();
    tokio::spawn(async move {
        run_chat_turn(&engine, req.query, tx).await;
    });
    Sse::new(frame_stream(rx)).keep_alive(KeepAlive::default())
}

/// Confirm or cancel a pending countdown and stream the turn
#[utoipa::path(
    post,
    path = "/v1/chat/confirm",
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Turn event stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Malformed request body", body = waitwith_core::error::ApiError)
    ),
    tag = "chat"
)]
pub async fn confirm(
    State(state): State<AppState>,
    AppJson(req): AppJson<ConfirmRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let engine = state.engine.clone();
    tokio::spawn(async move {
        run_confirm_turn(&engine, req.pending, req.action, req.edits, tx).await;
    });
    Sse::new(frame_stream(rx)).keep_alive(KeepAlive::default())
}

/// Drain the turn's channel into SSE events. Dropping this stream (client
/// disconnect) closes the channel, which stops the turn before any write.
///
/// A frame that fails to encode is replaced by `error` + `end` under its own
/// seq, and the stream closes there.
fn frame_stream(
    mut rx: mpsc::Receiver<StreamFrame>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut request_id = String::new();
        while let Some(frame) = rx.recv().await {
            if let StageEvent::Start { session_id, .. } = &frame.event {
                request_id = session_id.to_string();
            }
            match frame.encode() {
                Ok((kind, data)) => yield Ok(sse_event(frame.seq, kind, data)),
                Err(e) => {
                    tracing::error!(seq = frame.seq, error = %e, "unencodable frame, closing stream");
                    if frame.seq > 0 {
                        for (seq, kind, data) in encode_failure(frame.seq, &request_id) {
                            yield Ok(sse_event(seq, kind, data));
                        }
                    }
                    break;
                }
            }
        }
    }
}

fn sse_event(seq: u64, kind: &str, data: String) -> Event {
    Event::default().event(kind).id(seq.to_string()).data(data)
}

/// Closing `error` + `end` frames, built from plain JSON so they cannot fail to encode.
fn encode_failure(seq: u64, request_id: &str) -> [(u64, &'static str, String); 2] {
    let error = serde_json::json!({
        "type": EventKind::Error.as_str(),
        "seq": seq,
        "message": MSG_INTERNAL,
        "error": {
            "error": codes::INTERNAL_ERROR,
            "message": MSG_INTERNAL,
            "request_id": request_id,
        },
    });
    let end = serde_json::json!({
        "type": EventKind::End.as_str(),
        "seq": seq + 1,
        "outcome": TurnOutcome::Failed,
    });
    [
        (seq, EventKind::Error.as_str(), error.to_string()),
        (seq + 1, EventKind::End.as_str(), end.to_string()),
    ]
}
