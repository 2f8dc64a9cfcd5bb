//! Turn driver: runs the engine for one request and renders its outcome as the
//! closing events of the stream.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use crate::countdown::{CountdownRecord, dday_label};
use crate::engine::{EngineError, ResolutionEngine, ResolutionOutcome, UnresolvableReason};
use crate::error::{ApiError, codes};
use crate::events::{StageEvent, StreamFrame, TurnOutcome};
use crate::session::{ConfirmationEdits, ConversationSession, PendingConfirmation, ReasonCode, SessionError};

pub const MSG_FOUND: &str = "이미 등록된 개봉일입니다. 모두 함께 기다리고 있어요.";
pub const MSG_NOT_FOUND: &str = "영화를 찾지 못했습니다. 제목이나 연도를 다시 알려주세요.";
pub const MSG_NO_UPCOMING: &str = "예정된 개봉일이 없어 D-Day를 만들 수 없어요.";
pub const MSG_AMBIGUOUS: &str =
    "비슷한 작품이 여러 개라 하나로 정하지 못했어요. 개봉 연도나 국가를 함께 알려주세요.";
pub const MSG_CANCELLED: &str = "D-Day 생성을 취소했어요.";
pub const MSG_TRANSIENT: &str =
    "영화 정보를 불러오는 중 문제가 발생했습니다. 잠시 후 다시 시도해 주세요.";
pub const MSG_INTERNAL: &str = "요청을 처리하지 못했습니다.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmAction {
    Confirm,
    Cancel,
}

/// Run a chat turn for `query`, streaming every frame into `tx`.
pub async fn run_chat_turn(
    engine: &ResolutionEngine,
    query: String,
    tx: mpsc::Sender<StreamFrame>,
) -> TurnOutcome {
    let mut session = ConversationSession::new(query).with_sink(tx);
    if !open(&mut session).await {
        return TurnOutcome::Failed;
    }
    let result = engine.resolve_in(&mut session).await;
    conclude(engine, &mut session, result).await
}

/// Run a confirm or cancel turn for a pending payload echoed back by the client.
pub async fn run_confirm_turn(
    engine: &ResolutionEngine,
    pending: PendingConfirmation,
    action: ConfirmAction,
    edits: ConfirmationEdits,
    tx: mpsc::Sender<StreamFrame>,
) -> TurnOutcome {
    let mut session = ConversationSession::resumed(pending).with_sink(tx);
    if !open(&mut session).await {
        return TurnOutcome::Failed;
    }
    let result = match action {
        ConfirmAction::Confirm => engine.confirm_in(&mut session, &edits).await,
        ConfirmAction::Cancel => engine.cancel_in(&mut session),
    };
    conclude(engine, &mut session, result).await
}

async fn open(session: &mut ConversationSession) -> bool {
    let session_id = session.session_id;
    let query = session.raw_query.clone();
    match session.emit(StageEvent::Start { session_id, query }).await {
        Ok(()) => {
            tracing::info!(%session_id, query = %session.raw_query, "turn started");
            true
        }
        Err(e) => {
            tracing::info!(%session_id, error = %e, "turn abandoned before start");
            false
        }
    }
}

async fn conclude(
    engine: &ResolutionEngine,
    session: &mut ConversationSession,
    result: Result<ResolutionOutcome, EngineError>,
) -> TurnOutcome {
    let session_id = session.session_id;
    let finished = match result {
        Ok(outcome) => finish(engine, session, outcome).await,
        Err(EngineError::Cancelled) => Err(SessionError::Disconnected),
        Err(err) => fail(session, err).await,
    };
    match finished {
        Ok(outcome) => {
            tracing::info!(
                %session_id,
                outcome = ?outcome,
                tool_calls = session.invocations.len(),
                "turn finished"
            );
            outcome
        }
        Err(e) => {
            tracing::info!(%session_id, error = %e, "turn stopped early");
            TurnOutcome::Failed
        }
    }
}

async fn finish(
    engine: &ResolutionEngine,
    session: &mut ConversationSession,
    outcome: ResolutionOutcome,
) -> Result<TurnOutcome, SessionError> {
    let (reply, turn_outcome) = match outcome {
        ResolutionOutcome::Found(record) => {
            let record = with_fresh_label(record, engine);
            let dday = record.dday_label.clone();
            session
                .emit(StageEvent::Dday {
                    message: format!("{} {dday}", record.canonical_title),
                    dday,
                    created: false,
                    record,
                })
                .await?;
            (MSG_FOUND.to_string(), TurnOutcome::Found)
        }
        ResolutionOutcome::Created(record) => {
            let record = with_fresh_label(record, engine);
            let reply = created_message(&record);
            let dday = record.dday_label.clone();
            session
                .emit(StageEvent::Dday {
                    message: format!("{} {dday}", record.canonical_title),
                    dday,
                    created: true,
                    record,
                })
                .await?;
            (reply, TurnOutcome::Created)
        }
        ResolutionOutcome::NeedsConfirmation(pending) => {
            let reply = confirmation_message(&pending);
            session
                .emit(StageEvent::ConfirmationRequired {
                    message: reply.clone(),
                    reason: pending.reason,
                    pending,
                })
                .await?;
            (reply, TurnOutcome::AwaitingConfirmation)
        }
        ResolutionOutcome::Unresolvable(UnresolvableReason::NotFound) => {
            (MSG_NOT_FOUND.to_string(), TurnOutcome::Unresolvable)
        }
        ResolutionOutcome::Unresolvable(UnresolvableReason::NoUpcomingRelease) => {
            (MSG_NO_UPCOMING.to_string(), TurnOutcome::Unresolvable)
        }
        ResolutionOutcome::Unresolvable(UnresolvableReason::Ambiguous) => {
            (MSG_AMBIGUOUS.to_string(), TurnOutcome::Unresolvable)
        }
        ResolutionOutcome::Refused => (MSG_CANCELLED.to_string(), TurnOutcome::Refused),
    };

    stream_reply(session, &reply).await?;
    session.emit(StageEvent::End { outcome: turn_outcome }).await?;
    Ok(turn_outcome)
}

async fn fail(
    session: &mut ConversationSession,
    err: EngineError,
) -> Result<TurnOutcome, SessionError> {
    let request_id = session.session_id.to_string();
    let (message, error) = match err {
        EngineError::Invalid { message, field } => (
            message.clone(),
            ApiError {
                error: codes::VALIDATION_FAILED.to_string(),
                message,
                field,
                received: None,
                request_id,
                docs_hint: Some(
                    "Send a title with an optional year, country or date, e.g. '프로젝트 헤일메리 개봉일'."
                        .to_string(),
                ),
                retryable: false,
            },
        ),
        EngineError::Transient(detail) => {
            tracing::warn!(session_id = %session.session_id, %detail, "turn failed transiently");
            (
                MSG_TRANSIENT.to_string(),
                ApiError {
                    error: codes::TRANSIENT.to_string(),
                    message: detail,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                    retryable: true,
                },
            )
        }
        other => {
            tracing::error!(session_id = %session.session_id, error = %other, "turn failed");
            (
                MSG_INTERNAL.to_string(),
                ApiError {
                    error: codes::INTERNAL_ERROR.to_string(),
                    message: MSG_INTERNAL.to_string(),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                    retryable: false,
                },
            )
        }
    };
    session.emit(StageEvent::Error { message, error }).await?;
    session
        .emit(StageEvent::End {
            outcome: TurnOutcome::Failed,
        })
        .await?;
    Ok(TurnOutcome::Failed)
}

/// Cumulative word snapshots of `reply`, then the full message.
async fn stream_reply(session: &mut ConversationSession, reply: &str) -> Result<(), SessionError> {
    let mut snapshot = String::with_capacity(reply.len());
    for word in reply.split_whitespace() {
        if !snapshot.is_empty() {
            snapshot.push(' ');
        }
        snapshot.push_str(word);
        session
            .emit(StageEvent::Token {
                message: snapshot.clone(),
            })
            .await?;
    }
    session.assistant_text = reply.to_string();
    session
        .emit(StageEvent::AssistantMessage {
            message: reply.to_string(),
        })
        .await
}

fn with_fresh_label(mut record: CountdownRecord, engine: &ResolutionEngine) -> CountdownRecord {
    record.dday_label = dday_label(record.release_date, engine.today());
    record
}

pub fn created_message(record: &CountdownRecord) -> String {
    format!(
        "{}은 {} 개봉 예정이라 {}입니다. 새로운 D-Day를 기록했습니다.",
        record.canonical_title, record.release_date, record.dday_label
    )
}

pub fn confirmation_message(pending: &PendingConfirmation) -> String {
    match pending.reason {
        ReasonCode::DateMismatch => {
            let asserted = pending
                .asserted_date
                .map(|d| d.to_string())
                .unwrap_or_default();
            let tool_date = pending.tool_date.map(|d| d.to_string()).unwrap_or_default();
            format!(
                "말씀하신 날짜({asserted})와 확인된 개봉일({tool_date})이 달라요. 어느 날짜로 D-Day를 만들지 확인해 주세요."
            )
        }
        ReasonCode::AmbiguousMatch => format!(
            "같은 제목의 작품이 {}개 있어요. 어떤 작품인지 골라 주세요.",
            pending.candidates.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::FixedClock;
    use crate::events::EventKind;
    use crate::planner::HeuristicPlanner;
    use crate::protocol::TurnView;
    use crate::store::MemoryStore;
    use crate::testing::{ScriptedResolver, date, movie};
    use crate::tool::{ToolError, ToolKind};

    fn engine(resolver: ScriptedResolver, store: Arc<MemoryStore>) -> ResolutionEngine {
        ResolutionEngine::new(
            store,
            Arc::new(resolver),
            Arc::new(HeuristicPlanner),
            Arc::new(FixedClock(date(2026, 2, 18))),
        )
    }

    fn hail_mary() -> ScriptedResolver {
        ScriptedResolver::new().answer(
            ToolKind::MovieSearch,
            Ok(movie("프로젝트 헤일메리", "687163", date(2026, 3, 20))),
        )
    }

    async fn collect(mut rx: mpsc::Receiver<StreamFrame>) -> (Vec<EventKind>, TurnView) {
        let mut kinds = Vec::new();
        let mut view = TurnView::new();
        while let Some(frame) = rx.recv().await {
            kinds.push(frame.kind());
            view.apply(frame).expect("frames arrive in protocol order");
        }
        (kinds, view)
    }

    #[tokio::test]
    async fn created_turn_streams_full_lifecycle() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(hail_mary(), store.clone());
        let (tx, rx) = mpsc::channel(128);

        let outcome =
            run_chat_turn(&engine, "프로젝트 헤일메리 개봉일 디데이 설정".to_string(), tx).await;
        assert_eq!(outcome, TurnOutcome::Created);

        let (kinds, view) = collect(rx).await;
        assert_eq!(
            &kinds[..5],
            &[
                EventKind::Start,
                EventKind::Analysis,
                EventKind::ToolStarted,
                EventKind::ToolResult,
                EventKind::Dday,
            ]
        );
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::Dday).count(), 1);
        assert_eq!(kinds.last(), Some(&EventKind::End));
        assert!(view.is_complete());
        assert_eq!(view.dday.as_deref(), Some("D-30"));
        assert!(view.created);
        assert_eq!(
            view.assistant_message.as_deref(),
            Some("프로젝트 헤일메리은 2026-03-20 개봉 예정이라 D-30입니다. 새로운 D-Day를 기록했습니다.")
        );
        assert_eq!(view.text, view.assistant_message.clone().unwrap_or_default());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn past_release_turn_refuses_without_dday() {
        let resolver = ScriptedResolver::new().answer(
            ToolKind::MovieSearch,
            Ok(movie("프로젝트 헤일메리", "687163", date(2025, 3, 20))),
        );
        let store = Arc::new(MemoryStore::new());
        let engine = engine(resolver, store.clone());
        let (tx, rx) = mpsc::channel(128);

        let outcome =
            run_chat_turn(&engine, "프로젝트 헤일메리 개봉일 디데이 설정".to_string(), tx).await;
        assert_eq!(outcome, TurnOutcome::Unresolvable);
        let (kinds, view) = collect(rx).await;
        assert!(!kinds.contains(&EventKind::Dday));
        assert_eq!(view.assistant_message.as_deref(), Some(MSG_NO_UPCOMING));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn date_mismatch_turn_asks_for_confirmation() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(hail_mary(), store.clone());
        let (tx, rx) = mpsc::channel(128);

        let outcome =
            run_chat_turn(&engine, "프로젝트 헤일메리 2026-04-01 개봉 맞지?".to_string(), tx).await;
        assert_eq!(outcome, TurnOutcome::AwaitingConfirmation);
        let (kinds, view) = collect(rx).await;
        assert!(!kinds.contains(&EventKind::Dday));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| **k == EventKind::ConfirmationRequired)
                .count(),
            1
        );
        let pending = view.pending.expect("pending payload");
        assert_eq!(pending.reason, ReasonCode::DateMismatch);
        assert_eq!(pending.asserted_date, Some(date(2026, 4, 1)));
        assert_eq!(pending.tool_date, Some(date(2026, 3, 20)));
        assert!(store.is_empty());

        let (tx, rx) = mpsc::channel(128);
        let outcome = run_confirm_turn(
            &engine,
            pending,
            ConfirmAction::Confirm,
            ConfirmationEdits::default(),
            tx,
        )
        .await;
        assert_eq!(outcome, TurnOutcome::Created);
        let (_, view) = collect(rx).await;
        assert_eq!(view.dday.as_deref(), Some("D-30"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn cancel_turn_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(hail_mary(), store.clone());
        let (tx, rx) = mpsc::channel(128);
        run_chat_turn(&engine, "프로젝트 헤일메리 2026-04-01 개봉 맞지?".to_string(), tx).await;
        let (_, view) = collect(rx).await;
        let pending = view.pending.expect("pending payload");

        let (tx, rx) = mpsc::channel(128);
        let outcome = run_confirm_turn(
            &engine,
            pending,
            ConfirmAction::Cancel,
            ConfirmationEdits::default(),
            tx,
        )
        .await;
        assert_eq!(outcome, TurnOutcome::Refused);
        let (kinds, view) = collect(rx).await;
        assert!(!kinds.contains(&EventKind::Dday));
        assert_eq!(view.assistant_message.as_deref(), Some(MSG_CANCELLED));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn transient_tool_failure_ends_with_retryable_error() {
        let resolver = ScriptedResolver::new().answer(
            ToolKind::MovieSearch,
            Err(ToolError::Transient("upstream returned HTTP 503".to_string())),
        );
        let engine = engine(resolver, Arc::new(MemoryStore::new()));
        let (tx, rx) = mpsc::channel(128);

        let outcome = run_chat_turn(&engine, "프로젝트 헤일메리 개봉일".to_string(), tx).await;
        assert_eq!(outcome, TurnOutcome::Failed);
        let (kinds, view) = collect(rx).await;
        assert_eq!(&kinds[kinds.len() - 2..], &[EventKind::Error, EventKind::End]);
        assert!(!kinds.contains(&EventKind::AssistantMessage));
        let error = view.error.expect("error payload");
        assert_eq!(error.error, codes::TRANSIENT);
        assert!(error.retryable);
        assert_eq!(view.outcome, Some(TurnOutcome::Failed));
    }

    #[tokio::test]
    async fn invalid_query_fails_before_any_tool_event() {
        let engine = engine(hail_mary(), Arc::new(MemoryStore::new()));
        let (tx, rx) = mpsc::channel(128);

        let outcome = run_chat_turn(&engine, "   ".to_string(), tx).await;
        assert_eq!(outcome, TurnOutcome::Failed);
        let (kinds, view) = collect(rx).await;
        assert_eq!(kinds, vec![EventKind::Start, EventKind::Error, EventKind::End]);
        assert_eq!(
            view.error.map(|e| e.error),
            Some(codes::VALIDATION_FAILED.to_string())
        );
    }

    #[tokio::test]
    async fn ambiguity_without_candidates_gets_its_own_reply() {
        let resolver = ScriptedResolver::new().answer(
            ToolKind::MovieSearch,
            Err(ToolError::Ambiguous {
                title: "듄".to_string(),
                candidates: Vec::new(),
            }),
        );
        let engine = engine(resolver, Arc::new(MemoryStore::new()));
        let (tx, rx) = mpsc::channel(128);

        let outcome = run_chat_turn(&engine, "듄 개봉일".to_string(), tx).await;
        assert_eq!(outcome, TurnOutcome::Unresolvable);
        let (kinds, view) = collect(rx).await;
        assert!(!kinds.contains(&EventKind::ConfirmationRequired));
        assert_eq!(view.assistant_message.as_deref(), Some(MSG_AMBIGUOUS));
    }

    #[tokio::test]
    async fn dropped_consumer_stops_the_turn() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(hail_mary(), store.clone());
        let (tx, rx) = mpsc::channel(128);
        drop(rx);

        let outcome = run_chat_turn(&engine, "프로젝트 헤일메리 개봉일".to_string(), tx).await;
        assert_eq!(outcome, TurnOutcome::Failed);
        assert!(store.is_empty());
    }
}
