//! Decides, per turn, whether to answer from the store, call the tool, ask the
//! user, or refuse.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::countdown::{CountdownDraft, CountdownRecord};
use crate::events::StageEvent;
use crate::gate::GateError;
use crate::planner::{HeuristicPlanner, QueryPlanner};
use crate::query::{ParsedQuery, QueryError, parse_query};
use crate::session::{
    ConfirmationEdits, ConfirmationError, ConversationSession, PendingConfirmation, ReasonCode,
    SessionError, ToolInvocation, draft_from_response,
};
use crate::store::{CountdownStore, StoreError};
use crate::tool::{TitleLookupResponse, TitleResolver, ToolError, ToolKind};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvableReason {
    NotFound,
    NoUpcomingRelease,
    /// The tool reported several matches but offered none to choose from
    Ambiguous,
}

impl UnresolvableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnresolvableReason::NotFound => "not_found",
            UnresolvableReason::NoUpcomingRelease => "no_upcoming_release",
            UnresolvableReason::Ambiguous => "ambiguous",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Record already on file under the normalized name (or won by a concurrent turn)
    Found(CountdownRecord),
    Created(CountdownRecord),
    Unresolvable(UnresolvableReason),
    NeedsConfirmation(PendingConfirmation),
    /// Pending confirmation was cancelled
    Refused,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{message}")]
    Invalid {
        message: String,
        field: Option<String>,
    },
    #[error("{0}")]
    Transient(String),
    /// The consumer went away before the turn finished
    #[error("turn cancelled")]
    Cancelled,
    #[error("{0}")]
    Internal(String),
}

impl From<QueryError> for EngineError {
    fn from(err: QueryError) -> Self {
        EngineError::Invalid {
            message: err.to_string(),
            field: Some("query".to_string()),
        }
    }
}

impl From<ConfirmationError> for EngineError {
    fn from(err: ConfirmationError) -> Self {
        EngineError::Invalid {
            field: Some(err.field().to_string()),
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => EngineError::Transient(msg),
            StoreError::Duplicate(_) => EngineError::Internal(err.to_string()),
        }
    }
}

impl From<SessionError> for EngineError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Disconnected => EngineError::Cancelled,
            SessionError::Protocol(e) => EngineError::Internal(e.to_string()),
        }
    }
}

impl From<GateError> for EngineError {
    fn from(err: GateError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

/// Result of the pure policy step applied to a successful tool response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create(CountdownDraft),
    Unresolvable(UnresolvableReason),
    Confirm(PendingConfirmation),
}

/// Policy for a single tool response.
///
/// A past release only counts when the title is being re-released and the
/// response carries the re-release date; that date is then the one counted
/// down to. A date stated in the query that differs from the counted date
/// always defers to the user.
pub fn decide(
    query: &ParsedQuery,
    tool: ToolKind,
    response: TitleLookupResponse,
    today: NaiveDate,
) -> Decision {
    let Some(event_date) = response.countdown_date(today) else {
        return Decision::Unresolvable(UnresolvableReason::NoUpcomingRelease);
    };

    let mut draft = draft_from_response(query.normalized.clone(), tool, response);
    draft.release_date = event_date;

    match query.asserted_date {
        Some(asserted) if asserted != event_date => Decision::Confirm(PendingConfirmation {
            reason: ReasonCode::DateMismatch,
            name: query.normalized.clone(),
            query: query.raw.clone(),
            tool,
            draft: Some(draft),
            asserted_date: Some(asserted),
            tool_date: Some(event_date),
            candidates: Vec::new(),
        }),
        _ => Decision::Create(draft),
    }
}

pub struct ResolutionEngine {
    store: Arc<dyn CountdownStore>,
    resolver: Arc<dyn TitleResolver>,
    planner: Arc<dyn QueryPlanner>,
    clock: Arc<dyn Clock>,
    tool_timeout: Duration,
}

impl ResolutionEngine {
    pub fn new(
        store: Arc<dyn CountdownStore>,
        resolver: Arc<dyn TitleResolver>,
        planner: Arc<dyn QueryPlanner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            planner,
            clock,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn store(&self) -> &Arc<dyn CountdownStore> {
        &self.store
    }

    /// Run a full turn without a stream consumer.
    ///
    /// With `confirmed`, the pending payload is confirmed as-is plus edits;
    /// otherwise the query is resolved from scratch.
    pub async fn resolve(
        &self,
        query: &str,
        confirmed: Option<(PendingConfirmation, ConfirmationEdits)>,
    ) -> Result<ResolutionOutcome, EngineError> {
        let (mut session, edits) = match confirmed {
            Some((pending, edits)) => (ConversationSession::resumed(pending), Some(edits)),
            None => (ConversationSession::new(query), None),
        };
        session
            .emit(StageEvent::Start {
                session_id: session.session_id,
                query: session.raw_query.clone(),
            })
            .await?;
        match edits {
            Some(edits) => self.confirm_in(&mut session, &edits).await,
            None => self.resolve_in(&mut session).await,
        }
    }

    /// Resolve `session.raw_query`, emitting analysis and tool events into the session.
    pub async fn resolve_in(
        &self,
        session: &mut ConversationSession,
    ) -> Result<ResolutionOutcome, EngineError> {
        session.gate.begin()?;
        let parsed = parse_query(&session.raw_query)?;
        let session_id = session.session_id;

        if let Some(record) = self.store.get_by_name(&parsed.normalized).await? {
            tracing::info!(%session_id, name = %record.name, "countdown found by name");
            session.gate.complete()?;
            return Ok(ResolutionOutcome::Found(record));
        }

        let planned = tokio::select! {
            planned = self.planner.plan(&parsed) => planned,
            () = session.closed() => {
                tracing::info!(%session_id, "consumer gone while planning");
                return Err(EngineError::Cancelled);
            }
        };
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "planner failed, using heuristic plan");
                HeuristicPlanner::plan_for(&parsed)
            }
        };
        if let Some(message) = plan.analysis {
            session.emit(StageEvent::Analysis { message }).await?;
        }

        let mut resolved = None;
        let mut unlisted_ambiguity = false;
        for call in plan.calls {
            let result = self.invoke(session, call.kind, call.request).await?;
            match result {
                Ok(response) => {
                    resolved = Some((call.kind, response));
                    break;
                }
                Err(ToolError::NotFound { .. }) => continue,
                Err(ToolError::Ambiguous { title, candidates }) if candidates.is_empty() => {
                    tracing::warn!(
                        %session_id,
                        tool = call.kind.name(),
                        %title,
                        "tool reported an ambiguous match without candidates"
                    );
                    unlisted_ambiguity = true;
                    continue;
                }
                Err(ToolError::Ambiguous { candidates, .. }) => {
                    let pending = PendingConfirmation {
                        reason: ReasonCode::AmbiguousMatch,
                        name: parsed.normalized.clone(),
                        query: parsed.raw.clone(),
                        tool: call.kind,
                        draft: None,
                        asserted_date: parsed.asserted_date,
                        tool_date: None,
                        candidates,
                    };
                    return self.defer(session, pending);
                }
                Err(ToolError::Transient(message)) => {
                    tracing::warn!(%session_id, tool = call.kind.name(), %message, "tool unavailable");
                    return Err(EngineError::Transient(message));
                }
            }
        }

        let Some((kind, response)) = resolved else {
            session.gate.refuse()?;
            let reason = if unlisted_ambiguity {
                UnresolvableReason::Ambiguous
            } else {
                UnresolvableReason::NotFound
            };
            tracing::info!(%session_id, reason = reason.as_str(), "no tool call matched");
            return Ok(ResolutionOutcome::Unresolvable(reason));
        };

        match decide(&parsed, kind, response, self.today()) {
            Decision::Create(draft) => {
                let outcome = self.commit(session, draft).await?;
                session.gate.complete()?;
                Ok(outcome)
            }
            Decision::Confirm(pending) => self.defer(session, pending),
            Decision::Unresolvable(reason) => {
                session.gate.refuse()?;
                tracing::info!(%session_id, reason = reason.as_str(), "countdown not created");
                Ok(ResolutionOutcome::Unresolvable(reason))
            }
        }
    }

    /// Confirm the session's pending payload, creating the record.
    pub async fn confirm_in(
        &self,
        session: &mut ConversationSession,
        edits: &ConfirmationEdits,
    ) -> Result<ResolutionOutcome, EngineError> {
        let pending = session.pending.take().ok_or_else(|| EngineError::Invalid {
            message: "no pending confirmation to confirm".to_string(),
            field: Some("pending".to_string()),
        })?;
        tracing::info!(
            session_id = %session.session_id,
            reason = pending.reason.as_str(),
            "confirming pending countdown"
        );
        let draft = match pending.into_draft(edits, self.today()) {
            Ok(draft) => draft,
            Err(ConfirmationError::NoUpcomingRelease) => {
                session.gate.refuse()?;
                tracing::info!(
                    session_id = %session.session_id,
                    "confirmed countdown has no upcoming date"
                );
                return Ok(ResolutionOutcome::Unresolvable(
                    UnresolvableReason::NoUpcomingRelease,
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let outcome = self.commit(session, draft).await?;
        session.gate.confirm()?;
        Ok(outcome)
    }

    pub fn cancel_in(
        &self,
        session: &mut ConversationSession,
    ) -> Result<ResolutionOutcome, EngineError> {
        session.gate.cancel()?;
        session.pending = None;
        tracing::info!(session_id = %session.session_id, "pending countdown cancelled");
        Ok(ResolutionOutcome::Refused)
    }

    async fn invoke(
        &self,
        session: &mut ConversationSession,
        kind: ToolKind,
        request: crate::tool::TitleLookupRequest,
    ) -> Result<Result<TitleLookupResponse, ToolError>, EngineError> {
        session
            .emit(StageEvent::ToolStarted {
                message: tool_started_message(kind, &request.title),
                tool: kind,
                request: request.clone(),
            })
            .await?;

        let started = Instant::now();
        let lookup = tokio::time::timeout(self.tool_timeout, self.resolver.lookup(kind, &request));
        let result = tokio::select! {
            finished = lookup => match finished {
                Ok(result) => result,
                Err(_) => Err(ToolError::Transient(format!(
                    "{} timed out after {}s",
                    kind.name(),
                    self.tool_timeout.as_secs()
                ))),
            },
            () = session.closed() => {
                tracing::info!(
                    session_id = %session.session_id,
                    tool = kind.name(),
                    "consumer gone during tool call"
                );
                return Err(EngineError::Cancelled);
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            session_id = %session.session_id,
            tool = kind.name(),
            title = %request.title,
            status = result.as_ref().map(|_| "found").unwrap_or_else(ToolError::code),
            elapsed_ms,
            "tool invoked"
        );

        session
            .emit(StageEvent::ToolResult {
                message: tool_result_message(&result),
                tool: kind,
                result: (&result).into(),
            })
            .await?;
        session.record_invocation(ToolInvocation {
            kind,
            request,
            outcome: result.clone(),
            elapsed_ms,
        });
        Ok(result)
    }

    fn defer(
        &self,
        session: &mut ConversationSession,
        pending: PendingConfirmation,
    ) -> Result<ResolutionOutcome, EngineError> {
        session.gate.require_confirmation()?;
        tracing::info!(
            session_id = %session.session_id,
            reason = pending.reason.as_str(),
            "countdown needs confirmation"
        );
        session.pending = Some(pending.clone());
        Ok(ResolutionOutcome::NeedsConfirmation(pending))
    }

    /// Persist `draft`. A uniqueness collision means another turn won the race;
    /// the winner's record is returned as `Found`.
    async fn commit(
        &self,
        session: &ConversationSession,
        draft: CountdownDraft,
    ) -> Result<ResolutionOutcome, EngineError> {
        if session.is_disconnected() {
            tracing::info!(session_id = %session.session_id, "consumer gone before create");
            return Err(EngineError::Cancelled);
        }

        let name = draft.name.clone();
        let source = draft.source.clone();
        let source_id = draft.source_id.clone();
        match self.store.create(draft.into_new(self.today())).await {
            Ok(record) => {
                tracing::info!(
                    session_id = %session.session_id,
                    name = %record.name,
                    release_date = %record.release_date,
                    dday = %record.dday_label,
                    "countdown created"
                );
                Ok(ResolutionOutcome::Created(record))
            }
            Err(StoreError::Duplicate(key)) => {
                tracing::info!(session_id = %session.session_id, ?key, "concurrent create, re-reading");
                if let Some(record) = self.store.get_by_name(&name).await? {
                    return Ok(ResolutionOutcome::Found(record));
                }
                if let Some(record) = self.store.get_by_source(&source, &source_id).await? {
                    return Ok(ResolutionOutcome::Found(record));
                }
                Err(EngineError::Transient(
                    "conflicting record disappeared during re-read".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub fn tool_started_message(kind: ToolKind, title: &str) -> String {
    match kind {
        ToolKind::MovieSearch => format!("영화 데이터베이스에서 '{title}'을(를) 찾고 있어요."),
        ToolKind::TvSearch => format!("드라마/시리즈 목록에서 '{title}'을(를) 찾고 있어요."),
    }
}

pub fn tool_result_message(result: &Result<TitleLookupResponse, ToolError>) -> String {
    match result {
        Ok(response) => format!(
            "'{}' 개봉일 {}을(를) 확인했어요.",
            response.title, response.release_date
        ),
        Err(ToolError::NotFound { .. }) => "일치하는 작품을 찾지 못했어요.".to_string(),
        Err(ToolError::Ambiguous { candidates, .. }) => {
            format!("비슷한 작품이 {}개 있어요.", candidates.len())
        }
        Err(ToolError::Transient(_)) => "작품 정보를 불러오지 못했어요.".to_string(),
    }
}
