//! Per-request conversation state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::countdown::CountdownDraft;
use crate::events::{StageEvent, StreamFrame};
use crate::gate::ConfirmationGate;
use crate::protocol::{ProtocolError, SequenceValidator};
use crate::query::normalize_name;
use crate::tool::{TitleLookupRequest, TitleLookupResponse, ToolError, ToolKind};

/// Why creation was deferred to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    DateMismatch,
    AmbiguousMatch,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::DateMismatch => "date_mismatch",
            ReasonCode::AmbiguousMatch => "ambiguous_match",
        }
    }
}

/// Provisional record awaiting a confirm or cancel.
///
/// Sent to the client inside `confirmation_required` and echoed back verbatim on
/// `/v1/chat/confirm`; the server keeps no copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PendingConfirmation {
    pub reason: ReasonCode,
    /// Record name the countdown will be stored under
    pub name: String,
    /// Query that produced this confirmation
    pub query: String,
    pub tool: ToolKind,
    /// Fields of the record to create (absent for `ambiguous_match`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<CountdownDraft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Date)]
    pub asserted_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Date)]
    pub tool_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<TitleLookupResponse>,
}

/// User changes applied on confirm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationEdits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Date)]
    pub release_date: Option<NaiveDate>,
    /// Which candidate of an `ambiguous_match` to keep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    #[error("an ambiguous match needs candidate_index to pick one of the candidates")]
    CandidateRequired,
    #[error("candidate_index {index} is out of range ({len} candidates)")]
    CandidateOutOfRange { index: usize, len: usize },
    #[error("pending confirmation carries no record draft")]
    MissingDraft,
    #[error("record name must not be empty")]
    EmptyName,
    /// The chosen date is past and the title is not being re-released
    #[error("no upcoming release date to count down to")]
    NoUpcomingRelease,
}

impl ConfirmationError {
    pub fn field(&self) -> &'static str {
        match self {
            ConfirmationError::CandidateRequired | ConfirmationError::CandidateOutOfRange { .. } => {
                "edits.candidate_index"
            }
            ConfirmationError::MissingDraft => "pending.draft",
            ConfirmationError::EmptyName => "edits.name",
            ConfirmationError::NoUpcomingRelease => "edits.release_date",
        }
    }
}

impl PendingConfirmation {
    /// Resolve the payload plus edits into the draft to persist.
    ///
    /// The result obeys the same date rule as an unconfirmed turn: a past date
    /// is only kept for a re-release.
    pub fn into_draft(
        self,
        edits: &ConfirmationEdits,
        today: NaiveDate,
    ) -> Result<CountdownDraft, ConfirmationError> {
        let mut draft = match self.reason {
            ReasonCode::AmbiguousMatch => {
                let index = edits
                    .candidate_index
                    .ok_or(ConfirmationError::CandidateRequired)?;
                let len = self.candidates.len();
                let candidate = self
                    .candidates
                    .into_iter()
                    .nth(index)
                    .ok_or(ConfirmationError::CandidateOutOfRange { index, len })?;
                let date = candidate
                    .countdown_date(today)
                    .ok_or(ConfirmationError::NoUpcomingRelease)?;
                let mut draft = draft_from_response(self.name, self.tool, candidate);
                draft.release_date = date;
                draft
            }
            ReasonCode::DateMismatch => self.draft.ok_or(ConfirmationError::MissingDraft)?,
        };

        if let Some(name) = &edits.name {
            draft.name = normalize_name(name);
        }
        if let Some(title) = &edits.canonical_title {
            let title = title.trim();
            if !title.is_empty() {
                draft.canonical_title = title.to_string();
            }
        }
        if let Some(date) = edits.release_date {
            draft.release_date = date;
        }
        if draft.name.is_empty() {
            return Err(ConfirmationError::EmptyName);
        }
        if draft.release_date < today && !draft.is_re_release {
            return Err(ConfirmationError::NoUpcomingRelease);
        }
        Ok(draft)
    }
}

/// Draft for a tool response, counting down to `response.release_date`.
pub fn draft_from_response(
    name: String,
    tool: ToolKind,
    response: TitleLookupResponse,
) -> CountdownDraft {
    CountdownDraft {
        name,
        canonical_title: response.title,
        release_date: response.release_date,
        content_type: response.content_type.unwrap_or(tool.content_type()),
        source: response.source,
        source_id: response.external_id,
        is_re_release: response.is_re_release,
        overview: response.overview,
        country: response.country,
        poster_url: response.poster_url,
        distributor: response.distributor,
        director: response.director,
        cast: response.cast,
        genre: response.genre,
    }
}

/// One tool call made during a turn. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub kind: ToolKind,
    pub request: TitleLookupRequest,
    pub outcome: Result<TitleLookupResponse, ToolError>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("stream consumer disconnected")]
    Disconnected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// State of a single turn, owned by whoever drives it.
///
/// Every emitted event is numbered, checked against the turn grammar, kept in
/// the transcript and forwarded to the sink if one is attached.
#[derive(Debug)]
pub struct ConversationSession {
    pub session_id: Uuid,
    pub raw_query: String,
    pub normalized_query: String,
    pub events: Vec<StreamFrame>,
    pub invocations: Vec<ToolInvocation>,
    pub assistant_text: String,
    pub pending: Option<PendingConfirmation>,
    pub gate: ConfirmationGate,
    validator: SequenceValidator,
    sink: Option<mpsc::Sender<StreamFrame>>,
}

impl ConversationSession {
    pub fn new(raw_query: impl Into<String>) -> Self {
        let raw_query = raw_query.into();
        Self {
            session_id: Uuid::now_v7(),
            normalized_query: normalize_name(&raw_query),
            raw_query,
            events: Vec::new(),
            invocations: Vec::new(),
            assistant_text: String::new(),
            pending: None,
            gate: ConfirmationGate::new(),
            validator: SequenceValidator::new(),
            sink: None,
        }
    }

    /// Session for a confirm/cancel request carrying `pending`.
    pub fn resumed(pending: PendingConfirmation) -> Self {
        let mut session = Self::new(pending.query.clone());
        session.gate = ConfirmationGate::resume();
        session.pending = Some(pending);
        session
    }

    pub fn with_sink(mut self, sink: mpsc::Sender<StreamFrame>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Whether the attached consumer went away. Always false without a sink.
    pub fn is_disconnected(&self) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.is_closed())
    }

    /// Resolves once the attached consumer goes away. Never resolves without a sink.
    pub async fn closed(&self) {
        match &self.sink {
            Some(sink) => sink.closed().await,
            None => std::future::pending().await,
        }
    }

    pub async fn emit(&mut self, event: StageEvent) -> Result<(), SessionError> {
        let frame = StreamFrame {
            seq: self.validator.next_seq(),
            event,
        };
        self.validator.accept(&frame)?;
        self.events.push(frame.clone());

        if let Some(sink) = &self.sink {
            sink.send(frame)
                .await
                .map_err(|_| SessionError::Disconnected)?;
        }
        Ok(())
    }

    pub fn record_invocation(&mut self, invocation: ToolInvocation) {
        self.invocations.push(invocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countdown::ContentType;
    use crate::events::TurnOutcome;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn today() -> NaiveDate {
        date(2026, 2, 18)
    }

    fn candidate(id: &str, release: NaiveDate) -> TitleLookupResponse {
        TitleLookupResponse {
            title: "듄".to_string(),
            release_date: release,
            overview: None,
            external_id: id.to_string(),
            country: Some("KR".to_string()),
            is_re_release: false,
            re_release_date: None,
            source: "tmdb".to_string(),
            content_type: None,
            poster_url: None,
            distributor: None,
            director: None,
            cast: Vec::new(),
            genre: Vec::new(),
        }
    }

    fn ambiguous() -> PendingConfirmation {
        PendingConfirmation {
            reason: ReasonCode::AmbiguousMatch,
            name: "듄 개봉일".to_string(),
            query: "듄 개봉일".to_string(),
            tool: ToolKind::MovieSearch,
            draft: None,
            asserted_date: None,
            tool_date: None,
            candidates: vec![
                candidate("438631", date(2026, 11, 1)),
                candidate("841", date(2027, 1, 5)),
            ],
        }
    }

    #[test]
    fn ambiguous_confirmation_requires_a_candidate() {
        let err = ambiguous()
            .into_draft(&ConfirmationEdits::default(), today())
            .expect_err("candidate required");
        assert_eq!(err, ConfirmationError::CandidateRequired);
        assert_eq!(err.field(), "edits.candidate_index");

        let edits = ConfirmationEdits {
            candidate_index: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            ambiguous().into_draft(&edits, today()),
            Err(ConfirmationError::CandidateOutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn chosen_candidate_becomes_the_draft() {
        let edits = ConfirmationEdits {
            candidate_index: Some(1),
            ..Default::default()
        };
        let draft = ambiguous().into_draft(&edits, today()).expect("draft");
        assert_eq!(draft.source_id, "841");
        assert_eq!(draft.release_date, date(2027, 1, 5));
        assert_eq!(draft.content_type, ContentType::Movie);
        assert_eq!(draft.name, "듄 개봉일");
    }

    #[test]
    fn edits_override_draft_fields() {
        let mut pending = ambiguous();
        pending.reason = ReasonCode::DateMismatch;
        pending.draft = Some(draft_from_response(
            "듄 개봉일".to_string(),
            ToolKind::MovieSearch,
            candidate("438631", date(2026, 11, 1)),
        ));
        let edits = ConfirmationEdits {
            name: Some("  듄   파트3 ".to_string()),
            release_date: Some(date(2026, 12, 1)),
            ..Default::default()
        };
        let draft = pending.into_draft(&edits, today()).expect("draft");
        assert_eq!(draft.name, "듄 파트3");
        assert_eq!(draft.release_date, date(2026, 12, 1));
        assert_eq!(draft.canonical_title, "듄");
    }

    #[test]
    fn past_dates_are_refused_unless_re_released() {
        let mut pending = ambiguous();
        pending.candidates[0].release_date = date(1984, 12, 14);
        let pick_first = ConfirmationEdits {
            candidate_index: Some(0),
            ..Default::default()
        };
        assert_eq!(
            pending.clone().into_draft(&pick_first, today()),
            Err(ConfirmationError::NoUpcomingRelease)
        );

        pending.candidates[0].is_re_release = true;
        pending.candidates[0].re_release_date = Some(date(2026, 3, 1));
        let draft = pending.into_draft(&pick_first, today()).expect("re-release");
        assert_eq!(draft.release_date, date(2026, 3, 1));
        assert!(draft.is_re_release);

        let backdated = ConfirmationEdits {
            candidate_index: Some(1),
            release_date: Some(date(2020, 1, 1)),
            ..Default::default()
        };
        assert_eq!(
            ambiguous().into_draft(&backdated, today()),
            Err(ConfirmationError::NoUpcomingRelease)
        );
    }

    #[tokio::test]
    async fn closed_resolves_when_the_consumer_leaves() {
        let (tx, rx) = mpsc::channel(1);
        let session = ConversationSession::new("q").with_sink(tx);
        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), session.closed())
            .await
            .expect("closed resolves");

        let detached = ConversationSession::new("q");
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), detached.closed()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn emit_numbers_frames_and_forwards_them() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut session = ConversationSession::new("  프로젝트  헤일메리 ").with_sink(tx);
        assert_eq!(session.normalized_query, "프로젝트 헤일메리");

        session
            .emit(StageEvent::Start {
                session_id: session.session_id,
                query: session.raw_query.clone(),
            })
            .await
            .expect("start");
        session
            .emit(StageEvent::AssistantMessage {
                message: "done".to_string(),
            })
            .await
            .expect("message");

        let first = rx.recv().await.expect("frame");
        let second = rx.recv().await.expect("frame");
        assert_eq!((first.seq, second.seq), (0, 1));
        assert_eq!(session.events.len(), 2);
    }

    #[tokio::test]
    async fn emit_rejects_out_of_order_and_reports_disconnect() {
        let mut session = ConversationSession::new("q");
        let err = session
            .emit(StageEvent::End {
                outcome: TurnOutcome::Found,
            })
            .await
            .expect_err("end before start");
        assert!(matches!(err, SessionError::Protocol(_)));

        let (tx, rx) = mpsc::channel(1);
        let mut session = ConversationSession::new("q").with_sink(tx);
        drop(rx);
        assert!(session.is_disconnected());
        let err = session
            .emit(StageEvent::Start {
                session_id: session.session_id,
                query: "q".to_string(),
            })
            .await
            .expect_err("receiver dropped");
        assert_eq!(err, SessionError::Disconnected);
    }
}
