//! Turning a parsed query into tool calls.
//!
//! A language model may sit behind [`QueryPlanner`]; the heuristic planner is the
//! offline fallback and produces the same shape of plan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::countdown::ContentType;
use crate::query::ParsedQuery;
use crate::tool::{TitleLookupRequest, ToolKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub kind: ToolKind,
    pub request: TitleLookupRequest,
}

/// Ordered tool calls for one turn. Calls run sequentially; a `not_found`
/// falls through to the next call, anything else stops the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolPlan {
    /// Rationale shown to the user before the first tool call
    pub analysis: Option<String>,
    pub calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("planner unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan(&self, query: &ParsedQuery) -> Result<ToolPlan, PlanError>;
}

/// Rule-based planner: searches the hinted content type first, then the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn plan_for(query: &ParsedQuery) -> ToolPlan {
        let request = TitleLookupRequest {
            title: query.title.clone(),
            year: query.year,
            country: query.country.clone(),
        };
        let order = match query.content_hint {
            Some(ContentType::Series) => [ToolKind::TvSearch, ToolKind::MovieSearch],
            _ => [ToolKind::MovieSearch, ToolKind::TvSearch],
        };
        ToolPlan {
            analysis: Some(analysis_message(query)),
            calls: order
                .into_iter()
                .map(|kind| ToolCall {
                    kind,
                    request: request.clone(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl QueryPlanner for HeuristicPlanner {
    async fn plan(&self, query: &ParsedQuery) -> Result<ToolPlan, PlanError> {
        Ok(Self::plan_for(query))
    }
}

/// Analysis sentence describing what is about to be looked up.
pub fn analysis_message(query: &ParsedQuery) -> String {
    let mut message = format!("요청을 분석 중입니다. '{}'의 개봉 정보를 찾아볼게요.", query.title);
    if let Some(year) = query.year {
        message.push_str(&format!(" ({year}년 작품 기준)"));
    }
    if let Some(date) = query.asserted_date {
        message.push_str(&format!(" 말씀하신 날짜 {date}와 비교할게요."));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_query;

    #[test]
    fn movie_search_runs_first_by_default() {
        let query = parse_query("프로젝트 헤일메리 개봉일").expect("parses");
        let plan = HeuristicPlanner::plan_for(&query);
        let kinds: Vec<ToolKind> = plan.calls.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ToolKind::MovieSearch, ToolKind::TvSearch]);
        assert_eq!(plan.calls[0].request.title, "프로젝트 헤일메리");
        assert!(plan.analysis.is_some());
    }

    #[test]
    fn series_hint_puts_tv_search_first() {
        let query = parse_query("오징어 게임 드라마 공개일").expect("parses");
        let plan = HeuristicPlanner::plan_for(&query);
        assert_eq!(plan.calls[0].kind, ToolKind::TvSearch);
    }

    #[test]
    fn plan_carries_year_and_country() {
        let query = parse_query("미션 임파서블 2025년 미국 개봉일").expect("parses");
        let plan = HeuristicPlanner::plan_for(&query);
        assert_eq!(plan.calls[0].request.year, Some(2025));
        assert_eq!(plan.calls[0].request.country.as_deref(), Some("US"));
    }
}
