//! Contract of the external title-resolution tool.
//!
//! The tool takes a title (plus optional year and country) and answers with one
//! release record or a typed failure. Transport details live in the adapters.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::countdown::ContentType;

/// Which search the tool performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    MovieSearch,
    TvSearch,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::MovieSearch => "movie_search",
            ToolKind::TvSearch => "tv_search",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "movie_search" => Some(ToolKind::MovieSearch),
            "tv_search" => Some(ToolKind::TvSearch),
            _ => None,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            ToolKind::MovieSearch => ContentType::Movie,
            ToolKind::TvSearch => ContentType::Series,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TitleLookupRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// ISO 3166-1 alpha-2 country code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TitleLookupResponse {
    pub title: String,
    /// Primary release (or first air) date
    #[schema(value_type = String, format = Date)]
    pub release_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub is_re_release: bool,
    /// Upcoming re-release date, when `is_re_release` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Date)]
    pub re_release_date: Option<NaiveDate>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    /// Leading cast in billing order, at most five names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cast: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genre: Vec<String>,
}

impl TitleLookupResponse {
    /// Date a countdown for this title targets: the release itself while it is
    /// still ahead, else the re-release date. `None` when neither applies.
    pub fn countdown_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        if self.release_date >= today {
            Some(self.release_date)
        } else if self.is_re_release {
            self.re_release_date
        } else {
            None
        }
    }
}

/// Failure taxonomy of the tool boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// Nothing matched (HTTP 404 semantics)
    #[error("no title matched '{title}'")]
    NotFound { title: String },
    /// Several plausible matches (HTTP 409 semantics)
    #[error("{} titles matched '{title}'", candidates.len())]
    Ambiguous {
        title: String,
        candidates: Vec<TitleLookupResponse>,
    },
    /// Upstream unreachable, 5xx or timed out
    #[error("title lookup unavailable: {0}")]
    Transient(String),
}

impl ToolError {
    /// Map an upstream HTTP status onto the taxonomy. `None` for success codes.
    pub fn from_status(status: u16, title: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            404 => Some(ToolError::NotFound {
                title: title.to_string(),
            }),
            409 => Some(ToolError::Ambiguous {
                title: title.to_string(),
                candidates: Vec::new(),
            }),
            other => Some(ToolError::Transient(format!("upstream returned HTTP {other}"))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ToolError::NotFound { .. } => "not_found",
            ToolError::Ambiguous { .. } => "ambiguous",
            ToolError::Transient(_) => "transient",
        }
    }
}

/// The external resolution tool.
#[async_trait]
pub trait TitleResolver: Send + Sync {
    async fn lookup(
        &self,
        kind: ToolKind,
        request: &TitleLookupRequest,
    ) -> Result<TitleLookupResponse, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_defaults_re_release_flag_when_absent() {
        let raw = r#"{
            "title": "프로젝트 헤일메리",
            "release_date": "2026-03-20",
            "external_id": "687163",
            "source": "tmdb"
        }"#;
        let parsed: TitleLookupResponse = serde_json::from_str(raw).expect("valid payload");
        assert!(!parsed.is_re_release);
        assert_eq!(parsed.re_release_date, None);
        assert_eq!(parsed.release_date.to_string(), "2026-03-20");
    }

    #[test]
    fn status_codes_map_onto_taxonomy() {
        assert_eq!(ToolError::from_status(200, "x"), None);
        assert!(matches!(
            ToolError::from_status(404, "x"),
            Some(ToolError::NotFound { .. })
        ));
        assert!(matches!(
            ToolError::from_status(409, "x"),
            Some(ToolError::Ambiguous { .. })
        ));
        assert!(matches!(
            ToolError::from_status(503, "x"),
            Some(ToolError::Transient(_))
        ));
        assert!(matches!(
            ToolError::from_status(401, "x"),
            Some(ToolError::Transient(_))
        ));
    }

    #[test]
    fn tool_names_round_trip() {
        for kind in [ToolKind::MovieSearch, ToolKind::TvSearch] {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("weather"), None);
    }
}
