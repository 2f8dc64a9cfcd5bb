use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// What kind of title a countdown tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Movie,
    Series,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Series => "series",
        }
    }

    /// Accepts the stored form plus the "tv" spelling used by the TMDb endpoints.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "movie" => Some(ContentType::Movie),
            "series" | "tv" => Some(ContentType::Series),
            _ => None,
        }
    }
}

/// A shared countdown. `name` and `(source, source_id)` are each unique across records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CountdownRecord {
    /// Record ID (UUIDv7, time-sortable)
    pub id: Uuid,
    /// User-facing unique key, stored in normalized form
    pub name: String,
    /// Official title as reported by the resolution tool
    pub canonical_title: String,
    /// The date being counted down to
    #[schema(value_type = String, format = Date)]
    pub release_date: NaiveDate,
    pub content_type: ContentType,
    /// Origin system of the metadata (e.g. "tmdb")
    pub source: String,
    /// Identifier inside the origin system
    pub source_id: String,
    pub is_re_release: bool,
    /// Cached label, recomputed by the refresh task ("D-30", "D-DAY", "D+2")
    pub dday_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
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
    pub last_updated: DateTime<Utc>,
}

/// Provisional record fields. Everything a record needs except the derived label,
/// so a draft can sit inside a pending confirmation without going stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CountdownDraft {
    pub name: String,
    pub canonical_title: String,
    #[schema(value_type = String, format = Date)]
    pub release_date: NaiveDate,
    pub content_type: ContentType,
    pub source: String,
    pub source_id: String,
    #[serde(default)]
    pub is_re_release: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
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

impl CountdownDraft {
    /// Freeze the draft into store input, deriving the label for `today`.
    pub fn into_new(self, today: NaiveDate) -> NewCountdown {
        let dday_label = dday_label(self.release_date, today);
        NewCountdown {
            draft: self,
            dday_label,
        }
    }
}

/// Input to the store's create operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCountdown {
    pub draft: CountdownDraft,
    pub dday_label: String,
}

/// Signed day count from `today` to `release_date` (positive = upcoming).
pub fn days_until(release_date: NaiveDate, today: NaiveDate) -> i64 {
    release_date.signed_duration_since(today).num_days()
}

/// Canonical D-Day label: `D-<n>` before the date, `D-DAY` on it, `D+<n>` after.
pub fn dday_label(release_date: NaiveDate, today: NaiveDate) -> String {
    let delta = days_until(release_date, today);
    if delta > 0 {
        format!("D-{delta}")
    } else if delta == 0 {
        "D-DAY".to_string()
    } else {
        format!("D+{}", delta.abs())
    }
}
