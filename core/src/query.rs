//! Query normalization and best-effort argument extraction.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::countdown::ContentType;

pub const MAX_QUERY_CHARS: usize = 200;

static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})[-./](\d{1,2})[-./](\d{1,2})").expect("valid iso date regex")
});
static KOREAN_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*년\s*(\d{1,2})\s*월\s*(\d{1,2})\s*일?").expect("valid korean date regex")
});
/// A year only counts when marked as one: "(2021)" or "2021년"/"2021년도". A bare
/// number such as "2049" stays part of the title.
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\s*((?:19|20)\d{2})\s*\)|(?:^|[^\d])((?:19|20)\d{2})\s*년(?:도)?")
        .expect("valid year regex")
});

/// Words that describe the request rather than the title.
const FILLER_WORDS: &[&str] = &[
    "d-day", "dday", "디데이", "설정", "설정해", "설정해줘", "만들어", "만들어줘", "등록",
    "등록해줘", "알려줘", "언제", "언제야", "날짜", "맞지", "맞아", "맞나", "해줘", "좀",
    "countdown", "release", "date", "set", "please", "when",
];
/// Stems that mark request words even with particles attached ("개봉일은", "방영일이").
const FILLER_STEMS: &[&str] = &["개봉", "재개봉", "디데이", "방영", "출시", "공개일", "카운트다운"];
const COUNTRY_WORDS: &[(&str, &str)] = &[
    ("한국", "KR"),
    ("국내", "KR"),
    ("미국", "US"),
    ("북미", "US"),
    ("일본", "JP"),
    ("영국", "GB"),
];
const SERIES_WORDS: &[&str] = &["드라마", "시리즈", "series", "tv"];
const MOVIE_WORDS: &[&str] = &["영화", "movie", "film"];

/// Reasons a query is rejected before any tool call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    Empty,
    #[error("query exceeds {MAX_QUERY_CHARS} characters")]
    TooLong,
    #[error("'{0}' is not a valid calendar date")]
    InvalidDate(String),
    #[error("no title could be extracted from the query")]
    MissingTitle,
}

/// Everything the engine needs from the user's sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub raw: String,
    /// Lookup key for existing records
    pub normalized: String,
    /// Best-effort title for the tool
    pub title: String,
    pub year: Option<i32>,
    pub country: Option<String>,
    /// Date the user claims, e.g. "2026-04-01"
    pub asserted_date: Option<NaiveDate>,
    pub content_hint: Option<ContentType>,
}

/// Trim, collapse inner whitespace and case-fold.
pub fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn parse_query(raw: &str) -> Result<ParsedQuery, QueryError> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(QueryError::Empty);
    }
    if collapsed.chars().count() > MAX_QUERY_CHARS {
        return Err(QueryError::TooLong);
    }

    let (asserted_date, working) = extract_date(&collapsed)?;
    let (year, working) = extract_year(&working);

    let mut country = None;
    let mut content_hint = None;
    let mut title_tokens = Vec::new();
    for token in working.split_whitespace() {
        let token = token.trim_matches(|c: char| "?!.,\"'“”‘’~".contains(c));
        if token.is_empty() {
            continue;
        }
        let lower = token.to_lowercase();
        if FILLER_WORDS.contains(&lower.as_str())
            || FILLER_STEMS.iter().any(|stem| lower.starts_with(stem))
        {
            continue;
        }
        if let Some((_, code)) = COUNTRY_WORDS.iter().find(|(word, _)| lower.starts_with(word)) {
            country = Some((*code).to_string());
            continue;
        }
        if SERIES_WORDS.contains(&lower.as_str()) {
            content_hint = Some(ContentType::Series);
            continue;
        }
        if MOVIE_WORDS.contains(&lower.as_str()) {
            content_hint = Some(ContentType::Movie);
            continue;
        }
        title_tokens.push(token);
    }

    let title = title_tokens.join(" ");
    if title.is_empty() {
        return Err(QueryError::MissingTitle);
    }

    Ok(ParsedQuery {
        raw: raw.to_string(),
        normalized: normalize_name(raw),
        title,
        year,
        country,
        asserted_date,
        content_hint,
    })
}

fn extract_date(text: &str) -> Result<(Option<NaiveDate>, String), QueryError> {
    for re in [&*ISO_DATE_RE, &*KOREAN_DATE_RE] {
        if let Some(caps) = re.captures(text) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let y = caps[1].parse::<i32>().ok();
            let m = caps[2].parse::<u32>().ok();
            let d = caps[3].parse::<u32>().ok();
            let date = match (y, m, d) {
                (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
                _ => None,
            };
            let Some(date) = date else {
                return Err(QueryError::InvalidDate(text[whole].to_string()));
            };
            let mut rest = String::with_capacity(text.len());
            rest.push_str(&text[..whole.start]);
            rest.push(' ');
            rest.push_str(&text[whole.end..]);
            return Ok((Some(date), rest));
        }
    }
    Ok((None, text.to_string()))
}

fn extract_year(text: &str) -> (Option<i32>, String) {
    let Some(caps) = YEAR_RE.captures(text) else {
        return (None, text.to_string());
    };
    let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1).or_else(|| caps.get(2))) else {
        return (None, text.to_string());
    };
    let start = if caps.get(1).is_some() {
        whole.start()
    } else {
        digits.start()
    };
    let year = digits.as_str().parse::<i32>().ok();
    let mut rest = String::with_capacity(text.len());
    rest.push_str(&text[..start]);
    rest.push(' ');
    rest.push_str(&text[whole.end()..]);
    (year, rest)
}
