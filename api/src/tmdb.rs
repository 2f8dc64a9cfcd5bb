//! TMDb adapter for the title-resolution tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use waitwith_core::clock::Clock;
use waitwith_core::query::normalize_name;
use waitwith_core::tool::{TitleLookupRequest, TitleLookupResponse, TitleResolver, ToolError, ToolKind};

pub const SOURCE: &str = "tmdb";
/// TMDb release type for re-releases
const RE_RELEASE_TYPE: u8 = 5;
const CAST_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct TmdbConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub language: String,
    pub region: Option<String>,
    pub image_base: String,
    pub timeout_secs: u64,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.themoviedb.org/3".to_string(),
            language: "ko-KR".to_string(),
            region: Some("KR".to_string()),
            image_base: "https://image.tmdb.org/t/p/w500".to_string(),
            timeout_secs: 10,
        }
    }
}

pub struct TmdbClient {
    client: reqwest::Client,
    config: TmdbConfig,
    clock: Arc<dyn Clock>,
}

impl TmdbClient {
    pub fn new(config: TmdbConfig, clock: Arc<dyn Clock>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            clock,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        title: &str,
    ) -> Result<T, ToolError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Transient("TMDB_API_KEY is not configured".to_string()))?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", api_key)])
            .query(params)
            .send()
            .await
            .map_err(|e| ToolError::Transient(format!("TMDb request failed: {e}")))?;

        let status = response.status().as_u16();
        if let Some(err) = ToolError::from_status(status, title) {
            tracing::warn!(path, status, "TMDb returned non-success status");
            return Err(err);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ToolError::Transient(format!("invalid TMDb payload: {e}")))
    }

    fn poster_url(&self, path: Option<&str>) -> Option<String> {
        path.filter(|p| !p.is_empty())
            .map(|p| format!("{}{}", self.config.image_base.trim_end_matches('/'), p))
    }

    fn region(&self, request: &TitleLookupRequest) -> Option<String> {
        request.country.clone().or_else(|| self.config.region.clone())
    }

    async fn search(
        &self,
        kind: ToolKind,
        request: &TitleLookupRequest,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let mut params = vec![
            ("query", request.title.clone()),
            ("include_adult", "false".to_string()),
            ("language", self.config.language.clone()),
        ];
        let path = match kind {
            ToolKind::MovieSearch => {
                if let Some(year) = request.year {
                    params.push(("year", year.to_string()));
                }
                if let Some(region) = self.region(request) {
                    params.push(("region", region));
                }
                "/search/movie"
            }
            ToolKind::TvSearch => {
                if let Some(year) = request.year {
                    params.push(("first_air_date_year", year.to_string()));
                }
                "/search/tv"
            }
        };
        let page: SearchPage = self.get_json(path, &params, &request.title).await?;
        Ok(page.results.into_iter().map(SearchHit::from).collect())
    }

    fn hit_response(&self, kind: ToolKind, hit: &SearchHit, date: NaiveDate) -> TitleLookupResponse {
        TitleLookupResponse {
            title: hit.title.clone(),
            release_date: date,
            overview: hit.overview.clone().filter(|o| !o.is_empty()),
            external_id: hit.id.to_string(),
            country: hit.country.clone(),
            is_re_release: false,
            re_release_date: None,
            source: SOURCE.to_string(),
            content_type: Some(kind.content_type()),
            poster_url: self.poster_url(hit.poster_path.as_deref()),
            distributor: None,
            director: None,
            cast: Vec::new(),
            genre: Vec::new(),
        }
    }

    async fn movie_details(
        &self,
        request: &TitleLookupRequest,
        hit: &SearchHit,
        today: NaiveDate,
    ) -> Result<TitleLookupResponse, ToolError> {
        let details: MovieDetails = self
            .get_json(
                &format!("/movie/{}", hit.id),
                &[
                    ("language", self.config.language.clone()),
                    ("append_to_response", "credits,release_dates".to_string()),
                ],
                &request.title,
            )
            .await?;

        let region = self.region(request);
        let original = parse_date(details.release_date.as_deref()).or(hit.date);
        let mut response = self.hit_response(ToolKind::MovieSearch, hit, today);
        if let Some(title) = details.title.filter(|t| !t.is_empty()) {
            response.title = title;
        }
        if let Some(overview) = details.overview.filter(|o| !o.is_empty()) {
            response.overview = Some(overview);
        }
        if let Some(poster) = self.poster_url(details.poster_path.as_deref()) {
            response.poster_url = Some(poster);
        }
        response.distributor = extract_distributor(&details.production_companies);
        response.director = extract_director(&details.credits);
        response.cast = extract_cast(&details.credits);
        response.genre = names(&details.genres);

        match select_release(&details.release_dates, region.as_deref(), today) {
            Some(release) if release.is_re_release => {
                response.release_date = original.unwrap_or(release.date);
                response.is_re_release = true;
                response.re_release_date = Some(release.date);
                response.country = Some(release.country);
            }
            Some(release) => {
                response.release_date = release.date;
                response.country = Some(release.country);
            }
            None => {
                response.release_date = original.ok_or_else(|| ToolError::NotFound {
                    title: request.title.clone(),
                })?;
                response.country = region;
            }
        }
        Ok(response)
    }

    async fn tv_details(
        &self,
        request: &TitleLookupRequest,
        hit: &SearchHit,
        today: NaiveDate,
    ) -> Result<TitleLookupResponse, ToolError> {
        let details: TvDetails = self
            .get_json(
                &format!("/tv/{}", hit.id),
                &[
                    ("language", self.config.language.clone()),
                    ("append_to_response", "credits".to_string()),
                ],
                &request.title,
            )
            .await?;

        let first_air = parse_date(details.first_air_date.as_deref()).or(hit.date);
        let next_episode = details
            .next_episode_to_air
            .and_then(|episode| parse_date(episode.air_date.as_deref()));
        let date = match (first_air, next_episode) {
            (Some(first), _) if first >= today => first,
            (_, Some(next)) if next >= today => next,
            (Some(first), _) => first,
            (None, _) => {
                return Err(ToolError::NotFound {
                    title: request.title.clone(),
                });
            }
        };

        let mut response = self.hit_response(ToolKind::TvSearch, hit, date);
        if let Some(name) = details.name.filter(|n| !n.is_empty()) {
            response.title = name;
        }
        if let Some(overview) = details.overview.filter(|o| !o.is_empty()) {
            response.overview = Some(overview);
        }
        response.distributor = extract_distributor(&details.production_companies);
        response.director = extract_director(&details.credits)
            .or_else(|| names(&details.created_by).into_iter().next());
        response.cast = extract_cast(&details.credits);
        response.genre = names(&details.genres);
        Ok(response)
    }
}

#[async_trait]
impl TitleResolver for TmdbClient {
    async fn lookup(
        &self,
        kind: ToolKind,
        request: &TitleLookupRequest,
    ) -> Result<TitleLookupResponse, ToolError> {
        let today = self.clock.today();
        let hits = self.search(kind, request).await?;
        tracing::debug!(tool = kind.name(), title = %request.title, hits = hits.len(), "TMDb search");

        if request.year.is_none() {
            let same_title = exact_title_matches(&hits, &request.title, today);
            if same_title.len() > 1 {
                let candidates = same_title
                    .into_iter()
                    .filter_map(|hit| hit.date.map(|date| self.hit_response(kind, hit, date)))
                    .collect();
                return Err(ToolError::Ambiguous {
                    title: request.title.clone(),
                    candidates,
                });
            }
        }

        let hit = select_candidate(&hits, today).ok_or_else(|| ToolError::NotFound {
            title: request.title.clone(),
        })?;
        match kind {
            ToolKind::MovieSearch => self.movie_details(request, hit, today).await,
            ToolKind::TvSearch => self.tv_details(request, hit, today).await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<RawHit>,
}

/// Movie and TV search results share this shape modulo field names.
#[derive(Debug, Deserialize)]
struct RawHit {
    id: u64,
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default, alias = "first_air_date")]
    release_date: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    origin_country: Vec<String>,
}

#[derive(Debug, Clone)]
struct SearchHit {
    id: u64,
    title: String,
    date: Option<NaiveDate>,
    overview: Option<String>,
    poster_path: Option<String>,
    country: Option<String>,
}

impl From<RawHit> for SearchHit {
    fn from(raw: RawHit) -> Self {
        Self {
            id: raw.id,
            title: raw.title.unwrap_or_default(),
            date: parse_date(raw.release_date.as_deref()),
            overview: raw.overview,
            poster_path: raw.poster_path,
            country: raw.origin_country.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MovieDetails {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    release_dates: ReleaseDates,
    #[serde(default)]
    credits: Credits,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    production_companies: Vec<Named>,
}

#[derive(Debug, Default, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<CastMember>,
    #[serde(default)]
    crew: Vec<CrewMember>,
}

#[derive(Debug, Deserialize)]
struct CastMember {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    order: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CrewMember {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    job: Option<String>,
}

/// Genres, companies and creators all carry a display `name`.
#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseDates {
    #[serde(default)]
    results: Vec<RegionReleases>,
}

#[derive(Debug, Deserialize)]
struct RegionReleases {
    iso_3166_1: String,
    #[serde(default)]
    release_dates: Vec<ReleaseEntry>,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct TvDetails {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_air_date: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    next_episode_to_air: Option<Episode>,
    #[serde(default)]
    credits: Credits,
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    production_companies: Vec<Named>,
    #[serde(default)]
    created_by: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct Episode {
    #[serde(default)]
    air_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectedRelease {
    date: NaiveDate,
    is_re_release: bool,
    country: String,
}

/// TMDb dates are `YYYY-MM-DD`, optionally followed by a time part.
fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.get(..10)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Nearest upcoming release, else the most recent past one, else the first hit.
fn select_candidate(hits: &[SearchHit], today: NaiveDate) -> Option<&SearchHit> {
    let upcoming = hits
        .iter()
        .filter(|h| h.date.is_some_and(|d| d >= today))
        .min_by_key(|h| h.date);
    let latest_past = || {
        hits.iter()
            .filter(|h| h.date.is_some_and(|d| d < today))
            .max_by_key(|h| h.date)
    };
    upcoming.or_else(latest_past).or_else(|| hits.first())
}

/// Upcoming hits whose title equals the query title, when they disagree on the
/// date. Past hits never become candidates; a re-release of one is found through
/// the details lookup instead.
fn exact_title_matches<'a>(
    hits: &'a [SearchHit],
    title: &str,
    today: NaiveDate,
) -> Vec<&'a SearchHit> {
    let wanted = normalize_name(title);
    let matches: Vec<&SearchHit> = hits
        .iter()
        .filter(|h| h.date.is_some_and(|d| d >= today) && normalize_name(&h.title) == wanted)
        .collect();
    let first_date = matches.first().and_then(|h| h.date);
    if matches.iter().any(|h| h.date != first_date) {
        matches
    } else {
        Vec::new()
    }
}

fn names(items: &[Named]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.name.as_deref())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Production companies, comma-joined.
fn extract_distributor(companies: &[Named]) -> Option<String> {
    let names = names(companies);
    (!names.is_empty()).then(|| names.join(", "))
}

fn extract_director(credits: &Credits) -> Option<String> {
    credits
        .crew
        .iter()
        .filter(|member| member.job.as_deref() == Some("Director"))
        .find_map(|member| member.name.clone().filter(|name| !name.is_empty()))
}

/// Top-billed cast. TMDb's `order` is the billing position.
fn extract_cast(credits: &Credits) -> Vec<String> {
    let mut billed: Vec<&CastMember> = credits
        .cast
        .iter()
        .filter(|member| member.name.as_deref().is_some_and(|name| !name.is_empty()))
        .collect();
    billed.sort_by_key(|member| member.order.unwrap_or(u32::MAX));
    billed
        .into_iter()
        .take(CAST_LIMIT)
        .filter_map(|member| member.name.clone())
        .collect()
}

/// Earliest upcoming release: regional theatrical/digital first, then regional
/// re-releases, then the same two buckets for any other region.
fn select_release(
    payload: &ReleaseDates,
    region: Option<&str>,
    today: NaiveDate,
) -> Option<SelectedRelease> {
    let mut buckets: [Vec<SelectedRelease>; 4] = Default::default();
    for entry in &payload.results {
        let preferred = region.is_none_or(|code| entry.iso_3166_1.eq_ignore_ascii_case(code));
        for info in &entry.release_dates {
            let Some(date) = parse_date(info.release_date.as_deref()) else {
                continue;
            };
            if date < today {
                continue;
            }
            let is_re_release = info.kind == Some(RE_RELEASE_TYPE);
            let slot = match (preferred, is_re_release) {
                (true, false) => 0,
                (true, true) => 1,
                (false, false) => 2,
                (false, true) => 3,
            };
            buckets[slot].push(SelectedRelease {
                date,
                is_re_release,
                country: entry.iso_3166_1.clone(),
            });
        }
    }
    buckets
        .into_iter()
        .find_map(|bucket| bucket.into_iter().min_by_key(|r| r.date))
}
