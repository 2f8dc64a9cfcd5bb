use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::IntoParams;

use waitwith_core::countdown::{CountdownRecord, dday_label};
use waitwith_core::query::normalize_name;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/countdowns", get(list_countdowns))
        .route("/v1/countdowns/{name}", get(get_countdown))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListCountdownsParams {
    /// Reference date (YYYY-MM-DD). Defaults to today in the service timezone.
    pub as_of: Option<String>,
}

fn parse_as_of(raw: Option<String>, today: NaiveDate) -> Result<NaiveDate, AppError> {
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(today),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
            AppError::Validation {
                message: format!("as_of must be a date in YYYY-MM-DD form, got '{value}'"),
                field: Some("as_of".to_string()),
                received: Some(serde_json::Value::String(value.to_string())),
                docs_hint: Some("Example: GET /v1/countdowns?as_of=2026-02-18".to_string()),
            }
        }),
    }
}

/// Labels are cached on write; serve them as of the reference date.
fn relabel(mut record: CountdownRecord, as_of: NaiveDate) -> CountdownRecord {
    record.dday_label = dday_label(record.release_date, as_of);
    record
}

/// List upcoming countdowns
///
/// Records whose release date is on or after `as_of`, soonest first.
#[utoipa::path(
    get,
    path = "/v1/countdowns",
    params(ListCountdownsParams),
    responses(
        (status = 200, description = "Upcoming countdowns", body = Vec<CountdownRecord>),
        (status = 400, description = "Invalid as_of", body = waitwith_core::error::ApiError),
        (status = 503, description = "Record store unavailable", body = waitwith_core::error::ApiError)
    ),
    tag = "countdowns"
)]
pub async fn list_countdowns(
    State(state): State<AppState>,
    Query(params): Query<ListCountdownsParams>,
) -> Result<Json<Vec<CountdownRecord>>, AppError> {
    let as_of = parse_as_of(params.as_of, state.engine.today())?;
    let records = state.store.list_upcoming(as_of).await?;
    Ok(Json(
        records.into_iter().map(|r| relabel(r, as_of)).collect(),
    ))
}

/// Get a countdown by name
///
/// The name is normalized the same way chat queries are before lookup.
#[utoipa::path(
    get,
    path = "/v1/countdowns/{name}",
    params(("name" = String, Path, description = "Countdown name")),
    responses(
        (status = 200, description = "Countdown record", body = CountdownRecord),
        (status = 404, description = "No countdown with that name", body = waitwith_core::error::ApiError)
    ),
    tag = "countdowns"
)]
pub async fn get_countdown(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CountdownRecord>, AppError> {
    let normalized = normalize_name(&name);
    if normalized.is_empty() {
        return Err(AppError::Validation {
            message: "name must not be empty".to_string(),
            field: Some("name".to_string()),
            received: Some(serde_json::Value::String(name)),
            docs_hint: None,
        });
    }
    let record = state
        .store
        .get_by_name(&normalized)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: format!("countdown '{normalized}'"),
        })?;
    Ok(Json(relabel(record, state.engine.today())))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use waitwith_core::countdown::{ContentType, CountdownDraft};
    use waitwith_core::store::CountdownStore;
    use waitwith_core::testing::{ScriptedResolver, date};

    use super::*;
    use crate::routes::test_support;

    fn draft(name: &str, source_id: &str, release: NaiveDate) -> CountdownDraft {
        CountdownDraft {
            name: name.to_string(),
            canonical_title: name.to_string(),
            release_date: release,
            content_type: ContentType::Movie,
            source: "tmdb".to_string(),
            source_id: source_id.to_string(),
            is_re_release: false,
            overview: None,
            country: Some("KR".to_string()),
            poster_url: None,
            distributor: None,
            director: None,
            cast: Vec::new(),
            genre: Vec::new(),
        }
    }

    async fn seeded() -> Router {
        let (state, store) = test_support::state(ScriptedResolver::new());
        let created_on = date(2026, 2, 1);
        for (name, id, release) in [
            ("프로젝트 헤일메리 개봉일", "687163", date(2026, 3, 20)),
            ("지난 영화", "1", date(2026, 1, 10)),
            ("오디세이", "2", date(2026, 7, 17)),
        ] {
            store
                .create(draft(name, id, release).into_new(created_on))
                .await
                .expect("seed insert");
        }
        router().with_state(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn lists_upcoming_with_labels_for_today() {
        let (status, body) = get_json(seeded().await, "/v1/countdowns").await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["canonical_title"], "프로젝트 헤일메리 개봉일");
        assert_eq!(items[0]["dday_label"], "D-30");
        assert_eq!(items[1]["canonical_title"], "오디세이");
    }

    #[tokio::test]
    async fn as_of_moves_the_window() {
        let (status, body) = get_json(seeded().await, "/v1/countdowns?as_of=2026-04-01").await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().expect("array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["dday_label"], "D-107");
    }

    #[tokio::test]
    async fn invalid_as_of_is_validation_error() {
        let (status, body) = get_json(seeded().await, "/v1/countdowns?as_of=tomorrow").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "as_of");
    }

    #[tokio::test]
    async fn get_normalizes_name() {
        let (status, body) = get_json(
            seeded().await,
            "/v1/countdowns/%20%ED%94%84%EB%A1%9C%EC%A0%9D%ED%8A%B8%20%20%ED%97%A4%EC%9D%BC%EB%A9%94%EB%A6%AC%20%EA%B0%9C%EB%B4%89%EC%9D%BC",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source_id"], "687163");
    }

    #[tokio::test]
    async fn unknown_name_is_404() {
        let (status, body) = get_json(seeded().await, "/v1/countdowns/nothing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }
}
