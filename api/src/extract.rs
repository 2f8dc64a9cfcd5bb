//! `AppJson<T>`: `axum::Json` whose rejections become `validation_failed` bodies.
//!
//! axum reports data errors as `<json path>: <serde message>`, with the path
//! left out for top-level problems. The path is turned into the `field` of the
//! error, so a bad confirm body points at `pending.draft.release_date` or
//! `edits.candidate_index` the same way engine-side confirmation errors do.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

const DOCS_HINT: &str = "Bodies are described at GET /api-doc/openapi.json. A confirm body echoes \
     the `pending` payload of the confirmation_required event unchanged.";

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let located = match &rejection {
        JsonRejection::JsonDataError(_) => {
            let detail = body_text
                .split_once("target type: ")
                .map_or(body_text.as_str(), |(_, detail)| detail);
            locate(detail)
        }
        JsonRejection::MissingJsonContentType(_) => Located::at("content-type"),
        _ => Located::at("body"),
    };

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(located.field),
        received: located.received,
        docs_hint: Some(DOCS_HINT.to_string()),
    }
}

#[derive(Debug, PartialEq)]
struct Located {
    field: String,
    received: Option<serde_json::Value>,
}

impl Located {
    fn at(field: &str) -> Self {
        Self {
            field: field.to_string(),
            received: None,
        }
    }
}

/// Field path and offending value of one serde data error.
///
/// A missing or unknown field is appended to the path of the object it belongs
/// to; an unknown enum variant is reported as the received value.
fn locate(detail: &str) -> Located {
    let (path, problem) = match detail.split_once(": ") {
        Some((path, problem)) if is_json_path(path) => (Some(path), problem),
        _ => (None, detail),
    };
    let named = backticked(problem, "missing field `").or_else(|| backticked(problem, "unknown field `"));
    let field = match (path, named) {
        (Some(path), Some(name)) => format!("{path}.{name}"),
        (Some(path), None) => path.to_string(),
        (None, Some(name)) => name.to_string(),
        (None, None) => "body".to_string(),
    };
    let received =
        backticked(problem, "unknown variant `").map(|v| serde_json::Value::String(v.to_string()));
    Located { field, received }
}

fn is_json_path(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

fn backticked<'a>(msg: &'a str, prefix: &str) -> Option<&'a str> {
    let after = &msg[msg.find(prefix)? + prefix.len()..];
    after.find('`').map(|end| &after[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_missing_field_is_the_field() {
        let located = locate("missing field `query` at line 1 column 2");
        assert_eq!(located, Located::at("query"));
    }

    #[test]
    fn missing_field_inside_pending_draft_keeps_the_path() {
        let located = locate("pending.draft: missing field `release_date` at line 1 column 180");
        assert_eq!(located.field, "pending.draft.release_date");
        assert_eq!(located.received, None);
    }

    #[test]
    fn type_error_points_at_the_nested_field() {
        let located = locate(
            "edits.candidate_index: invalid type: string \"first\", expected usize at line 1 column 60",
        );
        assert_eq!(located.field, "edits.candidate_index");
    }

    #[test]
    fn unknown_action_reports_the_received_variant() {
        let located =
            locate("action: unknown variant `approve`, expected `confirm` or `cancel` at line 1 column 30");
        assert_eq!(located.field, "action");
        assert_eq!(
            located.received,
            Some(serde_json::Value::String("approve".to_string()))
        );
    }

    #[test]
    fn candidate_paths_keep_their_index() {
        let located = locate(
            "pending.candidates[1].release_date: input contains invalid characters at line 1 column 90",
        );
        assert_eq!(located.field, "pending.candidates[1].release_date");
    }

    #[test]
    fn top_level_type_error_falls_back_to_body() {
        let located = locate("invalid type: integer `3`, expected struct ChatRequest at line 1 column 1");
        assert_eq!(located, Located::at("body"));
    }
}
