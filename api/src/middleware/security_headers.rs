use axum::extract::Request;
use axum::http::HeaderValue;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::Next;
use axum::response::Response;

/// Apply a minimal security-header baseline to all responses.
///
/// Event streams additionally get `x-accel-buffering: no` so reverse proxies
/// forward each frame as it is written.
pub async fn apply(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let is_event_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));

    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("frame-ancestors 'none'"),
    );
    if is_event_stream {
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::{Router, middleware};
    use tower::ServiceExt;

    async fn ok() -> StatusCode {
        StatusCode::OK
    }

    async fn stream() -> ([(&'static str, &'static str); 1], &'static str) {
        ([("content-type", "text/event-stream")], "event: end\ndata: {}\n\n")
    }

    fn app() -> Router {
        Router::new()
            .route("/health", get(ok))
            .route("/stream", get(stream))
            .layer(middleware::from_fn(super::apply))
    }

    async fn get_headers(uri: &str) -> axum::http::HeaderMap {
        app()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed")
            .headers()
            .clone()
    }

    #[tokio::test]
    async fn apply_adds_security_headers() {
        let headers = get_headers("/health").await;
        assert_eq!(
            headers
                .get("x-content-type-options")
                .expect("x-content-type-options header should exist"),
            "nosniff"
        );
        assert_eq!(
            headers
                .get("x-frame-options")
                .expect("x-frame-options header should exist"),
            "DENY"
        );
        assert!(headers.get("x-accel-buffering").is_none());
    }

    #[tokio::test]
    async fn event_streams_disable_proxy_buffering() {
        let headers = get_headers("/stream").await;
        assert_eq!(
            headers
                .get("x-accel-buffering")
                .expect("x-accel-buffering header should exist"),
            "no"
        );
        assert_eq!(
            headers
                .get("referrer-policy")
                .expect("referrer-policy header should exist"),
            "strict-origin-when-cross-origin"
        );
    }
}
