use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::cache::CACHE_HEADER;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Tag the request with an id, reusing one from the front door when present,
/// and echo it on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let ctx = RequestContext { request_id };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Split an `x-cache` value such as `HIT (static)` into outcome and backend.
fn cache_outcome(headers: &HeaderMap) -> (String, String) {
    let Some(value) = headers
        .get(CACHE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return ("bypass".to_string(), String::new());
    };
    match value.split_once(' ') {
        Some((outcome, backend)) => (
            outcome.to_ascii_lowercase(),
            backend.trim_matches(|c| c == '(' || c == ')').to_string(),
        ),
        None => (value.to_ascii_lowercase(), String::new()),
    }
}

/// One line per response: debug for successes, with the cache outcome, and
/// warn or error with the attached [`ErrorReport`] for failures.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();
    let (cache, backend) = cache_outcome(response.headers());

    if !(status.is_client_error() || status.is_server_error()) {
        debug!(
            target = "pagecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            cache = %cache,
            backend = %backend,
            request_id = %request_id,
            "request served",
        );
        return response;
    }

    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .cloned()
        .unwrap_or_else(|| "no diagnostic available".to_string());

    if status.is_server_error() {
        error!(
            target = "pagecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            cache = %cache,
            source,
            detail = %detail,
            chain = ?messages,
            request_id = %request_id,
            "request failed",
        );
    } else {
        warn!(
            target = "pagecache::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            cache = %cache,
            source,
            detail = %detail,
            request_id = %request_id,
            "client request error",
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(log_responses))
            .layer(middleware::from_fn(set_request_context))
    }

    #[tokio::test]
    async fn request_id_is_generated_and_echoed() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        let id = response.headers()[REQUEST_ID_HEADER]
            .to_str()
            .expect("ascii id");
        assert!(Uuid::parse_str(id).is_ok());
        assert!(response.extensions().get::<RequestContext>().is_some());
    }

    #[tokio::test]
    async fn incoming_request_id_is_kept() {
        let request = Request::builder()
            .uri("/")
            .header(REQUEST_ID_HEADER, "edge-42")
            .body(Body::empty())
            .expect("request");
        let response = app().oneshot(request).await.expect("response");
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "edge-42");
    }

    #[test]
    fn cache_header_is_split_into_outcome_and_backend() {
        let mut headers = HeaderMap::new();
        assert_eq!(cache_outcome(&headers), ("bypass".to_string(), String::new()));

        headers.insert(CACHE_HEADER, HeaderValue::from_static("HIT (static)"));
        assert_eq!(
            cache_outcome(&headers),
            ("hit".to_string(), "static".to_string())
        );

        headers.insert(CACHE_HEADER, HeaderValue::from_static("MISS (transient)"));
        assert_eq!(
            cache_outcome(&headers),
            ("miss".to_string(), "transient".to_string())
        );
    }
}
