//! Page cache middleware.
//!
//! Drives one [`CaptureSession`] per request: serves stored pages, buffers
//! eligible misses and stores them once the handler has finished.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use http_body_util::BodyExt;
use tracing::{debug, instrument, warn};

use super::capture::{CaptureSession, Decision};
use super::cooldown::WriteCooldown;
use super::policy::{CachePolicy, ControlContext, DiscardReason, RequestClassifier};
use super::selector::ActiveBackend;

/// Observability header naming the cache outcome and backend.
pub const CACHE_HEADER: &str = "x-cache";

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub backend: ActiveBackend,
    pub policy: Arc<CachePolicy>,
    pub classifier: Arc<dyn RequestClassifier>,
    pub cooldown: WriteCooldown,
}

/// Middleware for whole-page caching.
///
/// Only anonymous GET requests outside control and API paths are eligible.
/// Anything that goes wrong in the cache degrades to serving the handler's
/// response directly.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let context = cache
        .classifier
        .classify(request.method(), request.uri(), request.headers());

    let mut session = CaptureSession::new(cache.backend.store.clone(), cache.policy.clone())
        .with_cooldown(cache.cooldown.clone());

    match session.begin(&context).await {
        Decision::Bypass(_) => return next.run(request).await,
        Decision::Serve(body) => {
            let mut response = (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                Body::from(body),
            )
                .into_response();
            tag(&mut response, &session);
            return response;
        }
        Decision::Capture => {}
    }

    if let Some(rewrite) = &cache.backend.rewrite {
        rewrite.ensure_installed();
    }

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    let control_context = parts.extensions.get::<ControlContext>().is_some();

    if let Some(reason) =
        cache
            .policy
            .response_rejection(parts.status, &parts.headers, control_context)
    {
        session.discard(reason);
        set_header(&mut parts.headers, &session);
        return Response::from_parts(parts, body);
    }

    let bytes = match buffer_up_to(body, cache.policy.max_body_bytes()).await {
        Ok(Buffered::Complete(bytes)) => bytes,
        Ok(Buffered::Overflow { head, rest }) => {
            debug!(buffered = head.len(), "response exceeds the storable size");
            session.discard(DiscardReason::TooLarge);
            set_header(&mut parts.headers, &session);
            let replay = stream::once(async move { Ok::<_, axum::Error>(head) })
                .chain(rest.into_data_stream());
            return Response::from_parts(parts, Body::from_stream(replay));
        }
        Err(err) => {
            warn!(error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let rejection = cache.policy.body_rejection(bytes.len());
    session.finish(&bytes, rejection).await;

    set_header(&mut parts.headers, &session);
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}

enum Buffered {
    Complete(Bytes),
    /// The limit was crossed; `head` holds what was read so far.
    Overflow { head: Bytes, rest: Body },
}

/// Collect `body` while it stays within `limit` bytes. Trailers are dropped.
async fn buffer_up_to(mut body: Body, limit: usize) -> Result<Buffered, axum::Error> {
    let mut buffered = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let Ok(data) = frame?.into_data() else {
            continue;
        };
        buffered.extend_from_slice(&data);
        if buffered.len() > limit {
            return Ok(Buffered::Overflow {
                head: buffered.freeze(),
                rest: body,
            });
        }
    }
    Ok(Buffered::Complete(buffered.freeze()))
}

fn tag(response: &mut Response, session: &CaptureSession) {
    set_header(response.headers_mut(), session);
}

fn set_header(headers: &mut axum::http::HeaderMap, session: &CaptureSession) {
    if let Some(value) = session
        .cache_header()
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        headers.insert(CACHE_HEADER, value);
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::Ordering;

    use axum::{Router, middleware, response::Html, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::cache::capture::tests::RecordingBackend;
    use crate::cache::config::CacheConfig;
    use crate::cache::policy::PrefixClassifier;
    use crate::cache::selector::BackendKind;
    use crate::cache::transient::TransientStore;

    fn state(backend: Arc<RecordingBackend>) -> CacheState {
        state_with_limit(backend, CacheConfig::default().max_body_bytes)
    }

    fn state_with_limit(backend: Arc<RecordingBackend>, max_body_bytes: usize) -> CacheState {
        let config = CacheConfig {
            max_body_bytes,
            ..Default::default()
        };
        let transient = Arc::new(TransientStore::new(NonZeroUsize::new(8).expect("capacity")));
        CacheState {
            backend: ActiveBackend {
                kind: BackendKind::Transient,
                store: backend,
                rewrite: None,
            },
            policy: Arc::new(CachePolicy::from_config(&config)),
            classifier: Arc::new(PrefixClassifier::from_config(&config)),
            cooldown: WriteCooldown::new(transient, config.write_cooldown()),
        }
    }

    fn app(backend: Arc<RecordingBackend>) -> Router {
        Router::new()
            .route("/", get(|| async { Html("<h1>home</h1>") }))
            .route("/json", get(|| async { axum::Json(serde_json::json!({"ok": true})) }))
            .route(
                "/preview",
                get(|| async {
                    let mut response = Html("<h1>draft</h1>").into_response();
                    response.extensions_mut().insert(ControlContext);
                    response
                }),
            )
            .layer(middleware::from_fn_with_state(
                state(backend),
                response_cache_layer,
            ))
    }

    fn streaming_app(backend: Arc<RecordingBackend>, limit: usize) -> Router {
        Router::new()
            .route(
                "/stream",
                get(|| async {
                    let chunks = (0..8).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; 16])));
                    (
                        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                        Body::from_stream(stream::iter(chunks)),
                    )
                }),
            )
            .route(
                "/declared",
                get(|| async {
                    (
                        [
                            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                            (header::CONTENT_LENGTH, "128"),
                        ],
                        vec![b'y'; 128],
                    )
                }),
            )
            .layer(middleware::from_fn_with_state(
                state_with_limit(backend, limit),
                response_cache_layer,
            ))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn body_text(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn miss_is_stored_then_served() {
        let backend = Arc::new(RecordingBackend::default());
        let app = app(backend.clone());

        let first = app.clone().oneshot(get_request("/")).await.expect("first");
        assert_eq!(first.headers()[CACHE_HEADER], "MISS (recording)");
        assert_eq!(body_text(first).await, "<h1>home</h1>");
        assert!(backend.contains("/"));

        let second = app.oneshot(get_request("/?utm=x")).await.expect("second");
        assert_eq!(second.headers()[CACHE_HEADER], "HIT (recording)");
        assert_eq!(body_text(second).await, "<h1>home</h1>");
        assert_eq!(backend.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skipped_request_has_no_header() {
        let backend = Arc::new(RecordingBackend::default());
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .expect("request");

        let response = app(backend.clone()).oneshot(request).await.expect("response");
        assert!(response.headers().get(CACHE_HEADER).is_none());
        assert_eq!(backend.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_html_and_control_responses_are_not_stored() {
        let backend = Arc::new(RecordingBackend::default());
        let app = app(backend.clone());

        let json = app.clone().oneshot(get_request("/json")).await.expect("json");
        assert_eq!(json.headers()[CACHE_HEADER], "MISS (recording)");
        let preview = app.oneshot(get_request("/preview")).await.expect("preview");
        assert_eq!(body_text(preview).await, "<h1>draft</h1>");

        assert_eq!(backend.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_found_is_not_stored() {
        let backend = Arc::new(RecordingBackend::default());
        let response = app(backend.clone())
            .oneshot(get_request("/missing"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(backend.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_stream_is_served_whole_but_not_stored() {
        let backend = Arc::new(RecordingBackend::default());
        let response = streaming_app(backend.clone(), 40)
            .oneshot(get_request("/stream"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_HEADER], "MISS (recording)");
        assert_eq!(body_text(response).await, "x".repeat(128));
        assert_eq!(backend.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_within_limit_is_stored() {
        let backend = Arc::new(RecordingBackend::default());
        let response = streaming_app(backend.clone(), 1024)
            .oneshot(get_request("/stream"))
            .await
            .expect("response");

        assert_eq!(body_text(response).await.len(), 128);
        assert_eq!(backend.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declared_length_over_limit_skips_buffering() {
        let backend = Arc::new(RecordingBackend::default());
        let response = streaming_app(backend.clone(), 64)
            .oneshot(get_request("/declared"))
            .await
            .expect("response");

        assert_eq!(response.headers()[header::CONTENT_LENGTH], "128");
        assert_eq!(body_text(response).await.len(), 128);
        assert_eq!(backend.puts.load(Ordering::SeqCst), 0);
    }
}
