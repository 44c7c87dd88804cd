use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use metrics_util::debugging::DebuggingRecorder;
use pagecache::{
    application::content::ContentService,
    cache::{BackendChoice, CacheConfig, CacheRuntime},
    host::EventDispatcher,
    infra::http::{AdminState, HttpState, build_admin_router, build_router},
    site::Site,
};
use tower::ServiceExt;

const SITE: &str = r#"
[[entities]]
id = "6a1f9a52-3a0f-4c55-9f43-0d3b1f0a7d10"
kind = "post"
slug = "hello"
title = "Hello"
status = "published"

[[entities]]
kind = "page"
slug = "about"
title = "About"
status = "published"
"#;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let site = Arc::new(Site::from_toml_str(SITE).expect("site"));
    let dispatcher = Arc::new(EventDispatcher::new());
    let config = CacheConfig {
        backend: BackendChoice::Transient,
        transient_capacity: 1,
        ..Default::default()
    };
    let cache = Arc::new(CacheRuntime::new(config, site.clone(), &dispatcher));
    let public = build_router(HttpState {
        site: site.clone(),
        cache: Some(cache.state()),
    });
    let admin = build_admin_router(AdminState {
        cache,
        content: Arc::new(ContentService::new(site, dispatcher)),
    });

    for uri in ["/hello", "/about", "/about"] {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let response = public
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/admin/entities/6a1f9a52-3a0f-4c55-9f43-0d3b1f0a7d10")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"kind":"post","slug":"hello","title":"Hello v2","status":"published"}"#,
        ))
        .expect("request should build");
    let response = admin.oneshot(request).await.expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "pagecache_hit_total",
        "pagecache_miss_total",
        "pagecache_store_total",
        "pagecache_evict_total",
        "pagecache_event_queue_len",
        "pagecache_invalidate_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
