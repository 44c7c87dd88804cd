//! Cache eligibility rules.
//!
//! A request is classified once into a [`RequestContext`]; the
//! [`CachePolicy`] then decides whether it may touch the cache at all and,
//! after the handler ran, whether its response may be stored.

use std::fmt;

use axum::http::{HeaderMap, Method, StatusCode, Uri, header};

use super::config::CacheConfig;

/// Response extension set by handlers that rendered in a control context
/// (previews, administrative redirects). Such responses are never stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlContext;

/// What the cache needs to know about an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub authenticated: bool,
    pub control_context: bool,
    pub api_channel: bool,
}

impl RequestContext {
    /// Anonymous GET of `path` outside any control or API channel.
    pub fn anonymous_get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            authenticated: false,
            control_context: false,
            api_channel: false,
        }
    }
}

/// Why a request bypasses the cache entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ControlContext,
    Method,
    ApiChannel,
    Authenticated,
    StaticAsset,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::ControlContext => "control_context",
            SkipReason::Method => "method",
            SkipReason::ApiChannel => "api_channel",
            SkipReason::Authenticated => "authenticated",
            SkipReason::StaticAsset => "static_asset",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a captured response was served without being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Empty,
    Status(StatusCode),
    SetsCookie,
    EventStream,
    NotHtml,
    ControlContext,
    TooLarge,
    Cooldown,
    StoreFailed,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Empty => "empty",
            DiscardReason::Status(_) => "status",
            DiscardReason::SetsCookie => "sets_cookie",
            DiscardReason::EventStream => "event_stream",
            DiscardReason::NotHtml => "not_html",
            DiscardReason::ControlContext => "control_context",
            DiscardReason::TooLarge => "too_large",
            DiscardReason::Cooldown => "cooldown",
            DiscardReason::StoreFailed => "store_failed",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::Status(status) => write!(f, "status {}", status.as_u16()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Turns raw request parts into a [`RequestContext`].
///
/// Hosts with their own notion of sessions or control surfaces can supply
/// an implementation; [`PrefixClassifier`] covers path and cookie rules.
pub trait RequestClassifier: Send + Sync {
    fn classify(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> RequestContext;
}

/// Classifies by path prefixes, cookie names and headers.
#[derive(Debug, Clone)]
pub struct PrefixClassifier {
    control_prefixes: Vec<String>,
    api_prefixes: Vec<String>,
    auth_cookie_prefixes: Vec<String>,
}

impl PrefixClassifier {
    pub fn new(
        control_prefixes: Vec<String>,
        api_prefixes: Vec<String>,
        auth_cookie_prefixes: Vec<String>,
    ) -> Self {
        Self {
            control_prefixes,
            api_prefixes,
            auth_cookie_prefixes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.control_prefixes.clone(),
            config.api_prefixes.clone(),
            config.auth_cookie_prefixes.clone(),
        )
    }

    fn has_auth_cookie(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.split('=').next())
            .map(str::trim)
            .any(|name| {
                self.auth_cookie_prefixes
                    .iter()
                    .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
            })
    }
}

impl RequestClassifier for PrefixClassifier {
    fn classify(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> RequestContext {
        let path = uri.path();
        let ajax = headers
            .get("x-requested-with")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("xmlhttprequest"));

        RequestContext {
            method: method.clone(),
            path: path.to_string(),
            authenticated: headers.contains_key(header::AUTHORIZATION) || self.has_auth_cookie(headers),
            control_context: matches_any_prefix(path, &self.control_prefixes),
            api_channel: ajax || matches_any_prefix(path, &self.api_prefixes),
        }
    }
}

/// Prefix match on whole segments: `/admin` covers `/admin` and
/// `/admin/x` but not `/administrator`.
fn matches_any_prefix(path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return false;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    })
}

/// Request and response eligibility.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    enabled: bool,
    asset_extensions: Vec<String>,
    max_body_bytes: usize,
}

impl CachePolicy {
    pub fn new(enabled: bool, asset_extensions: Vec<String>, max_body_bytes: usize) -> Self {
        Self {
            enabled,
            asset_extensions: asset_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_body_bytes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.enabled,
            config.asset_extensions.clone(),
            config.max_body_bytes,
        )
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// First rule that keeps this request away from the cache, if any.
    pub fn skip_reason(&self, request: &RequestContext) -> Option<SkipReason> {
        if !self.enabled {
            Some(SkipReason::Disabled)
        } else if request.control_context {
            Some(SkipReason::ControlContext)
        } else if request.method != Method::GET {
            Some(SkipReason::Method)
        } else if request.api_channel {
            Some(SkipReason::ApiChannel)
        } else if request.authenticated {
            Some(SkipReason::Authenticated)
        } else if self.is_static_asset(&request.path) {
            Some(SkipReason::StaticAsset)
        } else {
            None
        }
    }

    fn is_static_asset(&self, path: &str) -> bool {
        let last = path.rsplit('/').next().unwrap_or_default();
        match last.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.asset_extensions.iter().any(|allowed| *allowed == ext)
            }
            _ => false,
        }
    }

    /// Late check on the produced response head. A rejected response is
    /// streamed through without being buffered.
    pub fn response_rejection(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        control_context: bool,
    ) -> Option<DiscardReason> {
        if status != StatusCode::OK {
            return Some(DiscardReason::Status(status));
        }
        if control_context {
            return Some(DiscardReason::ControlContext);
        }
        if headers.contains_key(header::SET_COOKIE) {
            return Some(DiscardReason::SetsCookie);
        }
        if headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .is_some_and(|length| length > self.max_body_bytes as u64)
        {
            return Some(DiscardReason::TooLarge);
        }
        if let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            let content_type = content_type.to_ascii_lowercase();
            if content_type.starts_with("text/event-stream") {
                return Some(DiscardReason::EventStream);
            }
            if !content_type.starts_with("text/html") {
                return Some(DiscardReason::NotHtml);
            }
        }
        None
    }

    /// Check on the buffered body size.
    pub fn body_rejection(&self, body_len: usize) -> Option<DiscardReason> {
        (body_len > self.max_body_bytes).then_some(DiscardReason::TooLarge)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn classifier() -> PrefixClassifier {
        PrefixClassifier::from_config(&CacheConfig::default())
    }

    fn policy() -> CachePolicy {
        CachePolicy::from_config(&CacheConfig::default())
    }

    fn classify(method: Method, uri: &str, headers: &[(&'static str, &'static str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(value));
        }
        classifier().classify(&method, &uri.parse().expect("uri"), &map)
    }

    #[test]
    fn anonymous_get_is_eligible() {
        let request = classify(Method::GET, "/posts/hello?x=1", &[]);
        assert_eq!(request, RequestContext::anonymous_get("/posts/hello"));
        assert_eq!(policy().skip_reason(&request), None);
    }

    #[test]
    fn non_get_is_skipped() {
        let request = classify(Method::POST, "/posts/hello", &[]);
        assert_eq!(policy().skip_reason(&request), Some(SkipReason::Method));
    }

    #[test]
    fn control_prefixes_match_whole_segments() {
        assert!(classify(Method::GET, "/wp-admin/edit.php", &[]).control_context);
        assert!(classify(Method::GET, "/admin", &[]).control_context);
        assert!(classify(Method::GET, "/wp-login.php", &[]).control_context);
        assert!(!classify(Method::GET, "/administrator", &[]).control_context);
    }

    #[test]
    fn api_channel_by_prefix_or_ajax_header() {
        assert!(classify(Method::GET, "/wp-json/wp/v2/posts", &[]).api_channel);
        assert!(classify(Method::GET, "/page", &[("x-requested-with", "XMLHttpRequest")]).api_channel);
        assert_eq!(
            policy().skip_reason(&classify(Method::GET, "/api/x", &[])),
            Some(SkipReason::ApiChannel)
        );
    }

    #[test]
    fn auth_cookie_or_header_marks_authenticated() {
        let request = classify(
            Method::GET,
            "/",
            &[("cookie", "theme=dark; wordpress_logged_in_abc=1")],
        );
        assert!(request.authenticated);
        assert_eq!(policy().skip_reason(&request), Some(SkipReason::Authenticated));

        assert!(classify(Method::GET, "/", &[("authorization", "Bearer x")]).authenticated);
        assert!(!classify(Method::GET, "/", &[("cookie", "theme=dark")]).authenticated);
    }

    #[test]
    fn asset_suffixes_are_skipped() {
        let policy = policy();
        for path in ["/logo.PNG", "/assets/app.js", "/fonts/a.woff2", "/favicon.ico"] {
            assert_eq!(
                policy.skip_reason(&RequestContext::anonymous_get(path)),
                Some(SkipReason::StaticAsset),
                "{path}"
            );
        }
        for path in ["/", "/posts/hello", "/release.notes", "/.css"] {
            assert_eq!(policy.skip_reason(&RequestContext::anonymous_get(path)), None, "{path}");
        }
    }

    #[test]
    fn disabled_policy_skips_everything() {
        let policy = CachePolicy::new(false, vec![], 1024);
        assert_eq!(
            policy.skip_reason(&RequestContext::anonymous_get("/")),
            Some(SkipReason::Disabled)
        );
    }

    #[test]
    fn response_rejections() {
        let policy = CachePolicy::new(true, vec![], 8);
        let html = {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            headers
        };

        assert_eq!(policy.response_rejection(StatusCode::OK, &html, false), None);
        assert_eq!(policy.response_rejection(StatusCode::OK, &HeaderMap::new(), false), None);
        assert_eq!(
            policy.response_rejection(StatusCode::NOT_FOUND, &html, false),
            Some(DiscardReason::Status(StatusCode::NOT_FOUND))
        );
        assert_eq!(
            policy.response_rejection(StatusCode::OK, &html, true),
            Some(DiscardReason::ControlContext)
        );
        assert_eq!(policy.body_rejection(8), None);
        assert_eq!(policy.body_rejection(9), Some(DiscardReason::TooLarge));

        let mut declared = html.clone();
        declared.insert(header::CONTENT_LENGTH, HeaderValue::from_static("8"));
        assert_eq!(policy.response_rejection(StatusCode::OK, &declared, false), None);
        declared.insert(header::CONTENT_LENGTH, HeaderValue::from_static("9"));
        assert_eq!(
            policy.response_rejection(StatusCode::OK, &declared, false),
            Some(DiscardReason::TooLarge)
        );

        let mut cookie = html.clone();
        cookie.insert(header::SET_COOKIE, HeaderValue::from_static("a=b"));
        assert_eq!(
            policy.response_rejection(StatusCode::OK, &cookie, false),
            Some(DiscardReason::SetsCookie)
        );

        let mut json = HeaderMap::new();
        json.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert_eq!(
            policy.response_rejection(StatusCode::OK, &json, false),
            Some(DiscardReason::NotHtml)
        );

        let mut sse = HeaderMap::new();
        sse.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        assert_eq!(
            policy.response_rejection(StatusCode::OK, &sse, false),
            Some(DiscardReason::EventStream)
        );
    }
}
