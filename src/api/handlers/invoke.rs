//! Invocation proxy: forwards `/function/{name}` traffic to the URL the
//! resolver picks.

use crate::api::error::ApiError;
use crate::api::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use std::sync::Arc;
use url::Url;

/// Headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Extend a resolved base URL with an invocation sub-path and query.
fn build_target_url(mut base: Url, subpath: Option<&str>, query: Option<&str>) -> Url {
    if let Some(subpath) = subpath {
        let mut path = base.path().trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(subpath.trim_start_matches('/'));
        base.set_path(&path);
    }
    base.set_query(query);
    base
}

/// Invoke a function at its root path.
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    proxy_invoke(&state, &name, None, query, method, headers, body).await
}

/// Invoke a function at a sub-path.
pub async fn invoke_subpath(
    State(state): State<Arc<AppState>>,
    Path((name, subpath)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    proxy_invoke(&state, &name, Some(subpath), query, method, headers, body).await
}

async fn proxy_invoke(
    state: &AppState,
    name: &str,
    subpath: Option<String>,
    query: Option<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let base = state.resolver.resolve(name).await.map_err(ApiError::invoke)?;
    let target = build_target_url(base, subpath.as_deref(), query.as_deref());
    tracing::debug!(function = %name, target = %target, "forwarding invocation");

    let mut request = state.http.request(method, target).body(body);
    for (header, value) in headers.iter() {
        if !is_hop_by_hop(header) {
            request = request.header(header, value);
        }
    }

    let upstream = request
        .send()
        .await
        .map_err(|e| ApiError::Internal(format!("invoke failed: {}", e)))?;

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| ApiError::Internal(format!("invoke read failed: {}", e)))?;

    let mut builder = Response::builder().status(status);
    for (header, value) in upstream_headers.iter() {
        if !is_hop_by_hop(header) {
            builder = builder.header(header, value);
        }
    }
    builder
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(format!("invoke response failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_provider;
    use super::*;

    #[test]
    fn target_url_appends_subpath_and_query() {
        let base = Url::parse("http://10.63.0.2:8123/").unwrap();
        let url = build_target_url(base, Some("v1/items"), Some("limit=5"));
        assert_eq!(url.as_str(), "http://10.63.0.2:8123/v1/items?limit=5");

        let gateway = Url::parse("http://localhost/api/echo").unwrap();
        let url = build_target_url(gateway, Some("/v1"), None);
        assert_eq!(url.as_str(), "http://localhost/api/echo/v1");

        let bare = Url::parse("http://10.63.0.2:8123/").unwrap();
        assert_eq!(
            build_target_url(bare, None, None).as_str(),
            "http://10.63.0.2:8123/"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(is_hop_by_hop(&HeaderName::from_static("host")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
    }

    #[tokio::test]
    async fn invoking_unknown_function_is_404() {
        let provider = test_provider();
        let err = invoke(
            State(provider.state.clone()),
            Path("ghost".to_string()),
            RawQuery(None),
            Method::GET,
            HeaderMap::new(),
            Bytes::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
