//! Prefix-routed forwarding to backend services.
//!
//! Method, path, query and body travel unchanged. Hop-by-hop headers are
//! dropped in both directions, and identity headers are only ever set
//! from verified claims.

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, header};
use axum::response::Response;
use url::Url;

use crate::error::ApiError;
use crate::middleware::Authentication;
use crate::state::GatewayState;

pub static USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");
pub static USER_ROLE_HEADER: HeaderName = HeaderName::from_static("x-user-role");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Removes hop-by-hop headers, including any the `Connection` header names.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Joins the backend base URL with the inbound path and query.
fn target_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query);
    url
}

/// Fallback handler: everything that is not an auth endpoint goes here.
pub async fn forward(State(state): State<GatewayState>, request: Request) -> Result<Response, ApiError> {
    let path = request.uri().path().to_owned();
    let route = state
        .routes
        .resolve(&path)
        .ok_or_else(|| ApiError::NoRoute(path.clone()))?
        .clone();

    let auth = request
        .extensions()
        .get::<Authentication>()
        .cloned()
        .unwrap_or(Authentication::Anonymous);
    if !route.public {
        auth.require()?;
    }

    let base = state
        .locator
        .resolve(&route.service)
        .ok_or_else(|| ApiError::ServiceUnresolved(route.service.clone()))?;
    let url = target_url(&base, &path, request.uri().query());

    let (parts, body) = request.into_parts();
    let limit = state.config.max_body_bytes;
    let body = to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::PayloadTooLarge(limit))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(&USER_ID_HEADER);
    headers.remove(&USER_ROLE_HEADER);
    if let Some(claims) = auth.claims() {
        if let Ok(value) = claims.sub.parse() {
            headers.insert(USER_ID_HEADER.clone(), value);
        }
        if let Ok(value) = claims.role.as_str().parse() {
            headers.insert(USER_ROLE_HEADER.clone(), value);
        }
    }

    tracing::debug!(service = %route.service, method = %parts.method, %url, "forwarding");
    let upstream = state
        .http
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| upstream_error(&route.service, e))?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);
    response_headers.remove(header::CONTENT_LENGTH);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| upstream_error(&route.service, e))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn upstream_error(service: &str, err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::UpstreamTimeout(service.to_string())
    } else {
        ApiError::Upstream {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn joins_base_path_and_query() {
        let base = Url::parse("http://users.internal:8081/v2/").unwrap();
        let url = target_url(&base, "/api/users/42", Some("expand=crew"));
        assert_eq!(url.as_str(), "http://users.internal:8081/v2/api/users/42?expand=crew");

        let bare = Url::parse("http://users.internal:8081").unwrap();
        assert_eq!(
            target_url(&bare, "/api/users", None).as_str(),
            "http://users.internal:8081/api/users"
        );
    }

    #[test]
    fn strips_hop_by_hop_and_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }
}
