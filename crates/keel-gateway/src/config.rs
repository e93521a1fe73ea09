//! Gateway configuration.

use std::collections::HashMap;
use std::net::SocketAddr;

use keel_core::error::{KeelError, KeelResult};
use url::Url;

use crate::routes::{RouteEntry, default_routes};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub routes: Vec<RouteEntry>,
    pub services: HashMap<String, Url>,
    pub upstream_timeout_ms: u64,
    /// Largest request body the gateway will buffer and forward.
    pub max_body_bytes: usize,
    /// Off only for plain-HTTP local development.
    pub secure_cookies: bool,
    /// Path the refresh cookie is scoped to. Must cover refresh and logout.
    pub refresh_cookie_path: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            routes: default_routes(),
            services: HashMap::new(),
            upstream_timeout_ms: 30_000,
            max_body_bytes: 2 * 1024 * 1024,
            secure_cookies: true,
            refresh_cookie_path: "/auth".into(),
        }
    }
}

impl GatewayConfig {
    /// Reads `KEEL_LISTEN_ADDR`, `KEEL_ROUTES`, `KEEL_SERVICES`,
    /// `KEEL_UPSTREAM_TIMEOUT_MS`, `KEEL_MAX_BODY_BYTES`,
    /// `KEEL_SECURE_COOKIES` and `KEEL_REFRESH_COOKIE_PATH`.
    pub fn from_env() -> KeelResult<Self> {
        let defaults = Self::default();
        let routes = match std::env::var("KEEL_ROUTES") {
            Ok(raw) => parse_routes(&raw)?,
            Err(_) => defaults.routes,
        };
        let services = match std::env::var("KEEL_SERVICES") {
            Ok(raw) => parse_services(&raw)?,
            Err(_) => defaults.services,
        };
        Ok(Self {
            listen_addr: parsed_var("KEEL_LISTEN_ADDR")?.unwrap_or(defaults.listen_addr),
            routes,
            services,
            upstream_timeout_ms: parsed_var("KEEL_UPSTREAM_TIMEOUT_MS")?
                .unwrap_or(defaults.upstream_timeout_ms),
            max_body_bytes: parsed_var("KEEL_MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes),
            secure_cookies: parsed_var("KEEL_SECURE_COOKIES")?.unwrap_or(defaults.secure_cookies),
            refresh_cookie_path: std::env::var("KEEL_REFRESH_COOKIE_PATH")
                .unwrap_or(defaults.refresh_cookie_path),
        })
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> KeelResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| KeelError::Config(format!("{name} has an invalid value `{raw}`"))),
        Err(_) => Ok(None),
    }
}

/// Comma-separated `prefix=service[:public]` entries.
pub fn parse_routes(raw: &str) -> KeelResult<Vec<RouteEntry>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RouteEntry::parse)
        .collect()
}

/// Comma-separated `service=url` entries.
pub fn parse_services(raw: &str) -> KeelResult<HashMap<String, Url>> {
    let mut services = HashMap::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, raw_url) = item
            .split_once('=')
            .ok_or_else(|| KeelError::Config(format!("service `{item}` is not name=url")))?;
        let url = Url::parse(raw_url.trim())
            .map_err(|e| KeelError::Config(format!("service `{name}` url: {e}")))?;
        services.insert(name.trim().to_string(), url);
    }
    Ok(services)
}
