//! Static prefix table mapping inbound paths to logical backend services.

use std::collections::HashSet;

use keel_core::error::{KeelError, KeelResult};

/// One row of the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: String,
    pub service: String,
    /// Anonymous callers may reach the backend.
    pub public: bool,
}

impl RouteEntry {
    pub fn new(prefix: impl Into<String>, service: impl Into<String>, public: bool) -> Self {
        Self {
            prefix: prefix.into(),
            service: service.into(),
            public,
        }
    }

    /// Parses `prefix=service` or `prefix=service:public`.
    pub fn parse(raw: &str) -> KeelResult<Self> {
        let (prefix, target) = raw
            .split_once('=')
            .ok_or_else(|| KeelError::Config(format!("route `{raw}` is not prefix=service")))?;
        let (service, public) = match target.trim().split_once(':') {
            Some((service, "public")) => (service, true),
            Some((_, flag)) => {
                return Err(KeelError::Config(format!(
                    "route `{raw}` has unknown flag `{flag}`"
                )));
            }
            None => (target.trim(), false),
        };
        Ok(Self::new(prefix.trim(), service.trim(), public))
    }

    fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// The routes served by the platform's backends out of the box.
pub fn default_routes() -> Vec<RouteEntry> {
    [
        ("/api/users", "user-service", false),
        ("/api/crews", "crew-service", false),
        ("/api/boats", "crew-service", false),
        ("/api/tents", "crew-service", false),
        ("/api/events", "event-service", true),
        ("/api/bookings", "event-service", false),
        ("/api/payments", "payment-service", false),
        ("/api/notifications", "notification-service", false),
        ("/api/media", "media-service", false),
    ]
    .into_iter()
    .map(|(prefix, service, public)| RouteEntry::new(prefix, service, public))
    .collect()
}

/// Longest-prefix lookup over a validated set of routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Rejects prefixes that are relative, empty, or defined twice.
    /// Trailing slashes are dropped so `/api/users/` and `/api/users` collide.
    pub fn new(entries: Vec<RouteEntry>) -> KeelResult<Self> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if !entry.prefix.starts_with('/') {
                return Err(KeelError::Config(format!(
                    "route prefix `{}` must start with '/'",
                    entry.prefix
                )));
            }
            if entry.service.is_empty() {
                return Err(KeelError::Config(format!(
                    "route prefix `{}` has no service",
                    entry.prefix
                )));
            }
            let trimmed = entry.prefix.trim_end_matches('/');
            entry.prefix = if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            };
            if !seen.insert(entry.prefix.clone()) {
                return Err(KeelError::Config(format!(
                    "route prefix `{}` is defined twice",
                    entry.prefix
                )));
            }
            normalized.push(entry);
        }
        normalized.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self {
            entries: normalized,
        })
    }

    pub fn resolve(&self, path: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|entry| entry.matches(path))
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}
