//! Logical service name to base URL resolution.

use std::collections::HashMap;

use url::Url;

/// Resolves a logical backend name to the base URL requests are sent to.
///
/// Load balancing and health-aware selection belong behind this trait;
/// the gateway only asks for one address per request and never retries.
pub trait ServiceLocator: Send + Sync + 'static {
    fn resolve(&self, service: &str) -> Option<Url>;
}

/// Fixed name to URL map, usually loaded from `KEEL_SERVICES`.
#[derive(Debug, Clone, Default)]
pub struct StaticServiceLocator {
    services: HashMap<String, Url>,
}

impl StaticServiceLocator {
    pub fn new(services: HashMap<String, Url>) -> Self {
        Self { services }
    }
}

impl ServiceLocator for StaticServiceLocator {
    fn resolve(&self, service: &str) -> Option<Url> {
        self.services.get(service).cloned()
    }
}
