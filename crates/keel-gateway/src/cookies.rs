//! Credential cookies.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use keel_auth::{AuthConfig, SessionTokens};
use time::Duration;

use crate::config::GatewayConfig;

pub const ACCESS_COOKIE: &str = "access";
pub const REFRESH_COOKIE: &str = "refresh";

/// How the access and refresh cookies are scoped and how long they live.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    secure: bool,
    refresh_path: String,
    access_max_age: Duration,
    refresh_max_age: Duration,
}

impl CookiePolicy {
    pub fn new(gateway: &GatewayConfig, auth: &AuthConfig) -> Self {
        Self {
            secure: gateway.secure_cookies,
            refresh_path: gateway.refresh_cookie_path.clone(),
            access_max_age: seconds(auth.access_token_lifetime_secs),
            refresh_max_age: seconds(auth.refresh_token_lifetime_secs),
        }
    }

    pub fn issue(&self, jar: CookieJar, tokens: &SessionTokens) -> CookieJar {
        jar.add(self.cookie(
            ACCESS_COOKIE,
            tokens.access_token.clone(),
            "/".into(),
            self.access_max_age,
        ))
        .add(self.cookie(
            REFRESH_COOKIE,
            tokens.refresh_token.clone(),
            self.refresh_path.clone(),
            self.refresh_max_age,
        ))
    }

    /// Overwrites both cookies with empty, already-expired values.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.cookie(ACCESS_COOKIE, String::new(), "/".into(), Duration::ZERO))
            .add(self.cookie(
                REFRESH_COOKIE,
                String::new(),
                self.refresh_path.clone(),
                Duration::ZERO,
            ))
    }

    fn cookie(
        &self,
        name: &'static str,
        value: String,
        path: String,
        max_age: Duration,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .path(path)
            .max_age(max_age)
            .build()
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}
