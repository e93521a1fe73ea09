//! Input rules for identity fields.
//!
//! Each rule returns `Err(message)` for a bad value; [`Violations`]
//! collects them so a caller can report every bad field at once.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FieldViolation, KeelError, KeelResult};

pub const DISPLAY_NAME_MAX_CHARS: usize = 100;
pub const PASSWORD_MAX_CHARS: usize = 128;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{3,20}$").expect("username pattern"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone pattern"));
static MESSENGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@?[a-zA-Z0-9_]{5,32}$").expect("messenger pattern"));

pub fn username(value: &str) -> Result<(), String> {
    if USERNAME_RE.is_match(value) {
        Ok(())
    } else {
        Err("must be 3-20 characters of letters, digits, '_' or '-'".into())
    }
}

pub fn display_name(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("must not be blank".into());
    }
    if value.chars().count() > DISPLAY_NAME_MAX_CHARS {
        return Err(format!("must be at most {DISPLAY_NAME_MAX_CHARS} characters"));
    }
    Ok(())
}

pub fn phone(value: &str) -> Result<(), String> {
    if PHONE_RE.is_match(value) {
        Ok(())
    } else {
        Err("must be an international phone number".into())
    }
}

pub fn messenger_handle(value: &str) -> Result<(), String> {
    if MESSENGER_RE.is_match(value) {
        Ok(())
    } else {
        Err("must be 5-32 characters of letters, digits or '_', optionally prefixed with '@'".into())
    }
}

pub fn password(value: &str, min_chars: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min_chars {
        return Err(format!("must be at least {min_chars} characters"));
    }
    if len > PASSWORD_MAX_CHARS {
        return Err(format!("must be at most {PASSWORD_MAX_CHARS} characters"));
    }
    Ok(())
}

/// Accumulates field failures.
#[derive(Debug, Default)]
pub struct Violations(Vec<FieldViolation>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, field: &str, outcome: Result<(), String>) -> &mut Self {
        if let Err(message) = outcome {
            self.0.push(FieldViolation::new(field, message));
        }
        self
    }

    /// Like [`check`](Self::check) but skips absent optional values.
    pub fn check_optional(
        &mut self,
        field: &str,
        value: Option<&str>,
        rule: fn(&str) -> Result<(), String>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.check(field, rule(value));
        }
        self
    }

    pub fn into_result(self) -> KeelResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(KeelError::invalid_fields(self.0))
        }
    }
}
