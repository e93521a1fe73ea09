//! `application/problem+json` bodies.
//!
//! Handlers return [`ApiError`](crate::error::ApiError), which renders a
//! provisional body and attaches a [`ProblemDraft`] to the response. The
//! correlation middleware re-renders the draft with the request path and
//! correlation id, neither of which a handler has to know about.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use keel_core::error::FieldViolation;
use serde::Serialize;

pub const PROBLEM_JSON: &str = "application/problem+json";
const PROBLEM_TYPE_BASE: &str = "https://keel.dev/problems/";

/// Everything about a failure except where it happened.
#[derive(Debug, Clone)]
pub struct ProblemDraft {
    pub status: StatusCode,
    pub code: &'static str,
    pub title: &'static str,
    pub detail: String,
    pub errors: Vec<FieldViolation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldViolation>,
}

impl ProblemDraft {
    pub fn new(status: StatusCode, code: &'static str, title: &'static str) -> Self {
        Self {
            status,
            code,
            title,
            detail: title.to_string(),
            errors: Vec::new(),
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn errors(mut self, errors: Vec<FieldViolation>) -> Self {
        self.errors = errors;
        self
    }

    pub fn to_problem(&self, instance: Option<&str>, correlation_id: Option<&str>) -> Problem {
        Problem {
            problem_type: format!("{PROBLEM_TYPE_BASE}{}", self.code),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail.clone(),
            instance: instance.map(str::to_owned),
            correlation_id: correlation_id.map(str::to_owned),
            timestamp: Utc::now(),
            errors: self.errors.clone(),
        }
    }

    pub fn render(&self, instance: Option<&str>, correlation_id: Option<&str>) -> Response {
        let body = match serde_json::to_vec(&self.to_problem(instance, correlation_id)) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize problem body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        let mut response = (self.status, body).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        response
    }
}

impl IntoResponse for ProblemDraft {
    fn into_response(self) -> Response {
        let mut response = self.render(None, None);
        response.extensions_mut().insert(self);
        response
    }
}
