//! # OData Errors
//!
//! Error type shared by every request path. All failures end up in the
//! server's error sink, which renders the canonical OData error envelope.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Result type for OData operations
pub type ODataResult<T> = Result<T, ODataError>;

/// OData protocol errors
#[derive(Debug, Clone, Error)]
pub enum ODataError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// No route accepted the request path
    #[error("Not Found")]
    NotFound,

    /// Path names an entity set the model does not declare
    #[error("Entity set not Found: {0}")]
    EntitySetNotFound(String),

    /// Malformed batch boundary or framing
    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// Query option that cannot be parsed
    #[error("Invalid query option: {0}")]
    InvalidQuery(String),

    /// Request body is not valid JSON
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// Request body exceeded the buffering cap
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    // ==================
    // Extension Errors
    // ==================
    /// A before-hook vetoed the operation
    #[error("{message}")]
    HookRejected { code: Option<u16>, message: String },

    /// The storage adapter reported a failure
    #[error("{message}")]
    Adapter { code: Option<u16>, message: String },

    /// Adapter operation was never registered
    #[error("Adapter operation not implemented: {0}")]
    NotImplemented(&'static str),

    // ==================
    // Server Errors (5xx)
    // ==================
    /// Service URL could not be configured or derived
    #[error("Unable to determine service URL: {0}")]
    ServiceUrl(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ODataError {
    /// Hook rejection carrying an optional HTTP-like code
    pub fn hook(code: impl Into<Option<u16>>, message: impl Into<String>) -> Self {
        ODataError::HookRejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Adapter failure carrying an optional HTTP-like code
    pub fn adapter(code: impl Into<Option<u16>>, message: impl Into<String>) -> Self {
        ODataError::Adapter {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Numeric code written into the error envelope
    pub fn code(&self) -> u16 {
        match self {
            ODataError::NotFound | ODataError::EntitySetNotFound(_) => 404,
            ODataError::BadRequest(_)
            | ODataError::InvalidQuery(_)
            | ODataError::InvalidBody(_) => 400,
            ODataError::PayloadTooLarge(_) => 413,
            ODataError::NotImplemented(_) => 501,
            ODataError::HookRejected { code, .. } | ODataError::Adapter { code, .. } => {
                code.unwrap_or(500)
            }
            ODataError::ServiceUrl(_) | ODataError::Internal(_) => 500,
        }
    }

    /// Get HTTP status code for this error
    ///
    /// Codes outside `[100, 600)` collapse to 500.
    pub fn status_code(&self) -> StatusCode {
        let code = self.code();
        if (100..600).contains(&code) {
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// Build the canonical envelope for a request path
    pub fn envelope(&self, target: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
                stack: format!("{:?}", self),
                target: target.to_string(),
                details: Vec::new(),
            },
            innererror: json!({}),
        }
    }
}

impl From<serde_json::Error> for ODataError {
    fn from(e: serde_json::Error) -> Self {
        ODataError::InvalidBody(e.to_string())
    }
}

/// `{ error: {...}, innererror: {} }`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub innererror: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub stack: String,
    pub target: String,
    pub details: Vec<Value>,
}

impl IntoResponse for ODataError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.envelope(""))).into_response();
        response
            .headers_mut()
            .insert("OData-Version", HeaderValue::from_static("4.0"));
        if matches!(self, ODataError::PayloadTooLarge(_)) {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}
