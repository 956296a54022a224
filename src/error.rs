//! Error types and JSON error responses

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or running the frontend handler
#[derive(Debug, Error)]
pub enum FrontendError {
    /// The dev server command could not be split into words
    #[error("malformed command {command:?}: {reason}")]
    MalformedCommand { command: String, reason: String },

    /// The dev server exited or failed before printing its URL
    #[error("dev server did not start: {0}")]
    DevServerDidNotStart(String),

    /// The dev server kept running but never printed its URL
    #[error("dev server did not report a URL within {} seconds", .0.as_secs_f64())]
    DevServerTimeout(Duration),

    /// The ready line matched the URL pattern but is not a valid URL
    #[error("malformed dev server URL {url:?}: {source}")]
    MalformedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Neither the requested path nor the fallback shell exists
    #[error("asset not found: {path} (fallback {fallback} is missing)")]
    AssetNotFound { path: String, fallback: String },

    /// Release mode was selected without an asset store
    #[error("release mode requires an asset store")]
    MissingAssetStore,

    /// Release mode with no build output folder would serve the project root
    #[error("release mode requires a dist folder (none configured or known for {0})")]
    MissingDistFolder(String),

    /// No package.json in the frontend folder
    #[error("package.json is not found under '{}' folder", .0.display())]
    PackageJsonNotFound(PathBuf),

    /// package.json exists but could not be read or parsed
    #[error("invalid package.json at '{}': {reason}", .path.display())]
    InvalidPackageJson { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrontendError {
    /// Map this error to the code reported to HTTP clients
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrontendError::AssetNotFound { .. } => ErrorCode::SpaShellMissing,
            FrontendError::DevServerTimeout(_) => ErrorCode::RequestTimeout,
            _ => ErrorCode::InternalError,
        }
    }
}

/// Error codes reported in JSON error bodies and the `X-Spagate-Error` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The fallback document (usually index.html) is missing from the asset store
    SpaShellMissing,
    /// Could not reach the dev server
    ConnectionFailed,
    /// The dev server did not answer in time
    RequestTimeout,
    /// Anything else
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::SpaShellMissing => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ConnectionFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_header_value(&self) -> &'static str {
        match self {
            ErrorCode::SpaShellMissing => "SPA_SHELL_MISSING",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with the X-Spagate-Error header
pub fn json_error_response(
    code: ErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    Response::builder()
        .status(code.status_code())
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header("X-Spagate-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
