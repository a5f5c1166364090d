//! Core error taxonomy.
//!
//! `Error` enumerates the kinds of failure the cache, breaker, discovery,
//! balancer, and engine can produce. `CacheMiss` is deliberately not a
//! variant here: a miss is absence, represented as `Option::None` /
//! `Result::Ok(None)`, never as an `Err`.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("value of {0} bytes exceeds the memory budget")]
    AdmissionRefused(usize),

    #[error("disk cache I/O error: {0}")]
    DiskIo(#[from] io::Error),

    #[error("distributed lock \"{0}\" could not be acquired before its deadline")]
    LockTimeout(String),

    #[error("circuit breaker open for provider \"{0}\"")]
    BreakerOpen(String),

    #[error("provider \"{0}\" returned an error: {1}")]
    ProviderError(String, String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("no healthy providers available for model \"{0}\"")]
    NoHealthyProviders(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure should be recorded against the provider's
    /// circuit breaker / discovery error rate (§7 propagation policy).
    pub fn counts_as_provider_failure(&self) -> bool {
        matches!(self, Error::ProviderError(..) | Error::Timeout(_))
    }

    /// Kind label, stable across error message wording changes; used for
    /// `ExecutionAttempt::error` and for boundary status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::AdmissionRefused(_) => "admission_refused",
            Error::DiskIo(_) => "disk_io_error",
            Error::LockTimeout(_) => "lock_timeout",
            Error::BreakerOpen(_) => "breaker_open",
            Error::ProviderError(..) => "provider_error",
            Error::Timeout(_) => "timeout",
            Error::NoHealthyProviders(_) => "no_healthy_providers",
            Error::ConfigInvalid(_) => "config_invalid",
            Error::Json(_) | Error::Yaml(_) | Error::Toml(_) => "config_invalid",
            Error::Internal(_) => "internal",
        }
    }
}

/// Boundary-facing error, mapped to HTTP status codes at the edge. Kept
/// separate from the core `Error` so the core never depends on `axum`.
#[derive(Error, Debug)]
pub enum BoundaryError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Core(#[from] Error),
}

impl BoundaryError {
    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            BoundaryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BoundaryError::Core(Error::NoHealthyProviders(_)) => StatusCode::SERVICE_UNAVAILABLE,
            BoundaryError::Core(Error::BreakerOpen(_)) => StatusCode::SERVICE_UNAVAILABLE,
            BoundaryError::Core(Error::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            BoundaryError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for BoundaryError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        let status = self.status();
        let body = Json(serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
