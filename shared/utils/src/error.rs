use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ProcuraError {
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ProcuraError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Decode { .. } => 422,
            Self::Persistence { .. } => 500,
            Self::Cancelled => 409,
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::ExternalService { .. } => 502,
            Self::Configuration { .. } => 500,
            Self::Internal { .. } => 500,
        }
    }

    /// Short message recorded on a failed run. Never carries internals
    /// beyond the error's own display text.
    pub fn run_message(&self) -> String {
        self.to_string()
    }
}

pub type ProcuraResult<T> = Result<T, ProcuraError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<ProcuraError> for ErrorResponse {
    fn from(error: ProcuraError) -> Self {
        Self {
            error: error.error_code().to_lowercase(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            details: None,
        }
    }
}

// Conversion from common error types
impl From<sqlx::Error> for ProcuraError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::not_found("row"),
            other => Self::persistence(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ProcuraError {
    fn from(error: reqwest::Error) -> Self {
        Self::external_service("HTTP Client", error.to_string())
    }
}

impl From<serde_json::Error> for ProcuraError {
    fn from(error: serde_json::Error) -> Self {
        Self::validation("JSON", error.to_string())
    }
}

impl From<csv::Error> for ProcuraError {
    fn from(error: csv::Error) -> Self {
        Self::decode(error.to_string())
    }
}

impl From<procura_models::CostOverflow> for ProcuraError {
    fn from(error: procura_models::CostOverflow) -> Self {
        Self::validation("quantity", error.to_string())
    }
}

impl From<config::ConfigError> for ProcuraError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ProcuraError::decode("bad file").error_code(), "DECODE_ERROR");
        assert_eq!(ProcuraError::decode("bad file").http_status_code(), 422);
        assert_eq!(ProcuraError::conflict("resolved").http_status_code(), 409);
        assert_eq!(ProcuraError::not_found("run").http_status_code(), 404);
    }

    #[test]
    fn test_cancelled_message() {
        assert_eq!(ProcuraError::Cancelled.to_string(), "Cancelled");
        assert_eq!(ProcuraError::Cancelled.run_message(), "Cancelled");
    }

    #[test]
    fn test_cost_overflow_is_a_quantity_error() {
        let error = ProcuraError::from(procura_models::CostOverflow { line_number: 2 });
        assert_eq!(error, ProcuraError::validation("quantity", "Cost of line 2 is out of range"));
        assert_eq!(error.http_status_code(), 400);
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::from(ProcuraError::validation("quantity", "must be positive"));
        assert_eq!(response.code, "VALIDATION_ERROR");
        assert_eq!(response.message, "Validation error: quantity - must be positive");
    }
}
