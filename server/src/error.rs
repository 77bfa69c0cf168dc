//! Error types for the kalirelay server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the kalirelay server
#[derive(Debug, Error)]
pub enum Error {
    // Command errors (2000-2999)
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command already finished: {0}")]
    CommandAlreadyTerminal(String),

    // Agent errors (3000-3999)
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("No remote agent connected")]
    NoAgentConnected,

    #[error("Agent communication error: {0}")]
    AgentCommunicationError(String),

    #[error("Invalid agent token")]
    InvalidAgentToken,

    // Generator errors (4000-4999)
    #[error("Command generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid API credential: {0}")]
    InvalidCredential(String),

    #[error("Safety analysis failed: {0}")]
    SafetyAnalysisFailed(String),

    // Execution errors (5000-5999)
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    // General errors (1000-1999)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Command errors (2000-2999)
            Error::CommandNotFound(_) => 2001,
            Error::CommandAlreadyTerminal(_) => 2002,

            // Agent errors (3000-3999)
            Error::AgentNotFound(_) => 3001,
            Error::NoAgentConnected => 3002,
            Error::AgentCommunicationError(_) => 3003,
            Error::InvalidAgentToken => 3004,

            // Generator errors (4000-4999)
            Error::GenerationFailed(_) => 4001,
            Error::InvalidCredential(_) => 4002,
            Error::SafetyAnalysisFailed(_) => 4003,

            // Execution errors (5000-5999)
            Error::ExecutionFailed(_) => 5001,

            // General errors (1000-1999)
            Error::InvalidRequest(_) => 1001,
            Error::Internal(_) => 1002,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::CommandNotFound(_) | Error::AgentNotFound(_) => StatusCode::NOT_FOUND,

            Error::CommandAlreadyTerminal(_) => StatusCode::CONFLICT,

            Error::NoAgentConnected | Error::AgentCommunicationError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Error::InvalidAgentToken => StatusCode::UNAUTHORIZED,

            Error::InvalidCredential(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            Error::GenerationFailed(_) | Error::SafetyAnalysisFailed(_) => StatusCode::BAD_GATEWAY,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::GenerationFailed(err.to_string())
    }
}
