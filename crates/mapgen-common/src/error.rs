//! Error types for the map generator.

use thiserror::Error;

/// Result type alias using MapGenError.
pub type MapGenResult<T> = Result<T, MapGenError>;

/// Primary error type for map generation requests.
#[derive(Debug, Error)]
pub enum MapGenError {
    // === Request Errors ===
    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid style document: {0}")]
    InvalidStyle(String),

    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Rendering Errors ===
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Rendering failed: {0}")]
    RenderError(String),

    #[error("Renderer pool fault: {0}")]
    PoolFault(String),

    #[error("Image encoding failed: {0}")]
    EncodeError(String),

    // === Job Errors ===
    #[error("Render cancelled")]
    Cancelled,

    #[error("Service shutting down")]
    ShuttingDown,

    #[error("Render timeout")]
    Timeout,

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl MapGenError {
    /// Create an InvalidParameter error.
    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable reason, used in error response bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            MapGenError::InvalidParameter { .. } => "invalid_parameter",
            MapGenError::InvalidBody(_) => "invalid_body",
            MapGenError::InvalidStyle(_) => "invalid_style",
            MapGenError::InvalidConfig(_) => "invalid_config",
            MapGenError::EngineInit(_) => "engine_init_failed",
            MapGenError::RenderError(_) => "render_failed",
            MapGenError::PoolFault(_) => "pool_fault",
            MapGenError::EncodeError(_) => "encode_failed",
            MapGenError::Cancelled => "cancelled",
            MapGenError::ShuttingDown => "shutdown",
            MapGenError::Timeout => "timeout",
            MapGenError::InternalError(_) => "internal",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            MapGenError::InvalidParameter { .. }
            | MapGenError::InvalidBody(_)
            | MapGenError::InvalidStyle(_) => 400,

            MapGenError::Cancelled | MapGenError::ShuttingDown => 503,
            MapGenError::Timeout => 504,

            _ => 500,
        }
    }
}

impl From<serde_json::Error> for MapGenError {
    fn from(err: serde_json::Error) -> Self {
        MapGenError::InvalidBody(format!("JSON error: {}", err))
    }
}
