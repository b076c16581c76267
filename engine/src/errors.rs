//! Error types for the deployment engine

use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Command failed with exit code {exit_code}: {stderr}")]
    RemoteCommand { exit_code: i32, stderr: String },

    #[error("Deployment cancelled by user")]
    Cancelled,

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Build failed: {0}")]
    BuildError(String),

    #[error("Nixpacks failed to detect the application type: {0}")]
    NixpacksDetection(String),

    #[error("Health check failed: {0}")]
    HealthCheckError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Rolling update failed ({cause}): {message}")]
    RolloutError { cause: String, message: String },

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Variant name, kept when an error is wrapped by an outer stage
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::IoError(_) => "IoError",
            EngineError::JsonError(_) => "JsonError",
            EngineError::YamlError(_) => "YamlError",
            EngineError::HttpError(_) => "HttpError",
            EngineError::RemoteCommand { .. } => "RemoteCommand",
            EngineError::Cancelled => "Cancelled",
            EngineError::GitError(_) => "GitError",
            EngineError::BuildError(_) => "BuildError",
            EngineError::NixpacksDetection(_) => "NixpacksDetection",
            EngineError::HealthCheckError(_) => "HealthCheckError",
            EngineError::RegistryError(_) => "RegistryError",
            EngineError::RolloutError { .. } => "RolloutError",
            EngineError::StoreError(_) => "StoreError",
            EngineError::NotFound(_) => "NotFound",
            EngineError::ConfigError(_) => "ConfigError",
            EngineError::ValidationError(_) => "ValidationError",
            EngineError::ServerError(_) => "ServerError",
            EngineError::ShutdownError(_) => "ShutdownError",
            EngineError::Internal(_) => "Internal",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Wrap as a rollout failure, keeping the original kind for diagnosis.
    /// Cancellation passes through untouched.
    pub fn into_rollout(self) -> EngineError {
        match self {
            EngineError::Cancelled => EngineError::Cancelled,
            e @ EngineError::RolloutError { .. } => e,
            e => EngineError::RolloutError {
                cause: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
