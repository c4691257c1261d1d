// file: src/error.rs
// version: 3.0.0
// guid: 5d1e0c8a-3f4b-4a7e-9b62-0e8f1c2d7a41

//! Error types for the autoinstall engine
//!
//! The first five variants form the job failure taxonomy: a request is
//! rejected with [`AutoinstallError::Syntax`], setup problems surface as
//! [`AutoinstallError::Value`] before any side effect, and everything raised
//! once the target is being driven is `Runtime`, `Timeout` or `Connection`.

use thiserror::Error;

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, AutoinstallError>;

/// Boxed cause attached to runtime failures
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for the autoinstall engine
#[derive(Error, Debug)]
pub enum AutoinstallError {
    #[error("Invalid request: {0}")]
    Syntax(String),

    #[error("{0}")]
    Value(String),

    #[error("{message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse failure class, used by callers that map errors to exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Syntax,
    Value,
    Runtime,
    Timeout,
    Connection,
}

impl ErrorClass {
    /// Process exit code reported by the command line front end
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Syntax => 2,
            ErrorClass::Value => 3,
            ErrorClass::Runtime => 4,
            ErrorClass::Timeout => 5,
            ErrorClass::Connection => 6,
        }
    }
}

impl AutoinstallError {
    /// Create a new syntax error
    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }

    /// Create a new value error
    pub fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }

    /// Create a new runtime error without a cause
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a new runtime error carrying the original cause
    pub fn runtime_with_source(
        msg: impl Into<String>,
        source: impl Into<BoxedCause>,
    ) -> Self {
        Self::Runtime {
            message: msg.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new ssh transport error
    pub fn ssh(msg: impl Into<String>) -> Self {
        Self::Ssh(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Failure class of this error
    ///
    /// Plumbing errors are classified by when they can happen: decoding
    /// and configuration problems are value errors, transport problems
    /// are runtime errors.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Syntax(_) => ErrorClass::Syntax,
            Self::Value(_) | Self::Config(_) | Self::Yaml(_) | Self::Template(_) => {
                ErrorClass::Value
            }
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::Connection(_) => ErrorClass::Connection,
            Self::Runtime { .. } | Self::Io(_) | Self::Json(_) | Self::Http(_) | Self::Ssh(_) => {
                ErrorClass::Runtime
            }
        }
    }
}
