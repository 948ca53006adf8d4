// src/error.rs

//! Error types for the package assembly pipeline
//!
//! Every stage returns [`Error`]. Nothing is retried internally: the first
//! error aborts the module's pipeline and is reported to the caller as-is.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A module property is missing or has an invalid value
    #[error("Invalid module property `{property}`: {message}")]
    Config { property: String, message: String },

    /// A destination path escapes or is not normalized within the package root
    #[error("Invalid package path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The source manifest could not be parsed or encoded
    #[error("Malformed manifest: {0}")]
    Manifest(String),

    /// Assembled content contains entries missing from the allow-list
    #[error(
        "Package content is not in the allow-list. Unexpected entries:\n  {}\nTo accept them run:\n  {remediation}",
        .unexpected.join("\n  ")
    )]
    ContentViolation {
        unexpected: Vec<String>,
        remediation: String,
    },

    /// An external tool exited non-zero or could not be started
    #[error("{tool} failed ({status})\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    /// A pipeline stage was entered out of order
    #[error("Cannot move pipeline from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Dependency graph references an unknown module
    #[error("Dependency graph error: {0}")]
    Graph(String),

    /// Key material or package signature problem
    #[error("Signing error: {0}")]
    Signing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse module configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Shorthand for a configuration error naming the offending property
    pub fn config(property: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            property: property.into(),
            message: message.into(),
        }
    }

    /// Whether this error is an allow-list policy violation rather than a build failure
    pub fn is_content_violation(&self) -> bool {
        matches!(self, Error::ContentViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
