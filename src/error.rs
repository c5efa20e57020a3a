use crate::models::SocketStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Message stored on a socket when an infrastructure failure outlives its retries.
pub const UNHANDLED_ERROR: &str = "Unhandled error. Processing failed after max attempts.";

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed manifest or out-of-range setting. Reported verbatim.
    #[error("{message}")]
    Validation {
        message: String,
        line: Option<usize>,
    },

    /// Business-rule failure raised while importing or processing a dependency.
    #[error("{message}")]
    Processing {
        message: String,
        line: Option<usize>,
    },

    #[error("File not found in zip: \"{0}\".")]
    MissingFile(String),

    /// Destructive class change blocked by `class_nodelete`.
    #[error("{0}")]
    Prompt(String),

    #[error("Error validating socket config. {0}")]
    Config(String),

    #[error("Cannot modify. Please wait until processing has finished.")]
    SocketLocked,

    #[error("Cannot update a socket that was not installed from a URL.")]
    SocketWithUrlRequired,

    #[error("Socket count exceeded ({0}).")]
    SocketCountExceeded(usize),

    #[error("Socket not found: {0}")]
    SocketNotFound(String),

    #[error("Socket environment is still processing.")]
    EnvironmentNotReady,

    #[error("Socket environment processing failed.")]
    EnvironmentFailure,

    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(message: impl Into<String>, line: Option<usize>) -> Self {
        Error::Validation {
            message: message.into(),
            line,
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Error::Processing {
            message: message.into(),
            line: None,
        }
    }

    pub fn processing_at(message: impl Into<String>, line: Option<usize>) -> Self {
        Error::Processing {
            message: message.into(),
            line,
        }
    }

    /// Source line the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Validation { line, .. } | Error::Processing { line, .. } => *line,
            _ => None,
        }
    }

    /// Re-attach a line to errors that do not carry one yet.
    pub fn or_line(self, fallback: Option<usize>) -> Self {
        match self {
            Error::Validation { message, line } => Error::Validation {
                message,
                line: line.or(fallback),
            },
            Error::Processing { message, line } => Error::Processing {
                message,
                line: line.or(fallback),
            },
            other => other,
        }
    }

    /// Errors that are caused by the bundle or the request and are shown to the
    /// caller as-is. Everything else is an infrastructure failure and is retried.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::Processing { .. }
                | Error::MissingFile(_)
                | Error::Prompt(_)
                | Error::Config(_)
                | Error::EnvironmentNotReady
                | Error::EnvironmentFailure
                | Error::EnvironmentNotFound(_)
        )
    }

    /// Terminal status a socket lands in when this error aborts its install.
    pub fn status(&self) -> SocketStatus {
        match self {
            Error::Prompt(_) => SocketStatus::Prompt,
            _ => SocketStatus::Error,
        }
    }

    pub fn status_info(&self) -> StatusInfo {
        StatusInfo {
            error: self.to_string(),
            lineno: self.line(),
        }
    }
}

/// Structured error payload persisted on a socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<usize>,
}

impl StatusInfo {
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            lineno: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_info_carries_line() {
        let err = Error::validation("Wrong format for \"endpoints\". Expected object.", Some(3));
        let info = err.status_info();
        assert_eq!(info.lineno, Some(3));
        assert!(info.error.starts_with("Wrong format"));
    }

    #[test]
    fn test_prompt_maps_to_prompt_status() {
        assert_eq!(
            Error::Prompt("Irreversible class changes:".into()).status(),
            SocketStatus::Prompt
        );
        assert_eq!(Error::processing("boom").status(), SocketStatus::Error);
    }

    #[test]
    fn test_infrastructure_errors_are_not_business() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!io.is_business());
        assert!(Error::MissingFile("a.js".into()).is_business());
        assert_eq!(
            Error::MissingFile("a.js".into()).to_string(),
            "File not found in zip: \"a.js\"."
        );
    }

    #[test]
    fn test_or_line_keeps_existing_line() {
        let err = Error::validation("x", Some(2)).or_line(Some(9));
        assert_eq!(err.line(), Some(2));
        let err = Error::processing("y").or_line(Some(9));
        assert_eq!(err.line(), Some(9));
    }
}
