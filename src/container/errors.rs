//! Classification of engine failures.

use super::{ClientError, ContainerError};
use serde::{Deserialize, Serialize};

/// Semantic category of a failed engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ImageNotFound,
    AlreadyExists,
    ResourceConstraint,
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ImageNotFound => "image_not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::ResourceConstraint => "resource_constraint",
            ErrorKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const NO_SUCH_CONTAINER: &str = "No such container";
const NO_SUCH_IMAGE: &str = "No such image";
const CONFLICT: &str = "Conflict";
const RESOURCE_CONSTRAINTS: &str = "Resource constraints exceeded";

/// Classify a client error.
///
/// Engine status codes are checked first; anything else falls back to
/// matching well-known phrases in the engine's error text.
pub fn classify(err: &ClientError) -> ErrorKind {
    if let ContainerError::ApiError(bollard::errors::Error::DockerResponseServerError {
        status_code,
        message,
    }) = err.cause()
    {
        match *status_code {
            404 if message.contains(NO_SUCH_IMAGE) => return ErrorKind::ImageNotFound,
            404 => return ErrorKind::NotFound,
            409 => return ErrorKind::AlreadyExists,
            _ => {}
        }
    }

    // Details carry caller-supplied names and never take part.
    classify_message(&err.cause().to_string())
}

fn classify_message(text: &str) -> ErrorKind {
    if text.contains(NO_SUCH_CONTAINER) {
        ErrorKind::NotFound
    } else if text.contains(NO_SUCH_IMAGE) {
        ErrorKind::ImageNotFound
    } else if text.contains(CONFLICT) {
        ErrorKind::AlreadyExists
    } else if text.contains(RESOURCE_CONSTRAINTS) {
        ErrorKind::ResourceConstraint
    } else {
        ErrorKind::Generic
    }
}
