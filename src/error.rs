//! Errors returned to callers of the cluster manager

use std::fmt;

pub use crate::provisioning::EngineError;
pub use crate::store::StoreError;

/// Caller-visible error category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A cluster with the same name already exists
    DuplicateResource,
    /// The submitted spec failed validation
    InvalidOption,
    /// The cluster's current status does not allow the operation
    PermissionDenied,
    /// No such cluster (or no such kubeconfig user)
    NotFound,
    /// The persistent store failed during a synchronous call
    ServerError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DuplicateResource => "duplicate resource",
            ErrorKind::InvalidOption => "invalid option",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NotFound => "not found",
            ErrorKind::ServerError => "server error",
        };
        f.write_str(name)
    }
}

/// Error returned by every synchronous manager operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn duplicate(name: &str) -> Self {
        Self::new(ErrorKind::DuplicateResource, format!("cluster {} already exists", name))
    }

    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOption, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("cluster {} not found", name))
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) => ApiError::not_found(&name),
            other => ApiError::server_error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_kinds() {
        let missing: ApiError = StoreError::NotFound("local".to_string()).into();
        assert_eq!(missing.kind, ErrorKind::NotFound);
        assert_eq!(missing.to_string(), "not found: cluster local not found");

        let broken: ApiError = StoreError::Backend("io".to_string()).into();
        assert_eq!(broken.kind, ErrorKind::ServerError);
    }
}
