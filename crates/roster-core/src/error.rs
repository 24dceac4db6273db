//! Error types for Roster
//!
//! One workspace-wide error enum with explicit kinds. Every kind is either
//! internal (bubbles up the transport as a real failure, client may retry) or
//! non-internal (a stable "absent"/validation outcome delivered inside the
//! response envelope while the transport call completes normally).

use thiserror::Error;

/// Result type alias for Roster operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wire code for a successful response envelope
pub const CODE_SUCCESS: u32 = 0;

/// Roster error kinds
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Request validation failure; never retried server-side
    #[error("invalid parameters: {message}")]
    InvalidParams { message: String },

    /// The referenced service record is absent
    #[error("service does not exist: {message}")]
    ServiceNotExists { message: String },

    /// The referenced instance (or its lease) is absent
    #[error("instance does not exist: {message}")]
    InstanceNotExists { message: String },

    /// The provider does not carry a requested tag
    #[error("tag does not exist: {message}")]
    TagNotExists { message: String },

    /// Accessibility predicate denial (black/white list, quota)
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Transient backend failure; surfaced as a transport error so the
    /// client can retry
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    /// Unexpected failure (serialization, programmer error)
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    pub fn service_not_exists(message: impl Into<String>) -> Self {
        Self::ServiceNotExists {
            message: message.into(),
        }
    }

    pub fn instance_not_exists(message: impl Into<String>) -> Self {
        Self::InstanceNotExists {
            message: message.into(),
        }
    }

    pub fn tag_not_exists(message: impl Into<String>) -> Self {
        Self::TagNotExists {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error bubbles up the transport as a true failure.
    ///
    /// Non-internal errors are returned in the response body with the
    /// transport call completing normally.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Internal { .. })
    }

    /// Stable numeric code carried in the response envelope
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidParams { .. } => 400001,
            Self::ServiceNotExists { .. } => 400012,
            Self::TagNotExists { .. } => 400016,
            Self::InstanceNotExists { .. } => 400017,
            Self::Forbidden { .. } => 403001,
            Self::Internal { .. } => 500003,
            Self::Unavailable { .. } => 500101,
        }
    }

    /// Human-readable message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidParams { message }
            | Self::ServiceNotExists { message }
            | Self::InstanceNotExists { message }
            | Self::TagNotExists { message }
            | Self::Forbidden { message }
            | Self::Unavailable { message }
            | Self::Internal { message } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::service_not_exists("serviceId 's1' is invalid");
        assert!(err.to_string().contains("s1"));
    }

    #[test]
    fn test_internal_discriminator() {
        assert!(Error::unavailable("timeout").is_internal());
        assert!(Error::internal("bug").is_internal());
        assert!(!Error::instance_not_exists("gone").is_internal());
        assert!(!Error::invalid_params("bad ttl").is_internal());
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            Error::invalid_params("").code(),
            Error::service_not_exists("").code(),
            Error::instance_not_exists("").code(),
            Error::tag_not_exists("").code(),
            Error::forbidden("").code(),
            Error::unavailable("").code(),
            Error::internal("").code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(!codes.contains(&CODE_SUCCESS));
    }
}
