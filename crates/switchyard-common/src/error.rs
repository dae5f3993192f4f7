//! Error types for switchyard services
//!
//! Errors carry enough context to debug a failed rendezvous and map onto
//! the gRPC status codes callers are expected to branch on: callers retry
//! `Unavailable` and `Internal`, and treat everything else as final.

use thiserror::Error;
use tonic::{Code, Status};

/// Main error type for switchyard operations
#[derive(Debug, Error)]
pub enum Error {
    /// Presented bearer credential could not be decoded
    #[error("invalid credential: {message}")]
    Credential {
        /// What was wrong with the credential
        message: String,
    },

    /// No stored credential of the named principal matched
    #[error("no matching credential for {namespace}/{name}")]
    NoMatchingCredential {
        /// Namespace of the principal that failed to authenticate
        namespace: String,
        /// Name of the principal that failed to authenticate
        name: String,
    },

    /// Capability token was malformed or not bound to this router
    #[error("invalid capability token: {message}")]
    Capability {
        /// What was wrong with the token
        message: String,
    },

    /// Capability token failed review
    #[error("capability token rejected: {message}")]
    CapabilityRejected {
        /// Why the reviewer rejected the token
        message: String,
    },

    /// Dial target has no active listener
    #[error("no matching listener")]
    NoListener {
        /// Name of the exporter that was dialed
        exporter: String,
    },

    /// The listener's stream went away while handing over the offer
    #[error("listen stream closed")]
    ListenClosed {
        /// Name of the exporter whose stream closed
        exporter: String,
    },

    /// A second Listen arrived for an exporter that is already listening
    #[error("exporter is already listening")]
    AlreadyListening {
        /// Name of the exporter
        exporter: String,
    },

    /// The caller is not allowed to reach this exporter
    #[error("not authorized to dial {exporter}")]
    Denied {
        /// Name of the exporter that was dialed
        exporter: String,
    },

    /// Directory read or write failed
    #[error("directory error [{context}]: {message}")]
    Directory {
        /// Where the failure occurred (e.g. "exporter", "secret", "status")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Token oracle failed to issue a capability
    #[error("failed to issue stream token: {message}")]
    TokenIssue {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a credential error with the given message
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential {
            message: msg.into(),
        }
    }

    /// Create a no-matching-credential error for a principal
    pub fn no_matching_credential(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NoMatchingCredential {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a capability error with the given message
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability {
            message: msg.into(),
        }
    }

    /// Create a capability-rejected error with the given message
    pub fn capability_rejected(msg: impl Into<String>) -> Self {
        Self::CapabilityRejected {
            message: msg.into(),
        }
    }

    /// Create a no-listener error for an exporter
    pub fn no_listener(exporter: impl Into<String>) -> Self {
        Self::NoListener {
            exporter: exporter.into(),
        }
    }

    /// Create a listen-closed error for an exporter
    pub fn listen_closed(exporter: impl Into<String>) -> Self {
        Self::ListenClosed {
            exporter: exporter.into(),
        }
    }

    /// Create an already-listening error for an exporter
    pub fn already_listening(exporter: impl Into<String>) -> Self {
        Self::AlreadyListening {
            exporter: exporter.into(),
        }
    }

    /// Create a permission-denied error for an exporter
    pub fn denied(exporter: impl Into<String>) -> Self {
        Self::Denied {
            exporter: exporter.into(),
        }
    }

    /// Create a directory error with context
    pub fn directory(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Directory {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a token-issue error with the given message
    pub fn token_issue(msg: impl Into<String>) -> Self {
        Self::TokenIssue {
            message: msg.into(),
        }
    }

    /// The gRPC status code this error surfaces as
    pub fn code(&self) -> Code {
        match self {
            Error::Credential { .. } | Error::Capability { .. } => Code::InvalidArgument,
            Error::NoMatchingCredential { .. } | Error::CapabilityRejected { .. } => {
                Code::Unauthenticated
            }
            Error::NoListener { .. } | Error::ListenClosed { .. } => Code::Unavailable,
            Error::AlreadyListening { .. } => Code::AlreadyExists,
            Error::Denied { .. } => Code::PermissionDenied,
            Error::Directory { .. } | Error::TokenIssue { .. } => Code::Internal,
        }
    }

    /// Whether a caller may reasonably retry after this error
    ///
    /// `Unavailable` clears once the exporter registers; `Internal` covers
    /// transient directory and oracle failures. Everything else needs a
    /// different request.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), Code::Unavailable | Code::Internal)
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        Status::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: the error taxonomy maps onto the gRPC codes callers branch on
    ///
    /// A client deciding whether to retry a failed Dial only sees the
    /// status code, so each failure class must map to the right one.
    #[test]
    fn story_error_codes_match_taxonomy() {
        // Malformed inputs are the caller's bug
        assert_eq!(Error::credential("bad base64").code(), Code::InvalidArgument);
        assert_eq!(
            Error::capability("invalid number of local jwt audiences").code(),
            Code::InvalidArgument
        );

        // Failed authentication is final
        assert_eq!(
            Error::no_matching_credential("lab", "exporter-01").code(),
            Code::Unauthenticated
        );
        assert_eq!(
            Error::capability_rejected("review failed").code(),
            Code::Unauthenticated
        );

        // A missing listener clears once the exporter registers
        assert_eq!(Error::no_listener("exporter-01").code(), Code::Unavailable);
        assert_eq!(Error::listen_closed("exporter-01").code(), Code::Unavailable);

        // Duplicate listen must be resolved by the exporter
        assert_eq!(
            Error::already_listening("exporter-01").code(),
            Code::AlreadyExists
        );

        // Policy rejection
        assert_eq!(Error::denied("exporter-01").code(), Code::PermissionDenied);

        // Infrastructure failures are transient
        assert_eq!(
            Error::directory("status", "conflict").code(),
            Code::Internal
        );
        assert_eq!(Error::token_issue("api down").code(), Code::Internal);
    }

    #[test]
    fn test_retryability() {
        assert!(Error::no_listener("e").is_retryable());
        assert!(Error::directory("exporter", "timeout").is_retryable());
        assert!(Error::token_issue("timeout").is_retryable());

        assert!(!Error::credential("garbage").is_retryable());
        assert!(!Error::no_matching_credential("ns", "n").is_retryable());
        assert!(!Error::already_listening("e").is_retryable());
        assert!(!Error::denied("e").is_retryable());
    }

    #[test]
    fn test_status_conversion_keeps_message() {
        let status: Status = Error::no_listener("exporter-01").into();
        assert_eq!(status.code(), Code::Unavailable);
        assert!(status.message().contains("no matching listener"));

        let status: Status = Error::directory("secret", "not found").into();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains("[secret]"));
        assert!(status.message().contains("not found"));
    }

    #[test]
    fn test_display_includes_principal() {
        let err = Error::no_matching_credential("lab", "exporter-01");
        assert!(err.to_string().contains("lab/exporter-01"));
    }
}
