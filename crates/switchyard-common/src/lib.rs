//! Common types for switchyard: errors, directory records, and bearer credentials

#![deny(missing_docs)]

pub mod bearer;
pub mod crd;
pub mod error;

pub use bearer::BearerCredential;
pub use error::Error;

use std::time::Duration;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port for the controller gRPC service
pub const DEFAULT_CONTROLLER_PORT: u16 = 8082;

/// Default port for the router gRPC service
pub const DEFAULT_ROUTER_PORT: u16 = 8083;

/// Namespace holding switchyard system resources (tokenholder, deployments)
pub const SYSTEM_NAMESPACE: &str = "switchyard-system";

/// ServiceAccount that signs session capability tokens
pub const TOKENHOLDER_NAME: &str = "switchyard-tokenholder";

/// How long a session capability token stays valid after issuance
pub const STREAM_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Subject the router expects on reviewed capability tokens.
///
/// Capabilities are issued for the tokenholder ServiceAccount, so a valid
/// review reports this exact subject.
pub fn tokenholder_subject() -> String {
    format!("system:serviceaccount:{SYSTEM_NAMESPACE}:{TOKENHOLDER_NAME}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenholder_subject() {
        assert_eq!(
            tokenholder_subject(),
            "system:serviceaccount:switchyard-system:switchyard-tokenholder"
        );
    }
}
