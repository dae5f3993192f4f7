//! External-collaborator seams for the switchyard core
//!
//! The controller and router never talk to credential storage or token
//! infrastructure directly; they consume the traits defined here. The
//! production implementations in the `kube` module back each seam with the
//! Kubernetes API; the ones in [`memory`] keep everything in-process for
//! tests and local development.

#![deny(missing_docs)]

pub mod kube;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use switchyard_common::crd::{ClientIdentity, CredentialRef, Exporter, ExporterStatus};
use switchyard_common::Result;

/// Read access to principal records plus exporter status publication.
///
/// Reads are the authentication path; the single write
/// ([`publish_exporter_status`](Directory::publish_exporter_status)) keeps
/// the directory the system of record for exporter availability.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Fetch an exporter record by namespace and name
    async fn exporter(&self, namespace: &str, name: &str) -> Result<Exporter>;

    /// Fetch a client identity record by namespace and name
    async fn client_identity(&self, namespace: &str, name: &str) -> Result<ClientIdentity>;

    /// Read the `token` field of a referenced credential secret.
    ///
    /// Returns `None` when the secret exists but has no `token` field.
    async fn credential_token(&self, reference: &CredentialRef) -> Result<Option<Vec<u8>>>;

    /// Replace an exporter's published status
    async fn publish_exporter_status(
        &self,
        namespace: &str,
        name: &str,
        status: ExporterStatus,
    ) -> Result<()>;
}

/// Signs capability tokens bound to a single audience
#[async_trait]
pub trait TokenIssuer: Send + Sync + 'static {
    /// Issue a signed token with exactly one audience and the given lifetime
    async fn issue(&self, audience: &str, ttl: Duration) -> Result<String>;
}

/// Outcome of reviewing a capability token
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReviewedToken {
    /// Whether the token verified
    pub authenticated: bool,
    /// Subject the token was issued for
    pub subject: String,
    /// Audiences the token is valid for
    pub audiences: Vec<String>,
}

/// Verifies capability tokens against an expected audience
#[async_trait]
pub trait TokenReviewer: Send + Sync + 'static {
    /// Review a token, asserting it is valid for `audience`
    async fn review(&self, token: &str, audience: &str) -> Result<ReviewedToken>;
}

/// Decides whether a client identity may dial a given exporter.
///
/// Reserved for identity-to-exporter policy; until a real policy engine is
/// wired in, [`AllowAll`] is the default.
#[async_trait]
pub trait Authorizer: Send + Sync + 'static {
    /// Whether `identity` may open a session to `exporter`
    async fn authorize(&self, identity: &ClientIdentity, exporter: &str) -> Result<bool>;
}

/// Authorizer that permits every dial
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _identity: &ClientIdentity, _exporter: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_common::crd::ClientIdentitySpec;

    #[tokio::test]
    async fn test_allow_all_permits_everything() {
        let identity = ClientIdentity::new("client-01", ClientIdentitySpec::default());
        assert!(AllowAll
            .authorize(&identity, "exporter-01")
            .await
            .unwrap());
    }
}
