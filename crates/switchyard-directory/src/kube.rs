//! Kubernetes-backed collaborator implementations
//!
//! The directory of record is the cluster: principals are CRDs, credentials
//! live in Secrets, and the token oracle is the TokenRequest/TokenReview
//! API. The controller's signing identity is the tokenholder
//! ServiceAccount, so reviewed capabilities carry its
//! `system:serviceaccount:...` subject.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{
    TokenRequest, TokenRequestSpec, TokenReview, TokenReviewSpec,
};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

use switchyard_common::crd::{ClientIdentity, CredentialRef, Exporter, ExporterStatus};
use switchyard_common::{Error, Result, SYSTEM_NAMESPACE, TOKENHOLDER_NAME};

/// Field manager recorded on status patches
const FIELD_MANAGER: &str = "switchyard-controller";

/// Key of the credential token inside a secret
const TOKEN_KEY: &str = "token";

/// Directory backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeDirectory {
    client: Client,
}

impl KubeDirectory {
    /// Create a directory over the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl super::Directory for KubeDirectory {
    async fn exporter(&self, namespace: &str, name: &str) -> Result<Exporter> {
        let api: Api<Exporter> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::directory("exporter", e.to_string()))
    }

    async fn client_identity(&self, namespace: &str, name: &str) -> Result<ClientIdentity> {
        let api: Api<ClientIdentity> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::directory("identity", e.to_string()))
    }

    async fn credential_token(&self, reference: &CredentialRef) -> Result<Option<Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &reference.namespace);
        let secret = api
            .get(&reference.name)
            .await
            .map_err(|e| Error::directory("secret", e.to_string()))?;
        Ok(secret
            .data
            .and_then(|mut data| data.remove(TOKEN_KEY))
            .map(|bytes| bytes.0))
    }

    async fn publish_exporter_status(
        &self,
        namespace: &str,
        name: &str,
        status: ExporterStatus,
    ) -> Result<()> {
        let api: Api<Exporter> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::directory("status", e.to_string()))?;
        debug!(exporter = %name, namespace = %namespace, "Published exporter status");
        Ok(())
    }
}

/// Token issuer backed by the TokenRequest API.
///
/// Tokens are requested on the tokenholder ServiceAccount, bound to a
/// single audience.
#[derive(Clone)]
pub struct KubeTokenIssuer {
    client: Client,
    namespace: String,
    service_account: String,
}

impl KubeTokenIssuer {
    /// Issuer for the well-known tokenholder in the system namespace
    pub fn new(client: Client) -> Self {
        Self::for_service_account(client, SYSTEM_NAMESPACE, TOKENHOLDER_NAME)
    }

    /// Issuer for a specific ServiceAccount
    pub fn for_service_account(
        client: Client,
        namespace: impl Into<String>,
        service_account: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            service_account: service_account.into(),
        }
    }
}

#[async_trait]
impl super::TokenIssuer for KubeTokenIssuer {
    async fn issue(&self, audience: &str, ttl: Duration) -> Result<String> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &self.namespace);

        let request = TokenRequest {
            metadata: Default::default(),
            spec: TokenRequestSpec {
                audiences: vec![audience.to_string()],
                expiration_seconds: Some(ttl.as_secs() as i64),
                bound_object_ref: None,
            },
            status: None,
        };
        let data =
            serde_json::to_vec(&request).map_err(|e| Error::token_issue(e.to_string()))?;

        let issued: TokenRequest = api
            .create_subresource(
                "token",
                &self.service_account,
                &PostParams::default(),
                data,
            )
            .await
            .map_err(|e| Error::token_issue(e.to_string()))?;

        let status = issued
            .status
            .ok_or_else(|| Error::token_issue("token request returned no status"))?;
        Ok(status.token)
    }
}

/// Token reviewer backed by the TokenReview API
#[derive(Clone)]
pub struct KubeTokenReviewer {
    client: Client,
}

impl KubeTokenReviewer {
    /// Create a reviewer over the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl super::TokenReviewer for KubeTokenReviewer {
    async fn review(&self, token: &str, audience: &str) -> Result<super::ReviewedToken> {
        let api: Api<TokenReview> = Api::all(self.client.clone());

        let review = TokenReview {
            metadata: Default::default(),
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: Some(vec![audience.to_string()]),
            },
            status: None,
        };

        let result = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| Error::capability_rejected(format!("failed to create token review: {e}")))?;

        let status = result.status.unwrap_or_default();
        Ok(super::ReviewedToken {
            authenticated: status.authenticated.unwrap_or(false),
            subject: status
                .user
                .and_then(|user| user.username)
                .unwrap_or_default(),
            audiences: status.audiences.unwrap_or_default(),
        })
    }
}
