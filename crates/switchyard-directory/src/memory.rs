//! In-memory collaborator implementations
//!
//! Used by unit and end-to-end tests, and handy for running both services
//! locally without a cluster. [`MemoryTokenAuthority`] is issuer and
//! reviewer in one: it remembers every token it signs, so review is a
//! lookup rather than a signature check, while the tokens themselves are
//! still well-formed JWTs the router can parse audiences out of.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use uuid::Uuid;

use switchyard_common::crd::{
    ClientIdentity, ClientIdentitySpec, CredentialRef, Exporter, ExporterSpec, ExporterStatus,
};
use switchyard_common::{tokenholder_subject, BearerCredential, Error, Result};

use super::{Directory, ReviewedToken, TokenIssuer, TokenReviewer};

fn record_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// In-memory principal directory
#[derive(Default)]
pub struct MemoryDirectory {
    exporters: DashMap<String, Exporter>,
    clients: DashMap<String, ClientIdentity>,
    secrets: DashMap<String, Vec<u8>>,
    statuses: DashMap<String, ExporterStatus>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exporter with a single credential secret holding `token`.
    ///
    /// Returns the bearer credential that authenticates as this exporter.
    pub fn add_exporter(&self, namespace: &str, name: &str, token: &str) -> BearerCredential {
        let secret_name = format!("{name}-credential");
        self.secrets
            .insert(record_key(namespace, &secret_name), token.as_bytes().to_vec());

        let mut exporter = Exporter::new(
            name,
            ExporterSpec {
                credentials: vec![CredentialRef {
                    namespace: namespace.to_string(),
                    name: secret_name,
                }],
            },
        );
        exporter.metadata.namespace = Some(namespace.to_string());
        exporter.metadata.generation = Some(1);
        self.exporters.insert(record_key(namespace, name), exporter);

        BearerCredential::new(namespace, name, token)
    }

    /// Add a client identity with a single credential secret holding `token`.
    ///
    /// Returns the bearer credential that authenticates as this identity.
    pub fn add_client(&self, namespace: &str, name: &str, token: &str) -> BearerCredential {
        let secret_name = format!("{name}-credential");
        self.secrets
            .insert(record_key(namespace, &secret_name), token.as_bytes().to_vec());

        let mut identity = ClientIdentity::new(
            name,
            ClientIdentitySpec {
                credentials: vec![CredentialRef {
                    namespace: namespace.to_string(),
                    name: secret_name,
                }],
            },
        );
        identity.metadata.namespace = Some(namespace.to_string());
        self.clients.insert(record_key(namespace, name), identity);

        BearerCredential::new(namespace, name, token)
    }

    /// The status most recently published for an exporter, if any
    pub fn published_status(&self, namespace: &str, name: &str) -> Option<ExporterStatus> {
        self.statuses
            .get(&record_key(namespace, name))
            .map(|s| s.clone())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn exporter(&self, namespace: &str, name: &str) -> Result<Exporter> {
        self.exporters
            .get(&record_key(namespace, name))
            .map(|e| e.clone())
            .ok_or_else(|| Error::directory("exporter", "not found"))
    }

    async fn client_identity(&self, namespace: &str, name: &str) -> Result<ClientIdentity> {
        self.clients
            .get(&record_key(namespace, name))
            .map(|c| c.clone())
            .ok_or_else(|| Error::directory("identity", "not found"))
    }

    async fn credential_token(&self, reference: &CredentialRef) -> Result<Option<Vec<u8>>> {
        self.secrets
            .get(&record_key(&reference.namespace, &reference.name))
            .map(|token| Some(token.clone()))
            .ok_or_else(|| Error::directory("secret", "not found"))
    }

    async fn publish_exporter_status(
        &self,
        namespace: &str,
        name: &str,
        status: ExporterStatus,
    ) -> Result<()> {
        if !self.exporters.contains_key(&record_key(namespace, name)) {
            return Err(Error::directory("status", "exporter not found"));
        }
        self.statuses.insert(record_key(namespace, name), status);
        Ok(())
    }
}

struct IssuedToken {
    audiences: Vec<String>,
    expires_at: SystemTime,
}

/// In-memory token oracle: issuer and reviewer over the same state
pub struct MemoryTokenAuthority {
    subject: String,
    issued: DashMap<String, IssuedToken>,
}

impl Default for MemoryTokenAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenAuthority {
    /// Authority signing as the well-known tokenholder subject
    pub fn new() -> Self {
        Self::with_subject(tokenholder_subject())
    }

    /// Authority signing as an arbitrary subject
    pub fn with_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            issued: DashMap::new(),
        }
    }

    /// Issue a token for an arbitrary audience set.
    ///
    /// The single-audience [`TokenIssuer`] path goes through here; tests
    /// use it directly to craft multi-audience tokens.
    pub fn issue_for_audiences(&self, audiences: &[&str], ttl: Duration) -> String {
        let expires_at = SystemTime::now() + ttl;
        let exp = expires_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let claims = serde_json::json!({
            "sub": self.subject,
            "aud": audiences,
            "exp": exp,
        });
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        let signature = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
        let token = format!("{header}.{payload}.{signature}");

        self.issued.insert(
            token.clone(),
            IssuedToken {
                audiences: audiences.iter().map(|a| a.to_string()).collect(),
                expires_at,
            },
        );
        token
    }
}

#[async_trait]
impl TokenIssuer for MemoryTokenAuthority {
    async fn issue(&self, audience: &str, ttl: Duration) -> Result<String> {
        Ok(self.issue_for_audiences(&[audience], ttl))
    }
}

#[async_trait]
impl TokenReviewer for MemoryTokenAuthority {
    async fn review(&self, token: &str, audience: &str) -> Result<ReviewedToken> {
        let Some(issued) = self.issued.get(token) else {
            return Ok(ReviewedToken::default());
        };
        if SystemTime::now() > issued.expires_at
            || !issued.audiences.iter().any(|a| a == audience)
        {
            return Ok(ReviewedToken::default());
        }
        Ok(ReviewedToken {
            authenticated: true,
            subject: self.subject.clone(),
            audiences: issued.audiences.clone(),
        })
    }
}
