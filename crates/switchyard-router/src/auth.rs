//! Capability-token authentication
//!
//! The router trusts nothing it parses itself: the token's audience list
//! is read without verification only to find the single audience bound to
//! this router, then the full token plus that audience go to the external
//! reviewer. The stream id is the audience path suffix.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tonic::metadata::MetadataMap;
use tracing::debug;
use url::{Position, Url};

use switchyard_common::bearer::bearer_from_metadata;
use switchyard_common::{Error, Result};
use switchyard_directory::TokenReviewer;
use switchyard_proto::{stream_id_from_path, STREAM_PATH_PREFIX};

/// Claims we read out of an unverified token
#[derive(Debug, Default, Deserialize)]
struct Claims {
    #[serde(default)]
    aud: Option<Audience>,
}

/// Audience claim (string or array per RFC 7519)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::Single(aud) => vec![aud],
            Audience::Multiple(auds) => auds,
        }
    }
}

/// Read the audience list without verifying the token
fn unverified_audiences(token: &str) -> Result<Vec<String>> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::capability("invalid jwt token"));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| Error::capability("invalid jwt payload encoding"))?;
    let claims: Claims =
        serde_json::from_slice(&payload).map_err(|_| Error::capability("invalid jwt claims"))?;

    Ok(claims.aud.map(Audience::into_vec).unwrap_or_default())
}

/// Whether an audience is bound to this router's stream surface
fn is_local_audience(audience: &Url, endpoint: &str) -> bool {
    audience.scheme() == "https"
        && &audience[Position::BeforeHost..Position::AfterPort] == endpoint
        && audience.path().starts_with(STREAM_PATH_PREFIX)
}

/// Find the single local audience among the token's audiences
fn single_local_audience(audiences: &[String], endpoint: &str) -> Result<Url> {
    let mut matched: Vec<Url> = audiences
        .iter()
        // skip unrecognized and non-local audiences
        .filter_map(|aud| Url::parse(aud).ok())
        .filter(|aud| is_local_audience(aud, endpoint))
        .collect();

    if matched.len() != 1 {
        return Err(Error::capability("invalid number of local jwt audiences"));
    }
    Ok(matched.remove(0))
}

/// Authenticate a `Stream` call and return its stream id.
///
/// `expected_subject` is the well-known identity of the controller's
/// signing principal; anything else fails review even if the signature
/// verifies.
pub async fn authenticate(
    reviewer: &dyn TokenReviewer,
    endpoint: &str,
    expected_subject: &str,
    metadata: &MetadataMap,
) -> Result<String> {
    let token = bearer_from_metadata(metadata)?;

    let audiences = unverified_audiences(token)?;
    let audience = single_local_audience(&audiences, endpoint)?;

    let review = reviewer.review(token, audience.as_str()).await?;
    if !review.authenticated
        || review.subject != expected_subject
        || !review.audiences.iter().any(|a| a == audience.as_str())
    {
        return Err(Error::capability_rejected("unauthenticated jwt token"));
    }

    let stream_id = stream_id_from_path(audience.path())
        .ok_or_else(|| Error::capability("audience carries no stream id"))?;
    debug!(stream = %stream_id, "Capability authenticated");
    Ok(stream_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchyard_common::tokenholder_subject;
    use switchyard_directory::memory::MemoryTokenAuthority;
    use tonic::metadata::MetadataValue;

    const ENDPOINT: &str = "router.test:8083";
    const TTL: Duration = Duration::from_secs(60);

    fn metadata_with(token: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "authorization",
            MetadataValue::try_from(format!("Bearer {token}")).unwrap(),
        );
        metadata
    }

    #[tokio::test]
    async fn test_authenticates_and_extracts_stream_id() {
        let authority = MemoryTokenAuthority::new();
        let token =
            authority.issue_for_audiences(&["https://router.test:8083/stream/abc-123"], TTL);

        let stream_id = authenticate(
            &authority,
            ENDPOINT,
            &tokenholder_subject(),
            &metadata_with(&token),
        )
        .await
        .unwrap();
        assert_eq!(stream_id, "abc-123");
    }

    #[tokio::test]
    async fn test_foreign_host_rejected() {
        let authority = MemoryTokenAuthority::new();
        let token =
            authority.issue_for_audiences(&["https://elsewhere.test:9999/stream/abc"], TTL);

        let err = authenticate(
            &authority,
            ENDPOINT,
            &tokenholder_subject(),
            &metadata_with(&token),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
        assert!(err.to_string().contains("local jwt audiences"));
    }

    #[tokio::test]
    async fn test_two_local_audiences_rejected() {
        let authority = MemoryTokenAuthority::new();
        let token = authority.issue_for_audiences(
            &[
                "https://router.test:8083/stream/one",
                "https://router.test:8083/stream/two",
            ],
            TTL,
        );

        let err = authenticate(
            &authority,
            ENDPOINT,
            &tokenholder_subject(),
            &metadata_with(&token),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
    }

    #[tokio::test]
    async fn test_non_stream_path_rejected() {
        let authority = MemoryTokenAuthority::new();
        let token = authority.issue_for_audiences(&["https://router.test:8083/other/abc"], TTL);

        let err = authenticate(
            &authority,
            ENDPOINT,
            &tokenholder_subject(),
            &metadata_with(&token),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
    }

    #[tokio::test]
    async fn test_wrong_subject_rejected() {
        let authority = MemoryTokenAuthority::with_subject("system:serviceaccount:evil:actor");
        let token = authority.issue_for_audiences(&["https://router.test:8083/stream/abc"], TTL);

        let err = authenticate(
            &authority,
            ENDPOINT,
            &tokenholder_subject(),
            &metadata_with(&token),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::CapabilityRejected { .. }));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let authority = MemoryTokenAuthority::new();
        let token = authority
            .issue_for_audiences(&["https://router.test:8083/stream/abc"], Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = authenticate(
            &authority,
            ENDPOINT,
            &tokenholder_subject(),
            &metadata_with(&token),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::CapabilityRejected { .. }));
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid_argument() {
        let authority = MemoryTokenAuthority::new();

        let err = authenticate(
            &authority,
            ENDPOINT,
            &tokenholder_subject(),
            &metadata_with("definitely-not-a-jwt"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
    }

    #[test]
    fn test_unverified_audiences_handles_both_claim_shapes() {
        let single = URL_SAFE_NO_PAD.encode(r#"{"aud":"https://a/stream/1"}"#);
        let token = format!("h.{single}.s");
        assert_eq!(
            unverified_audiences(&token).unwrap(),
            vec!["https://a/stream/1"]
        );

        let multiple = URL_SAFE_NO_PAD.encode(r#"{"aud":["https://a/stream/1","https://b/stream/2"]}"#);
        let token = format!("h.{multiple}.s");
        assert_eq!(unverified_audiences(&token).unwrap().len(), 2);

        let none = URL_SAFE_NO_PAD.encode(r#"{"sub":"x"}"#);
        let token = format!("h.{none}.s");
        assert!(unverified_audiences(&token).unwrap().is_empty());
    }

    #[test]
    fn test_is_local_audience() {
        let aud = Url::parse("https://router.test:8083/stream/abc").unwrap();
        assert!(is_local_audience(&aud, ENDPOINT));

        // wrong scheme
        let aud = Url::parse("http://router.test:8083/stream/abc").unwrap();
        assert!(!is_local_audience(&aud, ENDPOINT));

        // wrong port
        let aud = Url::parse("https://router.test:9999/stream/abc").unwrap();
        assert!(!is_local_audience(&aud, ENDPOINT));

        // wrong path
        let aud = Url::parse("https://router.test:8083/streams/abc").unwrap();
        assert!(!is_local_audience(&aud, ENDPOINT));
    }
}
