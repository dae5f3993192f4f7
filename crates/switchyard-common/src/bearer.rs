//! Bearer credential codec and request-metadata extraction
//!
//! Principals authenticate against the controller with a bearer credential:
//! base64 over a JSON record naming the principal and carrying the secret
//! token. The router reuses only the metadata extraction; its bearer value
//! is a signed capability token, opaque at this layer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tonic::metadata::MetadataMap;

use crate::{Error, Result};

/// Metadata key carrying the bearer credential
const AUTHORIZATION_KEY: &str = "authorization";

/// Scheme prefix on the metadata value
const BEARER_PREFIX: &str = "Bearer ";

/// A decoded principal-bearer credential
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BearerCredential {
    /// Namespace of the principal
    pub namespace: String,
    /// Name of the principal
    pub name: String,
    /// Secret token compared against the principal's stored credentials
    pub token: String,
}

impl BearerCredential {
    /// Create a credential for a principal
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            token: token.into(),
        }
    }

    /// Encode into the wire form: base64 over the JSON record
    pub fn encode(&self) -> String {
        // Serializing a struct of strings cannot fail
        let json = serde_json::to_vec(self).expect("bearer credential serializes");
        STANDARD.encode(json)
    }

    /// Decode from the wire form
    pub fn decode(encoded: &str) -> Result<Self> {
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| Error::credential("failed to decode token"))?;
        serde_json::from_slice(&decoded)
            .map_err(|_| Error::credential("failed to unmarshal token"))
    }
}

/// Extract the raw bearer value from request metadata.
///
/// Returns the value after the `Bearer ` prefix without interpreting it;
/// the controller decodes it as a [`BearerCredential`], the router treats
/// it as a capability token.
pub fn bearer_from_metadata(metadata: &MetadataMap) -> Result<&str> {
    let value = metadata
        .get(AUTHORIZATION_KEY)
        .ok_or_else(|| Error::credential("missing authorization metadata"))?;
    let value = value
        .to_str()
        .map_err(|_| Error::credential("authorization metadata is not valid ascii"))?;
    value
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| Error::credential("authorization metadata is not a bearer credential"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn test_encode_decode_round_trip() {
        let credential = BearerCredential::new("lab", "exporter-01", "s3cret");
        let decoded = BearerCredential::decode(&credential.encode()).unwrap();
        assert_eq!(decoded, credential);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = BearerCredential::decode("not-base64!!!").unwrap_err();
        assert!(err.to_string().contains("failed to decode"));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let encoded = STANDARD.encode(b"not json");
        let err = BearerCredential::decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("failed to unmarshal"));
    }

    #[test]
    fn test_bearer_from_metadata() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "authorization",
            MetadataValue::try_from("Bearer abc123").unwrap(),
        );
        assert_eq!(bearer_from_metadata(&metadata).unwrap(), "abc123");
    }

    #[test]
    fn test_bearer_from_metadata_missing() {
        let metadata = MetadataMap::new();
        assert!(bearer_from_metadata(&metadata).is_err());
    }

    #[test]
    fn test_bearer_from_metadata_wrong_scheme() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "authorization",
            MetadataValue::try_from("Basic dXNlcjpwdw==").unwrap(),
        );
        assert!(bearer_from_metadata(&metadata).is_err());
    }
}
