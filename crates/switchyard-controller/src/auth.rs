//! Principal-bearer authentication
//!
//! The controller authenticates both exporters and client identities the
//! same way: decode the bearer credential from request metadata, fetch the
//! named principal from the directory, and compare the presented token
//! against each referenced credential secret. Comparison is constant-time.
//! Authentication never writes to the directory.

use subtle::ConstantTimeEq;
use tonic::metadata::MetadataMap;
use tracing::debug;

use switchyard_common::bearer::{bearer_from_metadata, BearerCredential};
use switchyard_common::crd::{ClientIdentity, CredentialRef, Exporter};
use switchyard_common::{Error, Result};
use switchyard_directory::Directory;

/// Decode the bearer credential carried in request metadata
fn decode_credential(metadata: &MetadataMap) -> Result<BearerCredential> {
    BearerCredential::decode(bearer_from_metadata(metadata)?)
}

/// Whether any referenced credential secret matches the presented token
async fn matches_any_credential(
    directory: &dyn Directory,
    references: &[CredentialRef],
    presented: &str,
) -> Result<bool> {
    for reference in references {
        let Some(stored) = directory.credential_token(reference).await? else {
            continue;
        };
        if stored.ct_eq(presented.as_bytes()).into() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Authenticate the caller as an exporter
pub async fn authenticate_exporter(
    directory: &dyn Directory,
    metadata: &MetadataMap,
) -> Result<Exporter> {
    let credential = decode_credential(metadata)?;
    let exporter = directory
        .exporter(&credential.namespace, &credential.name)
        .await?;

    if matches_any_credential(directory, &exporter.spec.credentials, &credential.token).await? {
        debug!(exporter = %credential.name, "Exporter authenticated");
        Ok(exporter)
    } else {
        Err(Error::no_matching_credential(
            credential.namespace,
            credential.name,
        ))
    }
}

/// Authenticate the caller as a client identity
pub async fn authenticate_client(
    directory: &dyn Directory,
    metadata: &MetadataMap,
) -> Result<ClientIdentity> {
    let credential = decode_credential(metadata)?;
    let identity = directory
        .client_identity(&credential.namespace, &credential.name)
        .await?;

    if matches_any_credential(directory, &identity.spec.credentials, &credential.token).await? {
        debug!(identity = %credential.name, "Client identity authenticated");
        Ok(identity)
    } else {
        Err(Error::no_matching_credential(
            credential.namespace,
            credential.name,
        ))
    }
}
