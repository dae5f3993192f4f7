//! Directory records for switchyard principals
//!
//! `Exporter` and `ClientIdentity` are the two principal kinds. Both carry a
//! list of credential references pointing at opaque secrets whose `token`
//! field is compared against presented bearer credentials. The exporter
//! additionally has a status subresource the controller publishes on
//! register/unregister; the directory is the system of record for it.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type published on exporter status
pub const CONDITION_AVAILABLE: &str = "Available";

/// Condition reason set when an exporter registers
pub const REASON_REGISTER: &str = "Register";

/// Condition reason set when an exporter unregisters
pub const REASON_BYE: &str = "Bye";

/// Reference to an opaque secret holding a credential `token`
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRef {
    /// Namespace of the secret
    pub namespace: String,
    /// Name of the secret
    pub name: String,
}

/// Spec for an Exporter, a remote agent publishing hardware under test
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "switchyard.dev",
    version = "v1alpha1",
    kind = "Exporter",
    plural = "exporters",
    namespaced,
    status = "ExporterStatus",
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type=='Available')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    /// Credentials this exporter may authenticate with
    #[serde(default)]
    pub credentials: Vec<CredentialRef>,
}

/// Spec for a ClientIdentity, a user principal that initiates sessions
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "switchyard.dev",
    version = "v1alpha1",
    kind = "ClientIdentity",
    plural = "clientidentities",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentitySpec {
    /// Credentials this identity may authenticate with
    #[serde(default)]
    pub credentials: Vec<CredentialRef>,
}

/// A piece of hardware published by an exporter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable device identifier
    pub uuid: String,
    /// Free-form labels (board, arch, rack position, ...)
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Availability condition on an exporter's status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExporterCondition {
    /// Condition type, currently always `Available`
    #[serde(rename = "type")]
    pub type_: String,
    /// `"True"` or `"False"`
    pub status: String,
    /// Generation of the record the condition was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// RFC 3339 timestamp of the last status flip
    pub last_transition_time: String,
    /// Machine-readable reason (`Register`, `Bye`)
    pub reason: String,
    /// Human-readable detail; the unregister reason ends up here
    #[serde(default)]
    pub message: String,
}

/// Status subresource of an Exporter, written by the controller only
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExporterStatus {
    /// Availability conditions; the controller replaces the list wholesale
    #[serde(default)]
    pub conditions: Vec<ExporterCondition>,
    /// Devices reported at last register; replaced wholesale
    #[serde(default)]
    pub devices: Vec<Device>,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl ExporterStatus {
    /// Status published when an exporter registers
    pub fn registered(observed_generation: i64, devices: Vec<Device>) -> Self {
        Self {
            conditions: vec![ExporterCondition {
                type_: CONDITION_AVAILABLE.to_string(),
                status: "True".to_string(),
                observed_generation: Some(observed_generation),
                last_transition_time: now_rfc3339(),
                reason: REASON_REGISTER.to_string(),
                message: String::new(),
            }],
            devices,
        }
    }

    /// Status published when an exporter unregisters with the given reason
    pub fn unregistered(observed_generation: i64, message: impl Into<String>) -> Self {
        Self {
            conditions: vec![ExporterCondition {
                type_: CONDITION_AVAILABLE.to_string(),
                status: "False".to_string(),
                observed_generation: Some(observed_generation),
                last_transition_time: now_rfc3339(),
                reason: REASON_BYE.to_string(),
                message: message.into(),
            }],
            devices: Vec::new(),
        }
    }

    /// Whether the status reports the exporter as available
    pub fn is_available(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == CONDITION_AVAILABLE && c.status == "True")
    }
}
