//! # GardenerCluster
//!
//! Binding between a Runtime's shoot and the Secret holding its admin kubeconfig.

use super::status::{ConditionStatus, Conditions};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// GardenerCluster Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: infrastructuremanager.kyma-project.io/v1
/// kind: GardenerCluster
/// metadata:
///   name: 059dbc39-fd2b-4186-b0e5-8a1bc8ede5b8
///   namespace: kcp-system
/// spec:
///   shoot:
///     name: c-6ea9b9b
///   kubeconfig:
///     secret:
///       name: kubeconfig-059dbc39-fd2b-4186-b0e5-8a1bc8ede5b8
///       namespace: kcp-system
///       key: config
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "GardenerCluster",
    group = "infrastructuremanager.kyma-project.io",
    version = "v1",
    namespaced,
    status = "GardenerClusterStatus",
    shortname = "gc",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GardenerClusterSpec {
    pub shoot: ShootRef,
    pub kubeconfig: KubeconfigRef,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct ShootRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct KubeconfigRef {
    pub secret: SecretRef,
}

/// Location of the credential payload
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum GardenerClusterState {
    Processing,
    Ready,
    Error,
}

impl GardenerClusterState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "Processing",
            Self::Ready => "Ready",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GardenerClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<GardenerClusterState>,
    #[serde(default)]
    pub conditions: Conditions,
}

/// Single condition type tracked on a GardenerCluster
pub const CONDITION_KUBECONFIG_MANAGEMENT: &str = "KubeconfigManagement";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeconfigReason {
    SecretReading,
    SecretCreated,
    SecretRotated,
    SecretSynchronized,
    SecretReadFailed,
    SecretCreateFailed,
    SecretRotateFailed,
    SecretDuplicated,
}

impl KubeconfigReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecretReading => "KubeconfigSecretReading",
            Self::SecretCreated => "KubeconfigSecretCreated",
            Self::SecretRotated => "KubeconfigSecretRotated",
            Self::SecretSynchronized => "KubeconfigSecretSynchronized",
            Self::SecretReadFailed => "KubeconfigSecretReadFailed",
            Self::SecretCreateFailed => "KubeconfigSecretCreateFailed",
            Self::SecretRotateFailed => "KubeconfigSecretRotateFailed",
            Self::SecretDuplicated => "KubeconfigSecretDuplicated",
        }
    }

    fn state(self) -> GardenerClusterState {
        match self {
            Self::SecretReading => GardenerClusterState::Processing,
            Self::SecretCreated | Self::SecretRotated | Self::SecretSynchronized => {
                GardenerClusterState::Ready
            }
            Self::SecretReadFailed
            | Self::SecretCreateFailed
            | Self::SecretRotateFailed
            | Self::SecretDuplicated => GardenerClusterState::Error,
        }
    }

    fn status(self) -> ConditionStatus {
        match self.state() {
            GardenerClusterState::Processing => ConditionStatus::Unknown,
            GardenerClusterState::Ready => ConditionStatus::True,
            GardenerClusterState::Error => ConditionStatus::False,
        }
    }
}

impl GardenerCluster {
    pub fn runtime_id(&self) -> Option<&str> {
        self.labels()
            .get(crate::constants::LABEL_RUNTIME_ID)
            .map(String::as_str)
    }

    pub fn state(&self) -> Option<GardenerClusterState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    /// Record the kubeconfig management condition; the state follows the reason.
    pub fn update_condition(&mut self, reason: KubeconfigReason, message: &str) -> bool {
        let status = self.status.get_or_insert_with(GardenerClusterStatus::default);
        let changed = status.conditions.upsert(
            CONDITION_KUBECONFIG_MANAGEMENT,
            reason.as_str(),
            reason.status(),
            message,
        );
        status.state = Some(reason.state());
        changed
    }

    pub fn kubeconfig_condition_reason(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.get(CONDITION_KUBECONFIG_MANAGEMENT))
            .map(|c| c.reason.as_str())
    }
}
