use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::configure_oidc::managed_selector;
use super::{FsmEnv, SystemState, Transition};
use crate::constants::{ADMIN_BINDING_PREFIX, CLUSTER_ADMIN_ROLE, LABEL_KYMA_MANAGED_BY, MANAGED_BY_VALUE};
use crate::controller::runtime::cluster_client::RuntimeClusterClient;
use crate::crd::{ConditionStatus, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Object name for an administrator binding; subjects are usually e-mail addresses.
///
/// Sanitizing is lossy, so a digest of the raw subject keeps the name unique.
fn binding_name(administrator: &str) -> String {
    let sanitized: String = administrator
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    let digest = format!("{:x}", Sha256::digest(administrator.as_bytes()));
    format!(
        "{ADMIN_BINDING_PREFIX}-{}-{}",
        sanitized.trim_matches(|c| c == '-' || c == '.'),
        &digest[..8]
    )
}

fn admin_binding(administrator: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name(administrator)),
            labels: Some(BTreeMap::from([(
                LABEL_KYMA_MANAGED_BY.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: CLUSTER_ADMIN_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: Some(RBAC_API_GROUP.to_string()),
            kind: "User".to_string(),
            name: administrator.to_string(),
            namespace: None,
        }]),
    }
}

fn in_sync(existing: &ClusterRoleBinding, desired: &ClusterRoleBinding) -> bool {
    existing.role_ref == desired.role_ref && existing.subjects == desired.subjects
}

/// Bring the managed admin bindings in line with `administrators`
async fn sync_bindings(client: &dyn RuntimeClusterClient, administrators: &[String]) -> Result<(), Error> {
    let desired: BTreeMap<String, ClusterRoleBinding> = administrators
        .iter()
        .map(|admin| (binding_name(admin), admin_binding(admin)))
        .collect();

    let existing: BTreeMap<String, ClusterRoleBinding> = client
        .list_cluster_role_bindings(&managed_selector())
        .await?
        .into_iter()
        .map(|binding| (binding.name_any(), binding))
        .collect();

    for stale in existing.keys().filter(|name| !desired.contains_key(*name)) {
        debug!(binding = %stale, "removing admin binding");
        client.delete_cluster_role_binding(stale).await?;
    }

    for (name, binding) in &desired {
        if existing.get(name).is_some_and(|current| in_sync(current, binding)) {
            continue;
        }
        client.apply_cluster_role_binding(binding).await?;
        debug!(binding = %name, "applied admin binding");
    }
    Ok(())
}

pub(super) async fn run(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    let administrators = s.runtime.spec.security.administrators.clone();

    let result = match s.cluster_client(env.clusters.as_ref()).await {
        Ok(client) => sync_bindings(client.as_ref(), &administrators).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(shoot = s.shoot_name(), error = %e, "failed to apply cluster role bindings");
        s.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::KubernetesApiError,
            ConditionStatus::False,
            &format!("Failed to apply cluster role bindings, scheduling for retry - {e}"),
        );
        return Ok(Transition::RequeueAfter(env.requeue.control_plane));
    }

    info!(shoot = s.shoot_name(), "🎉 runtime is ready");
    s.update_condition(
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::ConfigurationCompleted,
        ConditionStatus::True,
        "Runtime processing completed successfully",
    );
    Ok(Transition::Stop)
}
