//! Bootstraps the managed cluster: the system namespace and the provisioning-info
//! config map that in-cluster components read to learn where they run.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde::Serialize;
use tracing::{debug, warn};

use super::{FsmEnv, StateId, SystemState, Transition};
use crate::constants::{
    KYMA_SYSTEM_NAMESPACE, LABEL_GLOBAL_ACCOUNT_ID, LABEL_SUBACCOUNT_ID, PROVISIONING_INFO_CONFIG_MAP,
};
use crate::crd::{ConditionStatus, Runtime, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;
use crate::gardener::types::Worker;

const PROVISIONING_INFO_KEY: &str = "details";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisioningInfo<'a> {
    #[serde(rename = "globalAccountID")]
    global_account_id: &'a str,
    #[serde(rename = "subaccountID")]
    subaccount_id: &'a str,
    infrastructure_provider: &'a str,
    region: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform_region: Option<&'a str>,
    worker_pools: WorkerPools<'a>,
}

#[derive(Debug, Serialize)]
struct WorkerPools<'a> {
    kyma: WorkerPool<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    custom: Vec<WorkerPool<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerPool<'a> {
    name: &'a str,
    machine_type: &'a str,
    ha_zones: bool,
    auto_scaler_min: i32,
    auto_scaler_max: i32,
}

impl<'a> From<&'a Worker> for WorkerPool<'a> {
    fn from(worker: &'a Worker) -> Self {
        Self {
            name: &worker.name,
            machine_type: &worker.machine.r#type,
            ha_zones: worker.zones.len() > 1,
            auto_scaler_min: worker.minimum,
            auto_scaler_max: worker.maximum,
        }
    }
}

fn label<'a>(runtime: &'a Runtime, key: &str) -> &'a str {
    runtime.labels().get(key).map_or("", String::as_str)
}

/// Config map describing the runtime, keyed `details` as YAML
pub fn provisioning_info_config_map(runtime: &Runtime) -> Result<ConfigMap, Error> {
    let shoot = &runtime.spec.shoot;

    let kyma = shoot
        .provider
        .workers
        .first()
        .ok_or_else(|| Error::validation("runtime declares no worker pool"))?;

    let info = ProvisioningInfo {
        global_account_id: label(runtime, LABEL_GLOBAL_ACCOUNT_ID),
        subaccount_id: label(runtime, LABEL_SUBACCOUNT_ID),
        infrastructure_provider: &shoot.provider.r#type,
        region: &shoot.region,
        platform_region: shoot.platform_region.as_deref(),
        worker_pools: WorkerPools {
            kyma: kyma.into(),
            custom: shoot
                .provider
                .additional_workers
                .iter()
                .flatten()
                .map(WorkerPool::from)
                .collect(),
        },
    };

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(PROVISIONING_INFO_CONFIG_MAP.to_string()),
            namespace: Some(KYMA_SYSTEM_NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            PROVISIONING_INFO_KEY.to_string(),
            serde_yaml::to_string(&info)?,
        )])),
        ..ConfigMap::default()
    })
}

pub(super) async fn run(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    let client = match s.cluster_client(env.clusters.as_ref()).await {
        Ok(client) => client,
        Err(e) => {
            warn!(shoot = s.shoot_name(), error = %e, "cannot reach the runtime cluster");
            s.update_condition(
                RuntimeConditionType::OidcAndCMsConfigured,
                RuntimeConditionReason::KubernetesApiError,
                ConditionStatus::False,
                &format!("Failed to get runtime cluster client, scheduling for retry - {e}"),
            );
            return Ok(Transition::RequeueAfter(env.requeue.control_plane));
        }
    };

    match client.create_namespace(KYMA_SYSTEM_NAMESPACE).await {
        Ok(()) => debug!(shoot = s.shoot_name(), "created {KYMA_SYSTEM_NAMESPACE} namespace"),
        Err(e) if e.is_already_exists() => {}
        Err(e) => {
            warn!(shoot = s.shoot_name(), error = %e, "failed to create {KYMA_SYSTEM_NAMESPACE} namespace");
            s.update_condition(
                RuntimeConditionType::OidcAndCMsConfigured,
                RuntimeConditionReason::OidcError,
                ConditionStatus::False,
                "Failed to create kyma-system namespace. Scheduling for retry",
            );
            return Ok(Transition::RequeueAfter(env.requeue.control_plane));
        }
    }

    let applied = match provisioning_info_config_map(&s.runtime) {
        Ok(config_map) => client.apply_config_map(&config_map).await,
        Err(e) => Err(e),
    };
    if let Err(e) = applied {
        let message =
            format!("Failed to apply {PROVISIONING_INFO_CONFIG_MAP} config map, scheduling for retry - {e}");
        warn!(shoot = s.shoot_name(), "{message}");
        s.update_condition(
            RuntimeConditionType::OidcAndCMsConfigured,
            RuntimeConditionReason::OidcAndCMsConfigured,
            ConditionStatus::False,
            &message,
        );
        return Ok(Transition::RequeueAfter(env.requeue.control_plane));
    }
    debug!(shoot = s.shoot_name(), "{PROVISIONING_INFO_CONFIG_MAP} config map is up to date");

    Ok(Transition::Switch(StateId::ConfigureOidc))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testutils::*;
    use super::*;
    use crate::controller::runtime::cluster_client::fake::FakeCluster;
    use crate::controller::runtime::store::MockRuntimeStore;
    use crate::converter::extender::testutils::worker;
    use crate::gardener::client::MockShootClient;

    #[test]
    fn test_provisioning_info_details() {
        let mut rt = runtime();
        rt.spec.shoot.platform_region = Some("cf-eu10".to_string());
        rt.spec.shoot.provider.additional_workers = Some(vec![worker("gpu", &["eu-central-1a"])]);

        let config_map = provisioning_info_config_map(&rt).unwrap();
        assert_eq!(config_map.metadata.namespace.as_deref(), Some("kyma-system"));

        let details: serde_yaml::Value =
            serde_yaml::from_str(&config_map.data.unwrap()[PROVISIONING_INFO_KEY]).unwrap();
        assert_eq!(details["globalAccountID"].as_str(), Some("ga-1"));
        assert_eq!(details["subaccountID"].as_str(), Some("sa-1"));
        assert_eq!(details["infrastructureProvider"].as_str(), Some("aws"));
        assert_eq!(details["platformRegion"].as_str(), Some("cf-eu10"));
        assert_eq!(details["workerPools"]["kyma"]["machineType"].as_str(), Some("m6i.large"));
        assert_eq!(details["workerPools"]["kyma"]["haZones"].as_bool(), Some(true));
        assert_eq!(details["workerPools"]["custom"][0]["name"].as_str(), Some("gpu"));
        assert_eq!(details["workerPools"]["custom"][0]["haZones"].as_bool(), Some(false));
    }

    #[tokio::test]
    async fn test_bootstraps_cluster_and_tolerates_existing_namespace() {
        let cluster = Arc::new(FakeCluster::default());
        cluster
            .namespaces
            .lock()
            .unwrap()
            .push(KYMA_SYSTEM_NAMESPACE.to_string());
        let env = env_with(MockShootClient::new(), MockRuntimeStore::new(), Arc::clone(&cluster));

        let mut s = SystemState::new(runtime(), None);
        let transition = run(&env, &mut s).await.unwrap();

        assert_eq!(transition, Transition::Switch(StateId::ConfigureOidc));
        assert_eq!(cluster.namespaces.lock().unwrap().len(), 1);
        let config_maps = cluster.config_maps.lock().unwrap();
        assert_eq!(config_maps.len(), 1);
        assert_eq!(config_maps[0].name_any(), PROVISIONING_INFO_CONFIG_MAP);
    }

    #[tokio::test]
    async fn test_invalid_runtime_fails_config_map() {
        let env = env();
        let mut rt = runtime();
        rt.spec.shoot.provider.workers.clear();

        let mut s = SystemState::new(rt, None);
        let transition = run(&env, &mut s).await.unwrap();

        assert_eq!(transition, Transition::RequeueAfter(env.requeue.control_plane));
        let configured = condition(&s, RuntimeConditionType::OidcAndCMsConfigured);
        assert_eq!(configured.status, ConditionStatus::False);
        assert!(configured
            .message
            .starts_with("Failed to apply kyma-provisioning-info config map"));
    }
}
