//! Looks for registry-cache configuration on a managed cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};

#[cfg(test)]
use mockall::automock;

use crate::controller::runtime::cluster_client::{client_from_kubeconfig, kubeconfig_yaml};
use crate::error::Error;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryCacheExplorer: Send + Sync {
    /// Whether any `CustomConfig` on the cluster behind `kubeconfig` asks for a registry cache
    async fn registry_cache_configured(&self, kubeconfig: &Secret) -> Result<bool, Error>;
}

fn custom_config_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "infrastructuremanager.kyma-project.io",
        "v1",
        "CustomConfig",
    ))
}

fn requests_registry_cache(config: &DynamicObject) -> bool {
    config.data["spec"]["registryCache"]
        .as_array()
        .is_some_and(|caches| !caches.is_empty())
}

/// Lists `CustomConfig` objects through a client built from the kubeconfig secret
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeRegistryCacheExplorer;

#[async_trait]
impl RegistryCacheExplorer for KubeRegistryCacheExplorer {
    async fn registry_cache_configured(&self, kubeconfig: &Secret) -> Result<bool, Error> {
        let client = client_from_kubeconfig(kubeconfig_yaml(kubeconfig)?).await?;
        let configs: Api<DynamicObject> = Api::all_with(client, &custom_config_resource());
        let list = configs.list(&ListParams::default()).await?;
        Ok(list.items.iter().any(requests_registry_cache))
    }
}
