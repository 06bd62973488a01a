//! Runtime reads and the single field the custom config reconciler writes.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::constants::CUSTOM_CONFIG_FIELD_MANAGER;
use crate::crd::Runtime;
use crate::error::Error;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuntimeCachingStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Runtime>, Error>;

    /// Set `spec.caching.enabled`, leaving the rest of the spec alone
    async fn set_caching(&self, runtime: &Runtime, enabled: bool) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct KubeRuntimeCachingStore {
    client: Client,
}

impl std::fmt::Debug for KubeRuntimeCachingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRuntimeCachingStore").finish_non_exhaustive()
    }
}

impl KubeRuntimeCachingStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RuntimeCachingStore for KubeRuntimeCachingStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Runtime>, Error> {
        let api: Api<Runtime> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn set_caching(&self, runtime: &Runtime, enabled: bool) -> Result<(), Error> {
        let namespace = runtime.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Runtime> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({
            "spec": { "caching": { "enabled": enabled } }
        });
        api.patch(
            &runtime.name_any(),
            &PatchParams::apply(CUSTOM_CONFIG_FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}
