//! # Credential Stores
//!
//! The reads and writes the credential controller makes: kubeconfig secrets and
//! the `GardenerCluster` bindings themselves.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::constants::{ANNOTATION_FORCE_ROTATION, FIELD_MANAGER};
use crate::crd::{GardenerCluster, GardenerClusterStatus};
use crate::error::Error;

/// Kubeconfig secrets, looked up across namespaces by label
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn list(&self, label_selector: &str) -> Result<Vec<Secret>, Error>;

    async fn create(&self, secret: &Secret) -> Result<(), Error>;

    /// Full replace, guarded by the secret's resource version
    async fn replace(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret; absence is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait GardenerClusterStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<GardenerCluster>, Error>;

    async fn patch_status(
        &self,
        cluster: &GardenerCluster,
        status: &GardenerClusterStatus,
    ) -> Result<(), Error>;

    /// Consume the force-rotation marker once the secret has been rotated
    async fn remove_force_rotation(&self, cluster: &GardenerCluster) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced(&self, secret: &Secret) -> Api<Secret> {
        match secret.namespace() {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn list(&self, label_selector: &str) -> Result<Vec<Secret>, Error> {
        let secrets: Api<Secret> = Api::all(self.client.clone());
        let list = secrets
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create(&self, secret: &Secret) -> Result<(), Error> {
        self.namespaced(secret)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn replace(&self, secret: &Secret) -> Result<(), Error> {
        self.namespaced(secret)
            .replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = Error::from(e);
                if err.is_not_found() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct KubeGardenerClusterStore {
    client: Client,
}

impl std::fmt::Debug for KubeGardenerClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeGardenerClusterStore")
            .finish_non_exhaustive()
    }
}

impl KubeGardenerClusterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, cluster: &GardenerCluster) -> Api<GardenerCluster> {
        match cluster.namespace() {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl GardenerClusterStore for KubeGardenerClusterStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<GardenerCluster>, Error> {
        let clusters: Api<GardenerCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(clusters.get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        cluster: &GardenerCluster,
        status: &GardenerClusterStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        match self
            .api(cluster)
            .patch_status(
                &cluster.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = Error::from(e);
                if err.is_not_found() {
                    debug!(cluster = %cluster.name_any(), "binding gone before status update");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn remove_force_rotation(&self, cluster: &GardenerCluster) -> Result<(), Error> {
        if !cluster.annotations().contains_key(ANNOTATION_FORCE_ROTATION) {
            return Ok(());
        }
        let patch = serde_json::json!({
            "metadata": { "annotations": { ANNOTATION_FORCE_ROTATION: null } }
        });
        self.api(cluster)
            .patch(
                &cluster.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// In-memory stores for behavioural tests
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    fn matches(labels: &BTreeMap<String, String>, selector: &str) -> bool {
        selector.split(',').all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
            None => false,
        })
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeSecrets {
        pub secrets: Mutex<Vec<Secret>>,
        pub writes: Mutex<usize>,
        pub fail_list: bool,
    }

    impl FakeSecrets {
        pub(crate) fn with(secrets: Vec<Secret>) -> Self {
            Self {
                secrets: Mutex::new(secrets),
                ..Self::default()
            }
        }

        fn count_write(&self) {
            *self.writes.lock().unwrap() += 1;
        }
    }

    #[async_trait]
    impl SecretStore for FakeSecrets {
        async fn list(&self, label_selector: &str) -> Result<Vec<Secret>, Error> {
            if self.fail_list {
                return Err(Error::invariant("secret list unavailable"));
            }
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .iter()
                .filter(|s| matches(s.labels(), label_selector))
                .cloned()
                .collect())
        }

        async fn create(&self, secret: &Secret) -> Result<(), Error> {
            self.count_write();
            self.secrets.lock().unwrap().push(secret.clone());
            Ok(())
        }

        async fn replace(&self, secret: &Secret) -> Result<(), Error> {
            self.count_write();
            let mut secrets = self.secrets.lock().unwrap();
            let existing = secrets
                .iter_mut()
                .find(|s| s.name_any() == secret.name_any() && s.namespace() == secret.namespace())
                .ok_or_else(|| Error::not_found("Secret", secret.name_any()))?;
            *existing = secret.clone();
            Ok(())
        }

        async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
            self.count_write();
            self.secrets
                .lock()
                .unwrap()
                .retain(|s| !(s.name_any() == name && s.namespace().as_deref() == Some(namespace)));
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeClusters {
        pub clusters: Mutex<Vec<GardenerCluster>>,
        pub statuses: Mutex<Vec<GardenerClusterStatus>>,
        pub force_removed: Mutex<Vec<String>>,
        pub fail_force_removal: bool,
    }

    impl FakeClusters {
        pub(crate) fn with(cluster: GardenerCluster) -> Self {
            Self {
                clusters: Mutex::new(vec![cluster]),
                ..Self::default()
            }
        }

        pub(crate) fn last_status(&self) -> Option<GardenerClusterStatus> {
            self.statuses.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl GardenerClusterStore for FakeClusters {
        async fn get(&self, namespace: &str, name: &str) -> Result<Option<GardenerCluster>, Error> {
            Ok(self
                .clusters
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.name_any() == name && c.namespace().as_deref() == Some(namespace))
                .cloned())
        }

        async fn patch_status(
            &self,
            _cluster: &GardenerCluster,
            status: &GardenerClusterStatus,
        ) -> Result<(), Error> {
            self.statuses.lock().unwrap().push(status.clone());
            Ok(())
        }

        async fn remove_force_rotation(&self, cluster: &GardenerCluster) -> Result<(), Error> {
            if self.fail_force_removal {
                return Err(Error::not_found("GardenerCluster", cluster.name_any()));
            }
            self.force_removed.lock().unwrap().push(cluster.name_any());
            Ok(())
        }
    }
}
