//! # Managed Cluster Client
//!
//! Access to the managed cluster a Runtime provisions. The client is built from the
//! kubeconfig secret the credential controller maintains (`kubeconfig-<runtime-id>`),
//! and exposes only the writes the configuration states perform.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};

use crate::constants::{FIELD_MANAGER, KUBECONFIG_SECRET_KEY, KUBECONFIG_SECRET_PREFIX};
use crate::crd::Runtime;
use crate::error::Error;
use crate::gardener::OpenIDConnect;

/// Builds clients for managed clusters
#[async_trait]
pub trait RuntimeClientGetter: Send + Sync {
    async fn client_for(&self, runtime: &Runtime) -> Result<Arc<dyn RuntimeClusterClient>, Error>;
}

/// Writes performed on a managed cluster.
///
/// Creates report `AlreadyExists` as an error; callers decide whether it matters.
#[async_trait]
pub trait RuntimeClusterClient: Send + Sync {
    async fn create_namespace(&self, name: &str) -> Result<(), Error>;

    /// Server-side apply
    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    async fn list_oidc(&self, label_selector: &str) -> Result<Vec<OpenIDConnect>, Error>;

    async fn create_oidc(&self, oidc: &OpenIDConnect) -> Result<(), Error>;

    async fn delete_oidc(&self, name: &str) -> Result<(), Error>;

    async fn list_cluster_role_bindings(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ClusterRoleBinding>, Error>;

    /// Server-side apply
    async fn apply_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<(), Error>;

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error>;
}

/// Reads kubeconfig secrets from the control plane namespace of each Runtime
#[derive(Clone)]
pub struct KubeconfigSecretClientGetter {
    client: Client,
}

impl std::fmt::Debug for KubeconfigSecretClientGetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeconfigSecretClientGetter")
            .finish_non_exhaustive()
    }
}

impl KubeconfigSecretClientGetter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

pub fn kubeconfig_secret_name(runtime_id: &str) -> String {
    format!("{KUBECONFIG_SECRET_PREFIX}{runtime_id}")
}

#[async_trait]
impl RuntimeClientGetter for KubeconfigSecretClientGetter {
    async fn client_for(&self, runtime: &Runtime) -> Result<Arc<dyn RuntimeClusterClient>, Error> {
        let runtime_id = runtime
            .runtime_id()
            .ok_or_else(|| Error::validation("runtime has no runtime-id label"))?;
        let namespace = runtime.namespace().unwrap_or_else(|| "default".to_string());
        let secret_name = kubeconfig_secret_name(runtime_id);

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let secret = secrets
            .get_opt(&secret_name)
            .await?
            .ok_or_else(|| Error::not_found("Secret", format!("{namespace}/{secret_name}")))?;

        let client = client_from_kubeconfig(kubeconfig_yaml(&secret)?).await?;
        Ok(Arc::new(KubeClusterClient { client }))
    }
}

/// The kubeconfig payload of a secret written by the credential controller
pub(crate) fn kubeconfig_yaml(secret: &Secret) -> Result<&str, Error> {
    let secret_name = secret.name_any();
    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
        .ok_or_else(|| {
            Error::Kubeconfig(format!("secret {secret_name} has no '{KUBECONFIG_SECRET_KEY}' key"))
        })?;
    std::str::from_utf8(&raw.0)
        .map_err(|e| Error::Kubeconfig(format!("secret {secret_name} is not UTF-8: {e}")))
}

pub(crate) async fn client_from_kubeconfig(yaml: &str) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| Error::Kubeconfig(e.to_string()))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::Kubeconfig(e.to_string()))?;
    Ok(Client::try_from(config)?)
}

/// Kube-backed client for one managed cluster
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
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

#[async_trait]
impl RuntimeClusterClient for KubeClusterClient {
    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        namespaces.create(&PostParams::default(), &namespace).await?;
        Ok(())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let namespace = config_map
            .namespace()
            .ok_or_else(|| Error::invariant("config map without a namespace"))?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &config_map.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(config_map),
        )
        .await?;
        Ok(())
    }

    async fn list_oidc(&self, label_selector: &str) -> Result<Vec<OpenIDConnect>, Error> {
        let api: Api<OpenIDConnect> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items)
    }

    async fn create_oidc(&self, oidc: &OpenIDConnect) -> Result<(), Error> {
        let api: Api<OpenIDConnect> = Api::all(self.client.clone());
        api.create(&PostParams::default(), oidc).await?;
        Ok(())
    }

    async fn delete_oidc(&self, name: &str) -> Result<(), Error> {
        let api: Api<OpenIDConnect> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn list_cluster_role_bindings(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ClusterRoleBinding>, Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items)
    }

    async fn apply_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.patch(
            &binding.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(binding),
        )
        .await?;
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }
}
