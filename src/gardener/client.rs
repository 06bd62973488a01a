//! # Gardener Client
//!
//! Capability traits over the Gardener project namespace, and their kube-backed
//! implementation. Every call acquires a rate-limiter token and carries an
//! explicit request timeout.

use async_trait::async_trait;
use base64::Engine;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::rate_limit::RateLimiter;
use super::types::Shoot;
use crate::constants::{ANNOTATION_CONFIRM_DELETION, FIELD_MANAGER};
use crate::error::Error;

/// Operations the runtime state machine needs on shoots
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShootClient: Send + Sync {
    /// Fetch a shoot; `None` when it does not exist
    async fn get(&self, name: &str) -> Result<Option<Shoot>, Error>;

    async fn create(&self, shoot: &Shoot) -> Result<(), Error>;

    /// Server-side apply of the fields the converter owns
    async fn apply(&self, shoot: &Shoot) -> Result<(), Error>;

    /// Set the deletion confirmation annotation Gardener requires before delete
    async fn confirm_deletion(&self, name: &str) -> Result<(), Error>;

    /// Delete a shoot; absence is not an error
    async fn delete(&self, name: &str) -> Result<(), Error>;
}

/// Issues admin credentials for a cluster
///
/// The only contract the credential controller needs from the issuance side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeconfigProvider: Send + Sync {
    async fn fetch(&self, cluster_name: &str) -> Result<String, Error>;
}

/// Kube-backed client scoped to one Gardener project namespace
pub struct GardenerClient {
    shoots: Api<Shoot>,
    limiter: Arc<RateLimiter>,
    request_timeout: Duration,
    kubeconfig_expiration: Duration,
}

impl std::fmt::Debug for GardenerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GardenerClient")
            .field("request_timeout", &self.request_timeout)
            .field("kubeconfig_expiration", &self.kubeconfig_expiration)
            .finish_non_exhaustive()
    }
}

impl GardenerClient {
    pub fn new(
        client: Client,
        namespace: &str,
        limiter: Arc<RateLimiter>,
        request_timeout: Duration,
        kubeconfig_expiration: Duration,
    ) -> Self {
        Self {
            shoots: Api::namespaced(client, namespace),
            limiter,
            request_timeout,
            kubeconfig_expiration,
        }
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        self.limiter.acquire().await;
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_elapsed) => Err(Error::Timeout {
                operation: operation.to_string(),
                seconds: self.request_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl ShootClient for GardenerClient {
    async fn get(&self, name: &str) -> Result<Option<Shoot>, Error> {
        self.call("get shoot", self.shoots.get_opt(name)).await
    }

    async fn create(&self, shoot: &Shoot) -> Result<(), Error> {
        self.call(
            "create shoot",
            self.shoots.create(&PostParams::default(), shoot),
        )
        .await?;
        Ok(())
    }

    async fn apply(&self, shoot: &Shoot) -> Result<(), Error> {
        let name = shoot
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::invariant("shoot without a name"))?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.call("patch shoot", self.shoots.patch(name, &params, &Patch::Apply(shoot)))
            .await?;
        Ok(())
    }

    async fn confirm_deletion(&self, name: &str) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "annotations": { (ANNOTATION_CONFIRM_DELETION): "true" }
            }
        });
        match self
            .call(
                "annotate shoot",
                self.shoots
                    .patch(name, &PatchParams::default(), &Patch::Merge(&patch)),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        match self
            .call("delete shoot", self.shoots.delete(name, &DeleteParams::default()))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(shoot = name, "shoot already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Deserialize)]
struct AdminKubeconfigResponse {
    status: AdminKubeconfigStatus,
}

#[derive(Deserialize)]
struct AdminKubeconfigStatus {
    /// Base64 encoded kubeconfig
    kubeconfig: String,
}

#[async_trait]
impl KubeconfigProvider for GardenerClient {
    async fn fetch(&self, cluster_name: &str) -> Result<String, Error> {
        let request = serde_json::json!({
            "apiVersion": "authentication.gardener.cloud/v1alpha1",
            "kind": "AdminKubeconfigRequest",
            "spec": { "expirationSeconds": self.kubeconfig_expiration.as_secs() }
        });
        let body = serde_json::to_vec(&request)?;

        let response: AdminKubeconfigResponse = self
            .call(
                "request admin kubeconfig",
                self.shoots.create_subresource(
                    "adminkubeconfig",
                    cluster_name,
                    &PostParams::default(),
                    body,
                ),
            )
            .await
            .map_err(|e| Error::fetch(cluster_name, e.to_string()))?;

        decode_kubeconfig(cluster_name, &response.status.kubeconfig)
    }
}

fn decode_kubeconfig(cluster_name: &str, encoded: &str) -> Result<String, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::fetch(cluster_name, format!("kubeconfig is not base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::fetch(cluster_name, format!("kubeconfig is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kubeconfig() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("apiVersion: v1\nkind: Config\n");
        let decoded = decode_kubeconfig("c1", &encoded).unwrap();
        assert!(decoded.starts_with("apiVersion: v1"));
    }

    #[test]
    fn test_decode_kubeconfig_rejects_garbage() {
        let err = decode_kubeconfig("c1", "%%%").unwrap_err();
        assert!(matches!(err, Error::KubeconfigFetch { ref cluster, .. } if cluster == "c1"));
    }
}
