//! # Runtime Store
//!
//! Writes the Runtime reconciler makes to its own resource: finalizer bookkeeping
//! and status. Status is only patched when it differs from what was loaded, so a
//! no-op reconcile never produces a watch event.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::constants::{FIELD_MANAGER, RUNTIME_FINALIZER};
use crate::crd::{Runtime, RuntimeStatus};
use crate::error::Error;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuntimeStore: Send + Sync {
    async fn add_finalizer(&self, runtime: &Runtime) -> Result<(), Error>;

    async fn remove_finalizer(&self, runtime: &Runtime) -> Result<(), Error>;

    async fn patch_status(&self, runtime: &Runtime, status: &RuntimeStatus) -> Result<(), Error>;
}

pub fn has_finalizer(runtime: &Runtime) -> bool {
    runtime.finalizers().iter().any(|f| f == RUNTIME_FINALIZER)
}

#[derive(Clone)]
pub struct KubeRuntimeStore {
    client: Client,
}

impl std::fmt::Debug for KubeRuntimeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRuntimeStore").finish_non_exhaustive()
    }
}

impl KubeRuntimeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, runtime: &Runtime) -> Api<Runtime> {
        match runtime.namespace() {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    /// Merge patch of the finalizer list, guarded by the resource version
    async fn patch_finalizers(&self, runtime: &Runtime, finalizers: Vec<String>) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": runtime.resource_version(),
                "finalizers": finalizers,
            }
        });
        match self
            .api(runtime)
            .patch(&runtime.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
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

#[async_trait]
impl RuntimeStore for KubeRuntimeStore {
    async fn add_finalizer(&self, runtime: &Runtime) -> Result<(), Error> {
        if has_finalizer(runtime) {
            return Ok(());
        }
        let mut finalizers = runtime.finalizers().to_vec();
        finalizers.push(RUNTIME_FINALIZER.to_string());
        debug!(runtime = %runtime.name_any(), "adding finalizer");
        self.patch_finalizers(runtime, finalizers).await
    }

    async fn remove_finalizer(&self, runtime: &Runtime) -> Result<(), Error> {
        if !has_finalizer(runtime) {
            return Ok(());
        }
        let finalizers = runtime
            .finalizers()
            .iter()
            .filter(|f| *f != RUNTIME_FINALIZER)
            .cloned()
            .collect();
        debug!(runtime = %runtime.name_any(), "removing finalizer");
        self.patch_finalizers(runtime, finalizers).await
    }

    async fn patch_status(&self, runtime: &Runtime, status: &RuntimeStatus) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        match self
            .api(runtime)
            .patch_status(
                &runtime.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = Error::from(e);
                if err.is_not_found() {
                    debug!(runtime = %runtime.name_any(), "runtime gone before status update");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}
