//! # Custom Config Reconciler
//!
//! Mirrors customer registry-cache configuration into `Runtime.spec.caching`.
//!
//! Every kubeconfig secret written by the credential controller is an entry point:
//! the secret names its Runtime through the runtime-id label and grants access to
//! the managed cluster, where `CustomConfig` objects are inspected. The Runtime is
//! only written when the flag disagrees with what the cluster holds.

pub mod explorer;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, Instrument};

use crate::constants::{LABEL_OPERATOR_MANAGED_BY, LABEL_RUNTIME_ID, MANAGED_BY_VALUE};
use crate::error::Error;
use crate::observability::metrics;
use crate::runtime::error_policy::{handle_reconciliation_error, resource_key, BackoffStates};
use explorer::RegistryCacheExplorer;
use store::RuntimeCachingStore;

pub const CONTROLLER_NAME: &str = "custom-config";

/// Shared reconciler context
pub struct Context {
    pub explorer: Arc<dyn RegistryCacheExplorer>,
    pub runtimes: Arc<dyn RuntimeCachingStore>,
    pub recheck_interval: Duration,
    pub backoffs: BackoffStates,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("recheck_interval", &self.recheck_interval)
            .finish_non_exhaustive()
    }
}

/// Label selector for the secrets this controller watches
pub fn kubeconfig_secret_selector() -> String {
    format!("{LABEL_OPERATOR_MANAGED_BY}={MANAGED_BY_VALUE}")
}

/// Runtime a kubeconfig secret belongs to, if we manage it
fn managed_runtime_id(secret: &Secret) -> Option<&str> {
    let labels = secret.metadata.labels.as_ref()?;
    if labels.get(LABEL_OPERATOR_MANAGED_BY).map(String::as_str) != Some(MANAGED_BY_VALUE) {
        return None;
    }
    labels.get(LABEL_RUNTIME_ID).map(String::as_str)
}

async fn reconcile_secret(secret: &Secret, ctx: &Context) -> Result<Action, Error> {
    let Some(runtime_id) = managed_runtime_id(secret) else {
        debug!("secret does not hold a managed kubeconfig");
        return Ok(Action::await_change());
    };
    let namespace = secret.namespace().unwrap_or_else(|| "default".to_string());

    let Some(runtime) = ctx.runtimes.get(&namespace, runtime_id).await? else {
        info!(runtime = runtime_id, "runtime not found");
        return Ok(Action::await_change());
    };

    let configured = ctx.explorer.registry_cache_configured(secret).await?;
    let enabled = runtime.spec.caching.as_ref().is_some_and(|c| c.enabled);
    debug!(runtime = runtime_id, configured, enabled, "registry cache checked");

    if configured != enabled {
        ctx.runtimes.set_caching(&runtime, configured).await?;
        info!(runtime = runtime_id, enabled = configured, "runtime caching updated");
    }

    metrics::increment_requeues_total("custom-config-recheck");
    Ok(Action::requeue(ctx.recheck_interval))
}

/// Reconcile one kubeconfig secret
pub async fn reconcile(secret: Arc<Secret>, ctx: Arc<Context>) -> Result<Action, Error> {
    let span = tracing::info_span!(
        "custom_config.reconcile",
        secret = %secret.name_any(),
        namespace = secret.namespace().as_deref().unwrap_or("default"),
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(CONTROLLER_NAME);

        let result = reconcile_secret(&secret, &ctx).await;

        metrics::observe_reconciliation_duration(CONTROLLER_NAME, start.elapsed().as_secs_f64());
        if result.is_ok() {
            ctx.backoffs.reset(&resource_key(
                secret.metadata.namespace.as_deref(),
                secret.metadata.name.as_deref(),
            ));
        }
        result
    }
    .instrument(span)
    .await
}

pub fn error_policy(secret: Arc<Secret>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = resource_key(
        secret.metadata.namespace.as_deref(),
        secret.metadata.name.as_deref(),
    );
    handle_reconciliation_error(CONTROLLER_NAME, &key, error, &ctx.backoffs)
}

/// Drop the error history of a secret the watcher no longer knows about
pub fn forget_deleted(namespace: Option<&str>, name: &str, ctx: &Context) {
    ctx.backoffs.reset(&resource_key(namespace, Some(name)));
}
