//! # GardenerCluster Reconciler
//!
//! Keeps exactly one kubeconfig secret per `GardenerCluster` binding and rotates
//! its payload before the issued credential expires.
//!
//! ## Lifecycle
//!
//! - **binding deleted**: the secret labelled with the binding name is deleted
//! - **no secret**: a kubeconfig is issued and stored with a last-sync timestamp
//! - **secret older than the rotation period, or force marker set**: reissued in place
//! - **otherwise**: nothing is written
//!
//! The rotation period is `ratio × expiration` and fixed at startup. Bindings are
//! re-checked on a fixed interval so rotation happens without any external event.

pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn, Instrument};

use crate::constants::{
    ANNOTATION_FORCE_ROTATION, ANNOTATION_LAST_SYNC, LABEL_CLUSTER_NAME, LABEL_OPERATOR_MANAGED_BY,
    MANAGED_BY_VALUE,
};
use crate::crd::{GardenerCluster, GardenerClusterStatus, KubeconfigReason};
use crate::error::Error;
use crate::gardener::KubeconfigProvider;
use crate::observability::metrics;
use crate::runtime::error_policy::{handle_reconciliation_error, resource_key, BackoffStates};
use store::{GardenerClusterStore, SecretStore};

pub const CONTROLLER_NAME: &str = "gardener-cluster";

/// Shared reconciler context
pub struct Context {
    pub secrets: Arc<dyn SecretStore>,
    pub clusters: Arc<dyn GardenerClusterStore>,
    pub kubeconfigs: Arc<dyn KubeconfigProvider>,
    pub rotation_period: Duration,
    /// Lifetime of an issued kubeconfig, reported as an expiry gauge
    pub kubeconfig_expiration: Duration,
    pub recheck_interval: Duration,
    pub backoffs: BackoffStates,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("rotation_period", &self.rotation_period)
            .field("kubeconfig_expiration", &self.kubeconfig_expiration)
            .field("recheck_interval", &self.recheck_interval)
            .finish_non_exhaustive()
    }
}

/// What a successful pass did to the secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretSync {
    Created,
    Rotated,
    Unchanged,
}

impl SecretSync {
    fn reason(self) -> KubeconfigReason {
        match self {
            Self::Created => KubeconfigReason::SecretCreated,
            Self::Rotated => KubeconfigReason::SecretRotated,
            Self::Unchanged => KubeconfigReason::SecretSynchronized,
        }
    }
}

fn cluster_selector(binding_name: &str) -> String {
    format!("{LABEL_CLUSTER_NAME}={binding_name}")
}

fn last_sync(secret: &Secret) -> Option<DateTime<Utc>> {
    secret
        .annotations()
        .get(ANNOTATION_LAST_SYNC)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn has_force_marker(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(ANNOTATION_FORCE_ROTATION)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// The marker may be set on the binding or directly on the secret
fn force_rotation_requested(cluster: &GardenerCluster, secret: &Secret) -> bool {
    has_force_marker(cluster.annotations()) || has_force_marker(secret.annotations())
}

/// Rotate once more than `rotation_period` has passed since the last sync.
///
/// A missing or unreadable timestamp counts as stale.
fn rotation_due(secret: &Secret, now: DateTime<Utc>, rotation_period: Duration) -> bool {
    let Some(synced_at) = last_sync(secret) else {
        return true;
    };
    match (now - synced_at).to_std() {
        Ok(elapsed) => elapsed > rotation_period,
        // Timestamp in the future
        Err(_) => false,
    }
}

fn secret_labels(cluster: &GardenerCluster) -> BTreeMap<String, String> {
    let mut labels = cluster.labels().clone();
    labels.insert(
        LABEL_OPERATOR_MANAGED_BY.to_string(),
        MANAGED_BY_VALUE.to_string(),
    );
    labels.insert(LABEL_CLUSTER_NAME.to_string(), cluster.name_any());
    labels
}

fn stamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn new_secret(cluster: &GardenerCluster, kubeconfig: &str, now: DateTime<Utc>) -> Secret {
    let target = &cluster.spec.kubeconfig.secret;
    Secret {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            labels: Some(secret_labels(cluster)),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_LAST_SYNC.to_string(),
                stamp(now),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            target.key.clone(),
            ByteString(kubeconfig.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    }
}

fn rotated_secret(
    mut secret: Secret,
    cluster: &GardenerCluster,
    kubeconfig: &str,
    now: DateTime<Utc>,
) -> Secret {
    let annotations = secret.annotations_mut();
    annotations.insert(ANNOTATION_LAST_SYNC.to_string(), stamp(now));
    annotations.remove(ANNOTATION_FORCE_ROTATION);
    secret.data.get_or_insert_with(BTreeMap::new).insert(
        cluster.spec.kubeconfig.secret.key.clone(),
        ByteString(kubeconfig.as_bytes().to_vec()),
    );
    secret
}

async fn sync_secret(
    cluster: &GardenerCluster,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<SecretSync, (KubeconfigReason, Error)> {
    let shoot_name = &cluster.spec.shoot.name;

    let mut secrets = ctx
        .secrets
        .list(&cluster_selector(&cluster.name_any()))
        .await
        .map_err(|e| (KubeconfigReason::SecretReadFailed, e))?;

    if secrets.len() > 1 {
        return Err((
            KubeconfigReason::SecretDuplicated,
            Error::invariant(format!(
                "{} kubeconfig secrets found for cluster '{}'",
                secrets.len(),
                cluster.name_any()
            )),
        ));
    }

    let Some(secret) = secrets.pop() else {
        let kubeconfig = ctx
            .kubeconfigs
            .fetch(shoot_name)
            .await
            .map_err(|e| (KubeconfigReason::SecretCreateFailed, e))?;
        ctx.secrets
            .create(&new_secret(cluster, &kubeconfig, now))
            .await
            .map_err(|e| (KubeconfigReason::SecretCreateFailed, e))?;
        info!(secret = %cluster.spec.kubeconfig.secret.name, "🔑 kubeconfig secret created");
        return Ok(SecretSync::Created);
    };

    let forced = force_rotation_requested(cluster, &secret);
    if !forced && !rotation_due(&secret, now, ctx.rotation_period) {
        debug!(secret = %secret.name_any(), "kubeconfig is still fresh");
        return Ok(SecretSync::Unchanged);
    }

    let kubeconfig = ctx
        .kubeconfigs
        .fetch(shoot_name)
        .await
        .map_err(|e| (KubeconfigReason::SecretRotateFailed, e))?;
    let name = secret.name_any();
    ctx.secrets
        .replace(&rotated_secret(secret, cluster, &kubeconfig, now))
        .await
        .map_err(|e| (KubeconfigReason::SecretRotateFailed, e))?;
    if has_force_marker(cluster.annotations()) {
        ctx.clusters
            .remove_force_rotation(cluster)
            .await
            .map_err(|e| (KubeconfigReason::SecretRotateFailed, e))?;
    }
    info!(secret = %name, forced, "🔄 kubeconfig rotated");
    Ok(SecretSync::Rotated)
}

/// Keep the stored transition time when the condition status did not change in the end
fn keep_transition_time(before: Option<&GardenerClusterStatus>, after: &mut GardenerClusterStatus) {
    let Some(before) = before else {
        return;
    };
    let mut conditions: Vec<_> = after.conditions.iter().cloned().collect();
    for condition in &mut conditions {
        if let Some(previous) = before.conditions.get(&condition.r#type) {
            if previous.status == condition.status {
                condition
                    .last_transition_time
                    .clone_from(&previous.last_transition_time);
            }
        }
    }
    after.conditions = conditions.into();
}

fn record_metrics(cluster: &GardenerCluster, ctx: &Context, now: DateTime<Utc>, sync: SecretSync) {
    let Some(runtime_id) = cluster.runtime_id() else {
        return;
    };
    if let Some(state) = cluster.state() {
        metrics::set_gardener_cluster_state(runtime_id, state.as_str());
    }
    if sync != SecretSync::Unchanged {
        let expires_at = now
            + chrono::Duration::from_std(ctx.kubeconfig_expiration).unwrap_or_else(|_| chrono::Duration::zero());
        metrics::set_kubeconfig_expiration(runtime_id, expires_at.timestamp());
    }
}

/// One pass over a live binding at the given instant
async fn reconcile_cluster(
    mut cluster: GardenerCluster,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<Action, Error> {
    let loaded = cluster.status.clone();
    cluster.update_condition(KubeconfigReason::SecretReading, "reading secret");

    let outcome = sync_secret(&cluster, ctx, now).await;
    let (reason, message) = match &outcome {
        Ok(sync) => (sync.reason(), "secret synchronized".to_string()),
        Err((reason, e)) => (*reason, e.to_string()),
    };
    cluster.update_condition(reason, &message);

    if let Some(status) = cluster.status.as_mut() {
        keep_transition_time(loaded.as_ref(), status);
    }
    if cluster.status != loaded {
        if let Some(status) = cluster.status.as_ref() {
            ctx.clusters.patch_status(&cluster, status).await?;
        }
    }

    match outcome {
        Ok(sync) => {
            record_metrics(&cluster, ctx, now, sync);
            metrics::increment_requeues_total("kubeconfig-recheck");
            Ok(Action::requeue(ctx.recheck_interval))
        }
        Err((reason, e)) => {
            if let (Some(runtime_id), Some(state)) = (cluster.runtime_id(), cluster.state()) {
                metrics::set_gardener_cluster_state(runtime_id, state.as_str());
            }
            warn!(reason = reason.as_str(), error = %e, "kubeconfig secret not synchronized");
            Err(e)
        }
    }
}

/// Remove the secret of a deleted binding.
///
/// No secret is fine; more than one is reported instead of guessing which to delete.
pub async fn reconcile_deleted(binding_name: &str, ctx: &Context) -> Result<(), Error> {
    let secrets = ctx.secrets.list(&cluster_selector(binding_name)).await?;
    match secrets.as_slice() {
        [] => {
            debug!(cluster = binding_name, "binding deleted, no secret left");
            Ok(())
        }
        [secret] => {
            let namespace = secret.namespace().unwrap_or_else(|| "default".to_string());
            ctx.secrets.delete(&namespace, &secret.name_any()).await?;
            info!(cluster = binding_name, secret = %secret.name_any(), "🗑️ kubeconfig secret deleted");
            Ok(())
        }
        many => Err(Error::invariant(format!(
            "{} kubeconfig secrets found for deleted cluster '{binding_name}'",
            many.len()
        ))),
    }
}

/// Clean up after a binding the watcher no longer knows about
#[allow(
    clippy::missing_errors_doc,
    reason = "Same failures as reconcile_deleted"
)]
pub async fn cleanup_deleted(namespace: Option<&str>, name: &str, ctx: &Context) -> Result<(), Error> {
    ctx.backoffs.reset(&resource_key(namespace, Some(name)));
    reconcile_deleted(name, ctx).await
}

/// Reconcile one binding, reading it fresh so a deletion in flight is seen
pub async fn reconcile(cluster: Arc<GardenerCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let span = tracing::info_span!(
        "gardener_cluster.reconcile",
        cluster = %name,
        namespace = %namespace,
        shoot = %cluster.spec.shoot.name,
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(CONTROLLER_NAME);

        let result = match ctx.clusters.get(&namespace, &name).await {
            Ok(Some(live)) => reconcile_cluster(live, &ctx, Utc::now()).await,
            Ok(None) => reconcile_deleted(&name, &ctx)
                .await
                .map(|()| Action::await_change()),
            Err(e) => Err(e),
        };

        metrics::observe_reconciliation_duration(CONTROLLER_NAME, start.elapsed().as_secs_f64());
        if result.is_ok() {
            ctx.backoffs
                .reset(&resource_key(Some(namespace.as_str()), Some(name.as_str())));
        }
        result
    }
    .instrument(span)
    .await
}

pub fn error_policy(cluster: Arc<GardenerCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = resource_key(
        cluster.metadata.namespace.as_deref(),
        cluster.metadata.name.as_deref(),
    );
    handle_reconciliation_error(CONTROLLER_NAME, &key, error, &ctx.backoffs)
}
