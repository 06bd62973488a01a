//! # Runtime Metrics
//!
//! Per-object gauges: one series per Runtime carrying its current state and
//! reason, one per GardenerCluster carrying its state, and the expiry time of
//! each managed kubeconfig.
//!
//! A state gauge keeps exactly one series per object. The previous label set is
//! remembered so it can be removed when the state changes.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{IntGaugeVec, Opts};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use tracing::warn;

static RUNTIME_STATE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "runtime_provisioner_runtime_state",
            "Current state of each Runtime; the active series has value 1",
        ),
        &["runtime_id", "shoot_name", "state", "reason"],
    )
    .expect("Failed to create RUNTIME_STATE metric - this should never happen")
});

static GARDENER_CLUSTER_STATE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "runtime_provisioner_gardener_cluster_state",
            "Current state of each GardenerCluster; the active series has value 1",
        ),
        &["runtime_id", "state"],
    )
    .expect("Failed to create GARDENER_CLUSTER_STATE metric - this should never happen")
});

static KUBECONFIG_EXPIRATION: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "runtime_provisioner_kubeconfig_expiration_timestamp_seconds",
            "Unix time at which the managed kubeconfig of a cluster expires",
        ),
        &["runtime_id"],
    )
    .expect("Failed to create KUBECONFIG_EXPIRATION metric - this should never happen")
});

static RUNTIME_LABELS: LazyLock<Mutex<HashMap<String, Vec<String>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static CLUSTER_LABELS: LazyLock<Mutex<HashMap<String, Vec<String>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub(crate) fn register_runtime_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RUNTIME_STATE.clone()))?;
    REGISTRY.register(Box::new(GARDENER_CLUSTER_STATE.clone()))?;
    REGISTRY.register(Box::new(KUBECONFIG_EXPIRATION.clone()))?;
    Ok(())
}

fn replace_series(
    gauge: &IntGaugeVec,
    remembered: &Mutex<HashMap<String, Vec<String>>>,
    key: &str,
    labels: Vec<String>,
) {
    let Ok(mut remembered) = remembered.lock() else {
        warn!("metrics label cache poisoned, skipping gauge update");
        return;
    };
    if let Some(previous) = remembered.get(key) {
        if *previous == labels {
            return;
        }
        let previous: Vec<&str> = previous.iter().map(String::as_str).collect();
        let _ = gauge.remove_label_values(&previous);
    }
    let current: Vec<&str> = labels.iter().map(String::as_str).collect();
    gauge.with_label_values(&current).set(1);
    remembered.insert(key.to_string(), labels);
}

fn remove_series(gauge: &IntGaugeVec, remembered: &Mutex<HashMap<String, Vec<String>>>, key: &str) {
    let Ok(mut remembered) = remembered.lock() else {
        return;
    };
    if let Some(previous) = remembered.remove(key) {
        let previous: Vec<&str> = previous.iter().map(String::as_str).collect();
        let _ = gauge.remove_label_values(&previous);
    }
}

pub fn set_runtime_state(runtime_id: &str, shoot_name: &str, state: &str, reason: &str) {
    replace_series(
        &RUNTIME_STATE,
        &RUNTIME_LABELS,
        runtime_id,
        vec![
            runtime_id.to_string(),
            shoot_name.to_string(),
            state.to_string(),
            reason.to_string(),
        ],
    );
}

pub fn clean_up_runtime_state(runtime_id: &str) {
    remove_series(&RUNTIME_STATE, &RUNTIME_LABELS, runtime_id);
}

pub fn set_gardener_cluster_state(runtime_id: &str, state: &str) {
    replace_series(
        &GARDENER_CLUSTER_STATE,
        &CLUSTER_LABELS,
        runtime_id,
        vec![runtime_id.to_string(), state.to_string()],
    );
}

pub fn set_kubeconfig_expiration(runtime_id: &str, expires_at_unix: i64) {
    KUBECONFIG_EXPIRATION
        .with_label_values(&[runtime_id])
        .set(expires_at_unix);
}

/// Drop every series of a cluster whose GardenerCluster is gone
pub fn clean_up_gardener_cluster(runtime_id: &str) {
    remove_series(&GARDENER_CLUSTER_STATE, &CLUSTER_LABELS, runtime_id);
    let _ = KUBECONFIG_EXPIRATION.remove_label_values(&[runtime_id]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_change_keeps_single_series() {
        let pending = ["rt-metrics-1", "c-1", "Pending", "ShootCreationPending"];
        let ready = ["rt-metrics-1", "c-1", "Ready", "ConfigurationCompleted"];

        set_runtime_state("rt-metrics-1", "c-1", "Pending", "ShootCreationPending");
        set_runtime_state("rt-metrics-1", "c-1", "Ready", "ConfigurationCompleted");
        assert_eq!(RUNTIME_STATE.with_label_values(&ready).get(), 1);
        // the Pending series was dropped, so removing it again fails
        assert!(RUNTIME_STATE.remove_label_values(&pending).is_err());

        clean_up_runtime_state("rt-metrics-1");
        assert!(RUNTIME_STATE.remove_label_values(&ready).is_err());
    }

    #[test]
    fn test_kubeconfig_expiration() {
        set_kubeconfig_expiration("rt-metrics-2", 1_700_000_000);
        assert_eq!(
            KUBECONFIG_EXPIRATION.with_label_values(&["rt-metrics-2"]).get(),
            1_700_000_000
        );
        clean_up_gardener_cluster("rt-metrics-2");
    }
}
