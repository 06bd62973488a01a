//! # Condition Model Tests
//!
//! State derivation as seen by a client reading `status` off the two CRDs.

use runtime_provisioner::crd::{
    ConditionStatus, GardenerCluster, GardenerClusterSpec, GardenerClusterState, KubeconfigReason,
    Runtime, RuntimeConditionReason, RuntimeConditionType, RuntimeSpec, RuntimeState,
};

fn runtime() -> Runtime {
    Runtime::new("059dbc39", RuntimeSpec::default())
}

#[test]
fn test_runtime_lifecycle_states() {
    let mut rt = runtime();
    assert_eq!(rt.state(), None);

    rt.update_condition(
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::ShootCreationPending,
        ConditionStatus::Unknown,
        "Shoot is pending",
    );
    assert_eq!(rt.state(), Some(RuntimeState::Pending));

    rt.update_condition(
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::ConfigurationCompleted,
        ConditionStatus::True,
        "Runtime processing completed successfully",
    );
    assert_eq!(rt.state(), Some(RuntimeState::Ready));

    rt.update_condition(
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::GardenerError,
        ConditionStatus::False,
        "Shoot creation failed",
    );
    assert_eq!(rt.state(), Some(RuntimeState::Error));
}

#[test]
fn test_pending_bootstrap_keeps_runtime_pending() {
    let mut rt = runtime();
    rt.update_condition(
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::ConfigurationCompleted,
        ConditionStatus::True,
        "done",
    );
    rt.update_condition(
        RuntimeConditionType::OidcAndCMsConfigured,
        RuntimeConditionReason::OidcError,
        ConditionStatus::False,
        "cluster unreachable",
    );
    assert_eq!(rt.state(), Some(RuntimeState::Pending));
}

#[test]
fn test_repeated_condition_is_not_a_change() {
    let mut rt = runtime();
    let args = (
        RuntimeConditionType::Provisioned,
        RuntimeConditionReason::ShootCreationPending,
        ConditionStatus::Unknown,
        "Shoot is pending",
    );
    assert!(rt.update_condition(args.0, args.1, args.2, args.3));
    let stamped = rt.status.as_ref().unwrap().conditions.get("Provisioned").cloned();

    assert!(!rt.update_condition(args.0, args.1, args.2, args.3));
    assert_eq!(
        rt.status.as_ref().unwrap().conditions.get("Provisioned").cloned(),
        stamped
    );
}

#[test]
fn test_gardener_cluster_state_follows_reason() {
    let mut cluster = GardenerCluster::new("059dbc39", GardenerClusterSpec::default());

    cluster.update_condition(KubeconfigReason::SecretReading, "reading secret");
    assert_eq!(cluster.state(), Some(GardenerClusterState::Processing));

    cluster.update_condition(KubeconfigReason::SecretCreated, "secret synchronized");
    assert_eq!(cluster.state(), Some(GardenerClusterState::Ready));
    assert_eq!(
        cluster.kubeconfig_condition_reason(),
        Some("KubeconfigSecretCreated")
    );

    cluster.update_condition(KubeconfigReason::SecretDuplicated, "two secrets found");
    assert_eq!(cluster.state(), Some(GardenerClusterState::Error));
    let condition = cluster
        .status
        .as_ref()
        .unwrap()
        .conditions
        .get("KubeconfigManagement")
        .unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
}
