//! # Constants
//!
//! Default values, label keys and annotation keys shared across the controllers.

// Label and annotation keys on Runtime and GardenerCluster resources
pub const LABEL_RUNTIME_ID: &str = "kyma-project.io/runtime-id";
pub const LABEL_GLOBAL_ACCOUNT_ID: &str = "kyma-project.io/global-account-id";
pub const LABEL_SUBACCOUNT_ID: &str = "kyma-project.io/subaccount-id";

// Managed-by labelling for objects this controller owns
pub const LABEL_KYMA_MANAGED_BY: &str = "reconciler.kyma-project.io/managed-by";
pub const LABEL_OPERATOR_MANAGED_BY: &str = "operator.kyma-project.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "infrastructure-manager";

// Shoot annotations written by the extender pipeline
pub const ANNOTATION_RUNTIME_ID: &str = "infrastructuremanager.kyma-project.io/runtime-id";
pub const ANNOTATION_RUNTIME_GENERATION: &str =
    "infrastructuremanager.kyma-project.io/runtime-generation";
pub const ANNOTATION_LICENCE_TYPE: &str = "infrastructuremanager.kyma-project.io/licence-type";
pub const ANNOTATION_CONFIRM_DELETION: &str = "confirmation.gardener.cloud/deletion";

// Shoot labels written by the extender pipeline
pub const SHOOT_LABEL_ACCOUNT: &str = "account";
pub const SHOOT_LABEL_SUBACCOUNT: &str = "subaccount";

// Credential secret bookkeeping
pub const ANNOTATION_LAST_SYNC: &str = "operator.kyma-project.io/last-sync";
pub const ANNOTATION_FORCE_ROTATION: &str = "operator.kyma-project.io/force-kubeconfig-rotation";
pub const LABEL_CLUSTER_NAME: &str = "operator.kyma-project.io/cluster-name";
pub const KUBECONFIG_SECRET_PREFIX: &str = "kubeconfig-";
pub const KUBECONFIG_SECRET_KEY: &str = "config";

// Gardener extension types
pub const OIDC_EXTENSION_TYPE: &str = "shoot-oidc-service";
pub const AUDIT_LOG_EXTENSION_TYPE: &str = "shoot-auditlog-service";
pub const AUDIT_LOG_SECRET_REFERENCE: &str = "auditlog-credentials";

// Managed cluster objects
pub const KYMA_SYSTEM_NAMESPACE: &str = "kyma-system";
pub const PROVISIONING_INFO_CONFIG_MAP: &str = "kyma-provisioning-info";
pub const OIDC_RESOURCE_PREFIX: &str = "kyma-oidc";
pub const ADMIN_BINDING_PREFIX: &str = "admin";
pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";

/// Finalizer guarding Runtime deletion until the shoot is gone
pub const RUNTIME_FINALIZER: &str = "runtime-controller.infrastructure-manager.kyma-project.io/deletion-hook";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "infrastructure-manager";
/// Owner of `Runtime.spec.caching`
pub const CUSTOM_CONFIG_FIELD_MANAGER: &str = "customconfigcontroller";

// Requeue defaults (seconds)
pub const DEFAULT_GARDENER_REQUEUE_SECS: u64 = 15;
pub const DEFAULT_SHOOT_CREATE_REQUEUE_SECS: u64 = 60;
pub const DEFAULT_SHOOT_DELETE_REQUEUE_SECS: u64 = 90;
pub const DEFAULT_SHOOT_RECONCILE_REQUEUE_SECS: u64 = 30;
pub const DEFAULT_CONTROL_PLANE_REQUEUE_SECS: u64 = 10;
pub const DEFAULT_FAILURE_REQUEUE_SECS: u64 = 60;
pub const DEFAULT_KUBECONFIG_RECHECK_SECS: u64 = 60;
pub const DEFAULT_CUSTOM_CONFIG_RECHECK_SECS: u64 = 60;

// Gardener API client defaults
pub const DEFAULT_GARDENER_RATE_LIMIT_QPS: u32 = 5;
pub const DEFAULT_GARDENER_RATE_LIMIT_BURST: u32 = 5;

// Credential rotation defaults
pub const DEFAULT_MINIMAL_ROTATION_TIME_RATIO: f64 = 0.6;

// Worker pool sizes
pub const DEFAULT_RUNTIME_WORKERS: u16 = 25;
pub const DEFAULT_GARDENER_CLUSTER_WORKERS: u16 = 25;
pub const DEFAULT_CUSTOM_CONFIG_WORKERS: u16 = 1;

/// Upper bound on state switches within one reconcile pass
pub const MAX_FSM_TRANSITIONS: usize = 32;

// HTTP server defaults
pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_HEALTH_PORT: u16 = 8081;
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Watch timeout, kept below the client read timeout so idle watches close cleanly
pub const WATCH_TIMEOUT_SECS: u32 = 25;

// Error backoff bounds (minutes)
pub const ERROR_BACKOFF_MIN_MINUTES: u64 = 1;
pub const ERROR_BACKOFF_MAX_MINUTES: u64 = 10;
