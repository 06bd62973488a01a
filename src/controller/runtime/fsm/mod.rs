//! # Runtime State Machine
//!
//! A trampoline over named states. Each state inspects the [`SystemState`], may call
//! out to Gardener or the managed cluster, records conditions on the Runtime and
//! returns a [`Transition`]:
//!
//! - `Switch(next)` runs `next` immediately within the same reconcile pass
//! - `RequeueAfter(d)` ends the pass and schedules the next one
//! - `Stop` ends the pass with nothing scheduled
//!
//! ```text
//! select-processing ──► create-shoot
//!        │ ├──────────► patch-shoot
//!        │ ├──────────► wait-for-shoot-creation ──┐
//!        │ ├──────────► wait-for-shoot-reconcile ─┴─► configure-skr ─► configure-oidc
//!        │ │                                                               │
//!        │ │                                     apply-cluster-role-bindings ◄┘
//!        │ └──────────► delete-shoot ─► wait-for-shoot-deletion
//! ```
//!
//! States never persist anything about the Runtime themselves; the reconciler patches
//! status once the machine has stopped.

mod cluster_role_bindings;
mod configure_oidc;
mod configure_skr;
mod create_shoot;
mod delete_shoot;
mod patch_shoot;
mod select_processing;
mod wait_for_shoot;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::cluster_client::{RuntimeClientGetter, RuntimeClusterClient};
use super::store::RuntimeStore;
use crate::config::RequeueDurations;
use crate::constants::MAX_FSM_TRANSITIONS;
use crate::converter::ConverterContext;
use crate::crd::{ConditionStatus, Runtime, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;
use crate::gardener::{Shoot, ShootClient};
use crate::observability::metrics;

pub use configure_skr::provisioning_info_config_map;

/// Identity of a state, used for dispatch, logs and test assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    SelectProcessing,
    CreateShoot,
    PatchShoot,
    WaitForShootCreation,
    WaitForShootReconcile,
    ConfigureSkr,
    ConfigureOidc,
    ApplyClusterRoleBindings,
    DeleteShoot,
    WaitForShootDeletion,
}

impl StateId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelectProcessing => "select-processing",
            Self::CreateShoot => "create-shoot",
            Self::PatchShoot => "patch-shoot",
            Self::WaitForShootCreation => "wait-for-shoot-creation",
            Self::WaitForShootReconcile => "wait-for-shoot-reconcile",
            Self::ConfigureSkr => "configure-skr",
            Self::ConfigureOidc => "configure-oidc",
            Self::ApplyClusterRoleBindings => "apply-cluster-role-bindings",
            Self::DeleteShoot => "delete-shoot",
            Self::WaitForShootDeletion => "wait-for-shoot-deletion",
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a state asks the engine to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Switch(StateId),
    RequeueAfter(Duration),
    Stop,
}

/// Collaborators and settings shared by every state, fixed for the process lifetime
pub struct FsmEnv {
    pub shoots: Arc<dyn ShootClient>,
    pub runtimes: Arc<dyn RuntimeStore>,
    pub clusters: Arc<dyn RuntimeClientGetter>,
    pub converter: ConverterContext,
    pub requeue: RequeueDurations,
}

impl fmt::Debug for FsmEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmEnv")
            .field("converter", &self.converter)
            .field("requeue", &self.requeue)
            .finish_non_exhaustive()
    }
}

/// Per-reconcile snapshot, rebuilt on every pass and never persisted
pub struct SystemState {
    pub runtime: Runtime,
    pub shoot: Option<Shoot>,
    /// Set once the Runtime may disappear; its status must not be written afterwards
    pub finalizer_removed: bool,
    cluster_client: Option<Arc<dyn RuntimeClusterClient>>,
}

impl fmt::Debug for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemState")
            .field("runtime", &self.runtime.metadata.name)
            .field("shoot", &self.shoot.as_ref().and_then(|s| s.metadata.name.as_ref()))
            .finish_non_exhaustive()
    }
}

impl SystemState {
    pub fn new(runtime: Runtime, shoot: Option<Shoot>) -> Self {
        Self {
            runtime,
            shoot,
            finalizer_removed: false,
            cluster_client: None,
        }
    }

    /// Managed cluster client, built at most once per pass
    async fn cluster_client(
        &mut self,
        getter: &dyn RuntimeClientGetter,
    ) -> Result<Arc<dyn RuntimeClusterClient>, Error> {
        if let Some(client) = &self.cluster_client {
            return Ok(Arc::clone(client));
        }
        let client = getter.client_for(&self.runtime).await?;
        self.cluster_client = Some(Arc::clone(&client));
        Ok(client)
    }

    fn update_condition(
        &mut self,
        condition_type: RuntimeConditionType,
        reason: RuntimeConditionReason,
        status: ConditionStatus,
        message: &str,
    ) {
        self.runtime
            .update_condition(condition_type, reason, status, message);
    }

    fn shoot_name(&self) -> &str {
        &self.runtime.spec.shoot.name
    }
}

/// Result of one machine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmOutcome {
    /// States entered, in order
    pub path: Vec<StateId>,
    /// `None` when the machine stopped
    pub requeue_after: Option<Duration>,
}

impl FsmOutcome {
    pub fn last_state(&self) -> Option<StateId> {
        self.path.last().copied()
    }
}

async fn dispatch(state: StateId, env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    match state {
        StateId::SelectProcessing => select_processing::run(env, s).await,
        StateId::CreateShoot => create_shoot::run(env, s).await,
        StateId::PatchShoot => patch_shoot::run(env, s).await,
        StateId::WaitForShootCreation => {
            wait_for_shoot::run(env, s, wait_for_shoot::Phase::Creation).await
        }
        StateId::WaitForShootReconcile => {
            wait_for_shoot::run(env, s, wait_for_shoot::Phase::Reconcile).await
        }
        StateId::ConfigureSkr => configure_skr::run(env, s).await,
        StateId::ConfigureOidc => configure_oidc::run(env, s).await,
        StateId::ApplyClusterRoleBindings => cluster_role_bindings::run(env, s).await,
        StateId::DeleteShoot => delete_shoot::run(env, s).await,
        StateId::WaitForShootDeletion => delete_shoot::wait(env, s).await,
    }
}

/// Drive the machine from `start` until a state stops or requeues.
///
/// Exceeding [`MAX_FSM_TRANSITIONS`] switches in one pass means two states keep
/// handing control to each other; that is reported as an invariant violation.
pub async fn run(env: &FsmEnv, s: &mut SystemState, start: StateId) -> Result<FsmOutcome, Error> {
    let mut current = start;
    let mut path = Vec::new();

    for _ in 0..MAX_FSM_TRANSITIONS {
        path.push(current);
        metrics::increment_fsm_state(current.as_str());
        debug!(runtime = ?s.runtime.metadata.name, state = %current, "entering state");

        match dispatch(current, env, s).await? {
            Transition::Switch(next) => current = next,
            Transition::RequeueAfter(after) => {
                return Ok(FsmOutcome {
                    path,
                    requeue_after: Some(after),
                })
            }
            Transition::Stop => {
                return Ok(FsmOutcome {
                    path,
                    requeue_after: None,
                })
            }
        }
    }

    Err(Error::invariant(format!(
        "state machine did not settle after {MAX_FSM_TRANSITIONS} transitions, last state {current}"
    )))
}

#[cfg(test)]
pub(crate) mod testutils {
    use super::*;
    use crate::config::{converter_config_fixture, AuditLogConfig};
    use crate::controller::runtime::cluster_client::fake::{FakeClientGetter, FakeCluster};
    use crate::controller::runtime::store::MockRuntimeStore;
    use crate::converter::extender::testutils;
    use crate::crd::Condition;
    use crate::gardener::client::MockShootClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use crate::gardener::types::{LastOperation, LastOperationState, LastOperationType, ShootStatus};

    pub(crate) fn runtime() -> Runtime {
        testutils::runtime()
    }

    pub(crate) fn converter() -> ConverterContext {
        let tenants = AuditLogConfig::from_json(
            r#"{"aws": {"eu-central-1": {"tenantID": "t", "serviceURL": "https://audit.example", "secretName": "audit-secret"}}}"#,
        )
        .unwrap();
        ConverterContext::new(converter_config_fixture(), tenants, true, "garden-kyma-dev")
    }

    pub(crate) fn env_with(
        shoots: MockShootClient,
        runtimes: MockRuntimeStore,
        cluster: Arc<FakeCluster>,
    ) -> FsmEnv {
        FsmEnv {
            shoots: Arc::new(shoots),
            runtimes: Arc::new(runtimes),
            clusters: Arc::new(FakeClientGetter(cluster)),
            converter: converter(),
            requeue: RequeueDurations::default(),
        }
    }

    pub(crate) fn env() -> FsmEnv {
        env_with(
            MockShootClient::new(),
            MockRuntimeStore::new(),
            Arc::new(FakeCluster::default()),
        )
    }

    pub(crate) fn condition(s: &SystemState, condition_type: RuntimeConditionType) -> Condition {
        s.runtime
            .status
            .as_ref()
            .and_then(|status| status.conditions.get(condition_type.as_str()))
            .cloned()
            .expect("condition recorded")
    }

    pub(crate) fn deletion_timestamp() -> Time {
        serde_json::from_value(serde_json::json!("2024-05-01T10:00:00Z")).unwrap()
    }

    /// A shoot as Gardener reports it after converting `runtime()`
    pub(crate) fn shoot(operation: LastOperationType, state: LastOperationState) -> Shoot {
        let mut shoot = converter().for_create().to_shoot(&runtime()).unwrap();
        shoot.status = Some(ShootStatus {
            last_operation: Some(LastOperation {
                r#type: operation,
                state,
                description: String::new(),
                progress: 100,
            }),
        });
        shoot
    }
}
