//! # Runtime Reconciler
//!
//! Drives each `Runtime` towards a provisioned and bootstrapped shoot.
//!
//! One pass:
//!
//! 1. releases nothing and returns when the Runtime is deleting without our finalizer
//! 2. adds the finalizer before any external write
//! 3. loads the shoot and runs the state machine from `select-processing`,
//!    bounded by the reconciliation timeout
//! 4. patches status only when the conditions changed and the Runtime still exists
//!
//! The controller runtime guarantees at most one in-flight pass per Runtime.

pub mod cluster_client;
pub mod fsm;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, Instrument};

use crate::crd::{ConditionStatus, Runtime, RuntimeConditionType};
use crate::error::Error;
use crate::observability::metrics;
use crate::runtime::error_policy::{handle_reconciliation_error, resource_key, BackoffStates};
use fsm::{FsmEnv, StateId, SystemState};
use store::has_finalizer;

pub const CONTROLLER_NAME: &str = "runtime";

/// Shared reconciler context
#[derive(Debug)]
pub struct Context {
    pub env: FsmEnv,
    /// Wall-clock budget for one pass of the state machine
    pub reconciliation_timeout: Duration,
    pub backoffs: BackoffStates,
}

impl Context {
    pub fn new(env: FsmEnv, reconciliation_timeout: Duration) -> Self {
        Self {
            env,
            reconciliation_timeout,
            backoffs: BackoffStates::default(),
        }
    }
}

/// Reason shown next to the state: the first unsettled condition, else `Provisioned`
fn state_reason(runtime: &Runtime) -> String {
    let Some(status) = runtime.status.as_ref() else {
        return String::new();
    };
    status
        .conditions
        .iter()
        .find(|c| c.status != ConditionStatus::True)
        .or_else(|| status.conditions.get(RuntimeConditionType::Provisioned.as_str()))
        .map(|c| c.reason.clone())
        .unwrap_or_default()
}

fn record_state_metric(runtime: &Runtime) {
    let Some(runtime_id) = runtime.runtime_id() else {
        return;
    };
    let state = runtime.state().map_or("", |s| s.as_str());
    metrics::set_runtime_state(
        runtime_id,
        &runtime.spec.shoot.name,
        state,
        &state_reason(runtime),
    );
}

async fn reconcile_runtime(runtime: &Runtime, ctx: &Context) -> Result<Action, Error> {
    let env = &ctx.env;

    if runtime.is_deleting() && !has_finalizer(runtime) {
        debug!("runtime is deleting and already released");
        return Ok(Action::await_change());
    }
    if !runtime.is_deleting() && !has_finalizer(runtime) {
        env.runtimes.add_finalizer(runtime).await?;
        info!("finalizer added");
    }

    let shoot = env.shoots.get(&runtime.spec.shoot.name).await?;
    let mut state = SystemState::new(runtime.clone(), shoot);

    let outcome = tokio::time::timeout(
        ctx.reconciliation_timeout,
        fsm::run(env, &mut state, StateId::SelectProcessing),
    )
    .await
    .map_err(|_elapsed| Error::Timeout {
        operation: "runtime reconciliation".to_string(),
        seconds: ctx.reconciliation_timeout.as_secs(),
    })??;

    if state.finalizer_removed {
        if let Some(runtime_id) = runtime.runtime_id() {
            metrics::clean_up_runtime_state(runtime_id);
        }
    } else {
        match state.runtime.status.as_ref() {
            Some(status) if state.runtime.status != runtime.status => {
                env.runtimes.patch_status(&state.runtime, status).await?;
                debug!(state = ?status.state, "status updated");
            }
            _ => debug!("status unchanged"),
        }
        record_state_metric(&state.runtime);
    }

    debug!(path = ?outcome.path, requeue_after = ?outcome.requeue_after, "state machine settled");
    Ok(match outcome.requeue_after {
        Some(after) => {
            metrics::increment_requeues_total(
                outcome.last_state().map_or("unknown", StateId::as_str),
            );
            Action::requeue(after)
        }
        None => Action::await_change(),
    })
}

/// Reconcile one Runtime
pub async fn reconcile(runtime: Arc<Runtime>, ctx: Arc<Context>) -> Result<Action, Error> {
    let span = tracing::info_span!(
        "runtime.reconcile",
        runtime = %runtime.name_any(),
        namespace = runtime.namespace().as_deref().unwrap_or("default"),
        shoot = %runtime.spec.shoot.name,
    );

    async move {
        let start = Instant::now();
        metrics::increment_reconciliations(CONTROLLER_NAME);

        let result = reconcile_runtime(&runtime, &ctx).await;

        metrics::observe_reconciliation_duration(CONTROLLER_NAME, start.elapsed().as_secs_f64());
        if result.is_ok() {
            ctx.backoffs.reset(&resource_key(
                runtime.metadata.namespace.as_deref(),
                runtime.metadata.name.as_deref(),
            ));
        }
        result
    }
    .instrument(span)
    .await
}

/// Drop the error history of a Runtime the watcher no longer knows about
pub fn forget_deleted(namespace: Option<&str>, name: &str, ctx: &Context) {
    ctx.backoffs.reset(&resource_key(namespace, Some(name)));
}

pub fn error_policy(runtime: Arc<Runtime>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = resource_key(
        runtime.metadata.namespace.as_deref(),
        runtime.metadata.name.as_deref(),
    );
    handle_reconciliation_error(CONTROLLER_NAME, &key, error, &ctx.backoffs)
}

#[cfg(test)]
mod tests {
    use super::fsm::testutils::{converter, deletion_timestamp, runtime, shoot};
    use super::*;
    use crate::config::RequeueDurations;
    use crate::constants::RUNTIME_FINALIZER;
    use crate::controller::runtime::cluster_client::fake::{FakeClientGetter, FakeCluster};
    use crate::controller::runtime::store::MockRuntimeStore;
    use crate::crd::{RuntimeConditionReason, RuntimeState};
    use crate::gardener::client::MockShootClient;
    use crate::gardener::types::{LastOperationState, LastOperationType, Shoot};
    use crate::gardener::ShootClient;
    use async_trait::async_trait;

    fn context_with(shoots: Arc<dyn ShootClient>, runtimes: MockRuntimeStore) -> Arc<Context> {
        Arc::new(Context::new(
            FsmEnv {
                shoots,
                runtimes: Arc::new(runtimes),
                clusters: Arc::new(FakeClientGetter(Arc::new(FakeCluster::default()))),
                converter: converter(),
                requeue: RequeueDurations::default(),
            },
            Duration::from_secs(60),
        ))
    }

    fn finalized(mut rt: Runtime) -> Runtime {
        rt.metadata.finalizers = Some(vec![RUNTIME_FINALIZER.to_string()]);
        rt
    }

    #[tokio::test]
    async fn test_released_runtime_is_left_alone() {
        let mut rt = runtime();
        rt.metadata.deletion_timestamp = Some(deletion_timestamp());
        let ctx = context_with(Arc::new(MockShootClient::new()), MockRuntimeStore::new());

        let action = reconcile(Arc::new(rt), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_new_runtime_gets_finalizer_and_shoot() {
        let mut shoots = MockShootClient::new();
        shoots.expect_get().times(1).returning(|_| Ok(None));
        shoots.expect_create().times(1).returning(|_| Ok(()));

        let mut runtimes = MockRuntimeStore::new();
        runtimes.expect_add_finalizer().times(1).returning(|_| Ok(()));
        runtimes
            .expect_patch_status()
            .withf(|_, status| status.state == Some(RuntimeState::Pending))
            .times(1)
            .returning(|_, _| Ok(()));

        let ctx = context_with(Arc::new(shoots), runtimes);
        let action = reconcile(Arc::new(runtime()), Arc::clone(&ctx)).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.env.requeue.shoot_create));
    }

    #[tokio::test]
    async fn test_ready_runtime_is_not_rewritten() {
        let mut rt = finalized(runtime());
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::ConfigurationCompleted,
            ConditionStatus::True,
            "Runtime processing completed successfully",
        );
        assert_eq!(rt.state(), Some(RuntimeState::Ready));

        let mut shoots = MockShootClient::new();
        shoots.expect_get().times(1).returning(|_| {
            Ok(Some(shoot(LastOperationType::Reconcile, LastOperationState::Succeeded)))
        });
        let mut runtimes = MockRuntimeStore::new();
        runtimes.expect_patch_status().times(0);

        let ctx = context_with(Arc::new(shoots), runtimes);
        let action = reconcile(Arc::new(rt), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_released_runtime_status_is_not_patched() {
        let mut rt = finalized(runtime());
        rt.metadata.deletion_timestamp = Some(deletion_timestamp());

        let mut shoots = MockShootClient::new();
        shoots.expect_get().times(1).returning(|_| Ok(None));
        let mut runtimes = MockRuntimeStore::new();
        runtimes.expect_remove_finalizer().times(1).returning(|_| Ok(()));
        runtimes.expect_patch_status().times(0);

        let ctx = context_with(Arc::new(shoots), runtimes);
        let action = reconcile(Arc::new(rt), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Never answers a create
    struct StalledShoots;

    #[async_trait]
    impl ShootClient for StalledShoots {
        async fn get(&self, _name: &str) -> Result<Option<Shoot>, Error> {
            Ok(None)
        }
        async fn create(&self, _shoot: &Shoot) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn apply(&self, _shoot: &Shoot) -> Result<(), Error> {
            Ok(())
        }
        async fn confirm_deletion(&self, _name: &str) -> Result<(), Error> {
            Ok(())
        }
        async fn delete(&self, _name: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_is_bounded_by_reconciliation_timeout() {
        let mut runtimes = MockRuntimeStore::new();
        runtimes.expect_patch_status().times(0);

        let ctx = context_with(Arc::new(StalledShoots), runtimes);
        let err = reconcile(Arc::new(finalized(runtime())), Arc::clone(&ctx))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { seconds: 60, .. }));

        let action = error_policy(Arc::new(runtime()), &err, ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    }

    #[test]
    fn test_deleted_runtime_backoff_is_forgotten() {
        let ctx = context_with(Arc::new(MockShootClient::new()), MockRuntimeStore::new());
        let rt = Arc::new(runtime());
        let err = Error::invariant("shoot name mismatch");

        error_policy(Arc::clone(&rt), &err, Arc::clone(&ctx));
        error_policy(Arc::clone(&rt), &err, Arc::clone(&ctx));
        let third = error_policy(Arc::clone(&rt), &err, Arc::clone(&ctx));
        assert_eq!(third, Action::requeue(Duration::from_secs(120)));

        forget_deleted(
            rt.metadata.namespace.as_deref(),
            rt.metadata.name.as_deref().unwrap_or_default(),
            &ctx,
        );
        let after = error_policy(rt, &err, ctx);
        assert_eq!(after, Action::requeue(Duration::from_secs(60)));
    }

    #[test]
    fn test_state_reason_prefers_unsettled_condition() {
        let mut rt = runtime();
        rt.update_condition(
            RuntimeConditionType::Provisioned,
            RuntimeConditionReason::ConfigurationCompleted,
            ConditionStatus::True,
            "done",
        );
        assert_eq!(state_reason(&rt), "ConfigurationCompleted");

        rt.update_condition(
            RuntimeConditionType::OidcAndCMsConfigured,
            RuntimeConditionReason::OidcError,
            ConditionStatus::False,
            "boom",
        );
        assert_eq!(state_reason(&rt), "OidcError");
    }
}
