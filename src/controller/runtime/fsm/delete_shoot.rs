use tracing::{info, warn};

use super::{FsmEnv, SystemState, Transition};
use crate::crd::{ConditionStatus, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;

/// Confirm and request deletion of the shoot.
///
/// Gardener refuses to delete a shoot without the confirmation annotation.
pub(super) async fn run(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    let name = s.shoot_name().to_string();

    let result = match env.shoots.confirm_deletion(&name).await {
        Ok(()) => env.shoots.delete(&name).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(shoot = %name, error = %e, "failed to delete shoot");
        s.update_condition(
            RuntimeConditionType::Deprovisioned,
            RuntimeConditionReason::DeletionError,
            ConditionStatus::False,
            &format!("Gardener API delete error: {e}"),
        );
        return Ok(Transition::RequeueAfter(env.requeue.failure));
    }

    info!(shoot = %name, "🗑️ shoot deletion requested");
    s.update_condition(
        RuntimeConditionType::Deprovisioned,
        RuntimeConditionReason::Deletion,
        ConditionStatus::Unknown,
        "Runtime deletion initialised",
    );
    Ok(Transition::RequeueAfter(env.requeue.shoot_delete))
}

/// Keep the finalizer until the shoot is gone, then release the Runtime
pub(super) async fn wait(env: &FsmEnv, s: &mut SystemState) -> Result<Transition, Error> {
    if s.shoot.is_some() {
        s.update_condition(
            RuntimeConditionType::Deprovisioned,
            RuntimeConditionReason::Deletion,
            ConditionStatus::Unknown,
            "Waiting for shoot deletion",
        );
        return Ok(Transition::RequeueAfter(env.requeue.shoot_delete));
    }

    env.runtimes.remove_finalizer(&s.runtime).await?;
    s.finalizer_removed = true;
    info!(shoot = s.shoot_name(), "shoot deleted, runtime released");
    Ok(Transition::Stop)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testutils::*;
    use super::*;
    use crate::controller::runtime::store::MockRuntimeStore;
    use crate::gardener::client::MockShootClient;
    use crate::gardener::types::{LastOperationState, LastOperationType};

    fn deleting_runtime() -> crate::crd::Runtime {
        let mut rt = runtime();
        rt.metadata.deletion_timestamp = Some(deletion_timestamp());
        rt
    }

    #[tokio::test]
    async fn test_confirms_before_deleting() {
        let mut seq = mockall::Sequence::new();
        let mut shoots = MockShootClient::new();
        shoots
            .expect_confirm_deletion()
            .withf(|name| name == "c-6ea9b9b")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        shoots
            .expect_delete()
            .withf(|name| name == "c-6ea9b9b")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let env = env_with(shoots, MockRuntimeStore::new(), Arc::default());

        let mut s = SystemState::new(
            deleting_runtime(),
            Some(shoot(LastOperationType::Reconcile, LastOperationState::Succeeded)),
        );
        let transition = run(&env, &mut s).await.unwrap();

        assert_eq!(transition, Transition::RequeueAfter(env.requeue.shoot_delete));
        assert_eq!(condition(&s, RuntimeConditionType::Deprovisioned).reason, "Deletion");
        assert_eq!(s.runtime.state(), Some(crate::crd::RuntimeState::Terminating));
    }

    #[tokio::test]
    async fn test_finalizer_released_once_shoot_is_gone() {
        let mut runtimes = MockRuntimeStore::new();
        runtimes.expect_remove_finalizer().times(1).returning(|_| Ok(()));
        let env = env_with(MockShootClient::new(), runtimes, Arc::default());

        let mut s = SystemState::new(deleting_runtime(), None);
        assert_eq!(wait(&env, &mut s).await.unwrap(), Transition::Stop);
        assert!(s.finalizer_removed);
    }

    #[tokio::test]
    async fn test_waits_while_shoot_exists() {
        let env = env();
        let mut s = SystemState::new(
            deleting_runtime(),
            Some(shoot(LastOperationType::Delete, LastOperationState::Processing)),
        );
        assert_eq!(
            wait(&env, &mut s).await.unwrap(),
            Transition::RequeueAfter(env.requeue.shoot_delete)
        );
        assert!(!s.finalizer_removed);
    }
}
