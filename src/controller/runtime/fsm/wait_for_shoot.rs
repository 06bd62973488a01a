use tracing::{info, warn};

use super::{FsmEnv, StateId, SystemState, Transition};
use crate::crd::{ConditionStatus, RuntimeConditionReason, RuntimeConditionType};
use crate::error::Error;
use crate::gardener::types::LastOperationState;

/// Which asynchronous Gardener operation is being awaited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Creation,
    Reconcile,
}

impl Phase {
    fn failure_reason(self) -> RuntimeConditionReason {
        match self {
            Self::Creation => RuntimeConditionReason::CreationError,
            Self::Reconcile => RuntimeConditionReason::ProcessingError,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Creation => "creation",
            Self::Reconcile => "reconciliation",
        }
    }
}

pub(super) async fn run(env: &FsmEnv, s: &mut SystemState, phase: Phase) -> Result<Transition, Error> {
    let Some(last_operation) = s.shoot.as_ref().and_then(|shoot| shoot.last_operation()) else {
        return Ok(Transition::RequeueAfter(env.requeue.gardener));
    };
    let state = last_operation.state.clone();
    let description = last_operation.description.clone();

    let requeue = match phase {
        Phase::Creation => env.requeue.shoot_create,
        Phase::Reconcile => env.requeue.shoot_reconcile,
    };

    match state {
        LastOperationState::Processing
        | LastOperationState::Pending
        | LastOperationState::Aborted
        | LastOperationState::Error => {
            let (reason, mut message) = match phase {
                Phase::Creation => (
                    RuntimeConditionReason::ShootCreationPending,
                    "Shoot creation in progress".to_string(),
                ),
                Phase::Reconcile => (
                    RuntimeConditionReason::ShootUpdatePending,
                    "Shoot update is in progress".to_string(),
                ),
            };
            if state == LastOperationState::Error {
                // Gardener retries errored operations on its own
                warn!(shoot = s.shoot_name(), %description, "shoot {} errored", phase.label());
                message = format!("{message}, last attempt failed: {description}");
            } else {
                info!(
                    shoot = s.shoot_name(),
                    progress = last_operation_progress(s),
                    "shoot {} in progress",
                    phase.label()
                );
            }
            s.update_condition(
                RuntimeConditionType::Provisioned,
                reason,
                ConditionStatus::Unknown,
                &message,
            );
            Ok(Transition::RequeueAfter(requeue))
        }
        LastOperationState::Succeeded => {
            info!(shoot = s.shoot_name(), "✅ shoot {} completed", phase.label());
            s.update_condition(
                RuntimeConditionType::Provisioned,
                RuntimeConditionReason::ShootCreationCompleted,
                ConditionStatus::Unknown,
                &format!("Shoot {} completed", phase.label()),
            );
            Ok(Transition::Switch(StateId::ConfigureSkr))
        }
        LastOperationState::Failed => {
            warn!(shoot = s.shoot_name(), %description, "shoot {} failed", phase.label());
            s.update_condition(
                RuntimeConditionType::Provisioned,
                phase.failure_reason(),
                ConditionStatus::False,
                &format!("Shoot {} failed: {description}", phase.label()),
            );
            Ok(Transition::Stop)
        }
        LastOperationState::Other => {
            warn!(shoot = s.shoot_name(), "unexpected shoot last operation state");
            s.update_condition(
                RuntimeConditionType::Provisioned,
                RuntimeConditionReason::ShootStateUnknown,
                ConditionStatus::Unknown,
                "Unknown shoot operation state",
            );
            Ok(Transition::RequeueAfter(requeue))
        }
    }
}

fn last_operation_progress(s: &SystemState) -> i32 {
    s.shoot
        .as_ref()
        .and_then(|shoot| shoot.last_operation())
        .map_or(0, |op| op.progress)
}

#[cfg(test)]
mod tests {
    use super::super::testutils::*;
    use super::*;
    use crate::crd::RuntimeState;
    use crate::gardener::types::LastOperationType;

    async fn wait(phase: Phase, state: LastOperationState) -> (Transition, SystemState) {
        let operation = match phase {
            Phase::Creation => LastOperationType::Create,
            Phase::Reconcile => LastOperationType::Reconcile,
        };
        let mut s = SystemState::new(runtime(), Some(shoot(operation, state)));
        let transition = run(&env(), &mut s, phase).await.unwrap();
        (transition, s)
    }

    #[tokio::test]
    async fn test_in_progress_requeues_with_phase_duration() {
        let requeue = env().requeue;
        let (transition, _) = wait(Phase::Creation, LastOperationState::Processing).await;
        assert_eq!(transition, Transition::RequeueAfter(requeue.shoot_create));

        let (transition, s) = wait(Phase::Reconcile, LastOperationState::Pending).await;
        assert_eq!(transition, Transition::RequeueAfter(requeue.shoot_reconcile));
        assert_eq!(s.runtime.state(), Some(RuntimeState::Pending));
    }

    #[tokio::test]
    async fn test_success_configures_cluster() {
        let (transition, _) = wait(Phase::Reconcile, LastOperationState::Succeeded).await;
        assert_eq!(transition, Transition::Switch(StateId::ConfigureSkr));
    }

    #[tokio::test]
    async fn test_failure_stops_with_error() {
        let (transition, s) = wait(Phase::Creation, LastOperationState::Failed).await;
        assert_eq!(transition, Transition::Stop);
        assert_eq!(condition(&s, RuntimeConditionType::Provisioned).reason, "CreationErr");
        assert_eq!(s.runtime.state(), Some(RuntimeState::Error));

        let (_, s) = wait(Phase::Reconcile, LastOperationState::Failed).await;
        assert_eq!(condition(&s, RuntimeConditionType::Provisioned).reason, "ProcessingErr");
    }

    #[tokio::test]
    async fn test_errored_operation_keeps_waiting() {
        let (transition, s) = wait(Phase::Creation, LastOperationState::Error).await;
        assert_eq!(transition, Transition::RequeueAfter(env().requeue.shoot_create));
        assert_eq!(s.runtime.state(), Some(RuntimeState::Pending));
    }

    #[tokio::test]
    async fn test_unknown_state() {
        let (transition, s) = wait(Phase::Reconcile, LastOperationState::Other).await;
        assert_eq!(transition, Transition::RequeueAfter(env().requeue.shoot_reconcile));
        assert_eq!(s.runtime.state(), Some(RuntimeState::Unknown));
    }
}
