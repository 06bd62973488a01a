//! # Watch Loop
//!
//! Runs the Runtime, GardenerCluster and custom config controllers side by side
//! until a shutdown signal arrives or, with leader election on, leadership is lost.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher::Config as WatcherConfig;
use tracing::{debug, error, info, warn};

use crate::config::ControllerArgs;
use crate::constants::WATCH_TIMEOUT_SECS;
use crate::controller::{custom_config, gardener_cluster, runtime};
use crate::crd::{GardenerCluster, Runtime};
use crate::server::ServerState;

use super::initialization::InitializationResult;
use super::leader_election::LeaderElector;

const DEFAULT_LEASE_NAMESPACE: &str = "kcp-system";

/// Identity written into the Lease; the pod name when running in a cluster
fn leader_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("runtime-provisioner-{}", std::process::id()))
}

fn lease_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| DEFAULT_LEASE_NAMESPACE.to_string())
}

async fn run_runtime_controller(client: Client, ctx: Arc<runtime::Context>, workers: u16) {
    let runtimes: Api<Runtime> = Api::all(client);
    Controller::new(runtimes, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(runtime::reconcile, runtime::error_policy, Arc::clone(&ctx))
        .for_each(|result| {
            match result {
                Ok(action) => debug!(?action, "Runtime reconciliation completed"),
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    debug!(runtime = %obj_ref.name, "runtime is gone");
                    runtime::forget_deleted(obj_ref.namespace.as_deref(), &obj_ref.name, &ctx);
                }
                Err(e) => error!(error = ?e, "Runtime reconciliation error"),
            }
            std::future::ready(())
        })
        .await;
}

/// A requeued binding that has since been deleted comes back as
/// `ObjectNotFound`; that is where its secret and backoff are cleaned up.
async fn run_gardener_cluster_controller(
    client: Client,
    ctx: Arc<gardener_cluster::Context>,
    workers: u16,
) {
    let clusters: Api<GardenerCluster> = Api::all(client);
    Controller::new(clusters, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(
            gardener_cluster::reconcile,
            gardener_cluster::error_policy,
            Arc::clone(&ctx),
        )
        .for_each(move |result| {
            let ctx = Arc::clone(&ctx);
            async move {
                match result {
                    Ok(action) => debug!(?action, "GardenerCluster reconciliation completed"),
                    Err(controller::Error::ObjectNotFound(obj_ref)) => {
                        if let Err(e) =
                            gardener_cluster::cleanup_deleted(
                                obj_ref.namespace.as_deref(),
                                &obj_ref.name,
                                &ctx,
                            )
                            .await
                        {
                            warn!(cluster = %obj_ref.name, error = %e, "failed to clean up kubeconfig secret");
                        }
                    }
                    Err(e) => error!(error = ?e, "GardenerCluster reconciliation error"),
                }
            }
        })
        .await;
}

/// Only kubeconfig secrets written by the credential controller are watched
async fn run_custom_config_controller(client: Client, ctx: Arc<custom_config::Context>, workers: u16) {
    let secrets: Api<Secret> = Api::all(client);
    let watcher = WatcherConfig::default()
        .labels(&custom_config::kubeconfig_secret_selector())
        .timeout(WATCH_TIMEOUT_SECS);
    Controller::new(secrets, watcher)
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(custom_config::reconcile, custom_config::error_policy, Arc::clone(&ctx))
        .for_each(|result| {
            match result {
                Ok(action) => debug!(?action, "CustomConfig reconciliation completed"),
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    custom_config::forget_deleted(obj_ref.namespace.as_deref(), &obj_ref.name, &ctx);
                }
                Err(e) => error!(error = ?e, "CustomConfig reconciliation error"),
            }
            std::future::ready(())
        })
        .await;
}

/// Run every controller until shutdown
#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when leadership is lost"
)]
pub async fn run_watch_loop(args: &ControllerArgs, init: InitializationResult) -> Result<()> {
    let InitializationResult {
        client,
        runtime_ctx,
        gardener_cluster_ctx,
        custom_config_ctx,
        server_state,
    } = init;

    let elector = args
        .leader_elect
        .then(|| LeaderElector::new(client.clone(), &lease_namespace(), &leader_identity()));
    if let Some(elector) = &elector {
        elector.acquire().await;
    }

    let runtimes = run_runtime_controller(
        client.clone(),
        runtime_ctx,
        args.runtime_ctrl_workers_cnt,
    );
    let clusters = run_gardener_cluster_controller(
        client.clone(),
        gardener_cluster_ctx,
        args.gardener_cluster_ctrl_workers_cnt,
    );
    let custom_configs =
        run_custom_config_controller(client, custom_config_ctx, args.custom_config_ctrl_workers_cnt);
    let leadership = async {
        match &elector {
            Some(elector) => elector.hold().await,
            None => std::future::pending().await,
        }
    };

    server_state.mark_ready();
    info!(
        runtime_workers = args.runtime_ctrl_workers_cnt,
        gardener_cluster_workers = args.gardener_cluster_ctrl_workers_cnt,
        custom_config_workers = args.custom_config_ctrl_workers_cnt,
        "🚀 controllers running"
    );

    tokio::select! {
        () = async { tokio::join!(runtimes, clusters, custom_configs); } => {
            info!("Controllers stopped");
            Ok(())
        }
        () = leadership => Err(anyhow::anyhow!("leader election lost")),
    }
}
