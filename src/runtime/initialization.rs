//! # Initialization
//!
//! Process bootstrap: crypto provider, tracing, metrics, the HTTP server, the
//! two Kubernetes clients (the management cluster and the Gardener project) and
//! the reconciler contexts built from them.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{error, info};

use crate::config::{AuditLogConfig, ControllerArgs, ConverterConfig, ServerConfig};
use crate::constants::{DEFAULT_CUSTOM_CONFIG_RECHECK_SECS, DEFAULT_KUBECONFIG_RECHECK_SECS};
use crate::controller::custom_config::{
    self,
    explorer::KubeRegistryCacheExplorer,
    store::KubeRuntimeCachingStore,
};
use crate::controller::gardener_cluster::{
    self,
    store::{KubeGardenerClusterStore, KubeSecretStore},
};
use crate::controller::runtime::{
    self, cluster_client::KubeconfigSecretClientGetter, fsm::FsmEnv, store::KubeRuntimeStore,
};
use crate::converter::ConverterContext;
use crate::gardener::{GardenerClient, RateLimiter};
use crate::observability;
use crate::server::{start_server, ServerState};

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Management cluster client
    pub client: Client,
    pub runtime_ctx: Arc<runtime::Context>,
    pub gardener_cluster_ctx: Arc<gardener_cluster::Context>,
    pub custom_config_ctx: Arc<custom_config::Context>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runtime_provisioner=info".into()),
        )
        .try_init();
}

/// Initialize the controller runtime
///
/// Fails when a configuration file is missing or invalid, when either cluster
/// is unreachable at the client level, or when the HTTP server cannot bind.
pub async fn initialize(args: &ControllerArgs) -> Result<InitializationResult> {
    // rustls 0.23 needs a process-wide provider before any TLS handshake
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    init_tracing();
    info!("Starting Runtime Provisioner v{}", env!("CARGO_PKG_VERSION"));

    args.validate().context("invalid controller arguments")?;
    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_config =
        ServerConfig::from_addrs(args.metrics_bind_address, args.health_bind_address);
    let server_handle = {
        let state = Arc::clone(&server_state);
        let config = server_config.clone();
        tokio::spawn(async move {
            if let Err(e) = start_server(config, state).await {
                error!("HTTP server error: {e:#}");
            }
        })
    };
    wait_for_server_ready(&server_config, &server_state, &server_handle).await?;

    let converter_config = ConverterConfig::from_file(&args.converter_config_filepath)
        .with_context(|| {
            format!(
                "failed to load converter config from {}",
                args.converter_config_filepath.display()
            )
        })?;
    let audit_tenants = AuditLogConfig::from_file(&args.audit_log_config_filepath)
        .with_context(|| {
            format!(
                "failed to load audit log config from {}",
                args.audit_log_config_filepath.display()
            )
        })?;

    let client = Client::try_default()
        .await
        .context("failed to create management cluster client")?;
    let gardener = gardener_client(&args.gardener_kubeconfig_path).await?;

    let namespace = args.gardener_namespace();
    let limiter = Arc::new(RateLimiter::new(
        args.gardener_rate_limiter_qps,
        args.gardener_rate_limiter_burst,
    ));
    let gardener_client = Arc::new(GardenerClient::new(
        gardener,
        &namespace,
        limiter,
        args.gardener_request_timeout,
        args.kubeconfig_expiration_time,
    ));
    info!(namespace = %namespace, "🌱 connected to Gardener project");

    let env = FsmEnv {
        shoots: gardener_client.clone(),
        runtimes: Arc::new(KubeRuntimeStore::new(client.clone())),
        clusters: Arc::new(KubeconfigSecretClientGetter::new(client.clone())),
        converter: ConverterContext::new(
            converter_config,
            audit_tenants,
            args.audit_log_mandatory,
            namespace,
        ),
        requeue: args.requeue_durations(),
    };
    let runtime_ctx = Arc::new(runtime::Context::new(
        env,
        args.gardener_ctrl_reconciliation_timeout,
    ));

    let gardener_cluster_ctx = Arc::new(gardener_cluster::Context {
        secrets: Arc::new(KubeSecretStore::new(client.clone())),
        clusters: Arc::new(KubeGardenerClusterStore::new(client.clone())),
        kubeconfigs: gardener_client,
        rotation_period: args.rotation_period(),
        kubeconfig_expiration: args.kubeconfig_expiration_time,
        recheck_interval: Duration::from_secs(DEFAULT_KUBECONFIG_RECHECK_SECS),
        backoffs: Default::default(),
    });
    let custom_config_ctx = Arc::new(custom_config::Context {
        explorer: Arc::new(KubeRegistryCacheExplorer),
        runtimes: Arc::new(KubeRuntimeCachingStore::new(client.clone())),
        recheck_interval: Duration::from_secs(DEFAULT_CUSTOM_CONFIG_RECHECK_SECS),
        backoffs: Default::default(),
    });
    info!(
        rotation_period = ?gardener_cluster_ctx.rotation_period,
        "Controllers initialized, starting watch loop..."
    );

    Ok(InitializationResult {
        client,
        runtime_ctx,
        gardener_cluster_ctx,
        custom_config_ctx,
        server_state,
    })
}

async fn gardener_client(kubeconfig_path: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig_path).with_context(|| {
        format!(
            "failed to read Gardener kubeconfig from {}",
            kubeconfig_path.display()
        )
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("invalid Gardener kubeconfig")?;
    Client::try_from(config).context("failed to create Gardener client")
}

/// Wait for the HTTP listeners to bind
async fn wait_for_server_ready(
    config: &ServerConfig,
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state
            .is_listening
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn config() -> ServerConfig {
        ServerConfig {
            startup_timeout_secs: 1,
            poll_interval_ms: 10,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_wait_returns_once_listening() {
        let state = Arc::new(ServerState::default());
        let handle = tokio::spawn(std::future::pending::<()>());
        state.is_listening.store(true, Ordering::Relaxed);

        wait_for_server_ready(&config(), &state, &handle).await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_wait_fails_when_server_task_exits() {
        let state = Arc::new(ServerState::default());
        let handle = tokio::spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = wait_for_server_ready(&config(), &state, &handle)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let state = Arc::new(ServerState::default());
        let handle = tokio::spawn(std::future::pending::<()>());

        let err = wait_for_server_ready(&config(), &state, &handle)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("within 1 seconds"));
        handle.abort();
    }
}
