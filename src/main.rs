use kim_snatch::admission::{install_panic_hook, select_strategy, PodDefaulter};
use kim_snatch::config::Config;
use kim_snatch::server::{
    build_rustls_config, create_metrics, initialize_tls, run_server, run_server_tls,
    shutdown_channel, wait_for_signal, ReadinessState, ServerState,
};
use kube::Client;
use tracing::{error, info, warn};

/// Port for health, metrics, and webhook endpoints (HTTP)
const HTTP_PORT: u16 = 8080;

/// Port for the webhook when serving HTTPS
const WEBHOOK_PORT: u16 = 9443;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    install_panic_hook();

    info!("Starting kim-snatch pod webhook");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        node_selector = ?config.node_selector,
        omitted_namespaces = ?config.omitted_namespaces,
        "Configuration loaded"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    // Strategy and its counter are bound together here, once per process
    let mutator = select_strategy(
        config.node_selector.clone(),
        config.omitted_namespaces.clone(),
    );
    let defaulter = PodDefaulter::new(mutator).with_metrics(metrics.clone());
    let state = ServerState::new(readiness.clone(), metrics, defaulter);

    let server_handle = if config.webhook_tls {
        let client = Client::try_default().await.map_err(|e| {
            error!(error = %e, "Failed to create Kubernetes client");
            e
        })?;
        info!("Connected to Kubernetes cluster");

        let tls = config.tls();
        info!(
            service = %tls.service_name,
            namespace = %tls.namespace,
            "Initializing webhook TLS certificates"
        );
        let bundle = initialize_tls(&client, &tls)
            .await
            .map_err(|e| anyhow::anyhow!("TLS init error: {}", e))?;
        let tls_config =
            build_rustls_config(&bundle).map_err(|e| anyhow::anyhow!("TLS config error: {}", e))?;

        let signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server_tls(WEBHOOK_PORT, state, tls_config, signal).await {
                warn!(error = %e, "HTTPS server failed");
            }
        })
    } else {
        info!("Webhook TLS disabled - running HTTP only");
        let signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server(HTTP_PORT, state, signal).await {
                warn!(error = %e, "HTTP server failed");
            }
        })
    };

    readiness.set_ready();
    info!("Webhook ready");

    match wait_for_signal().await {
        Ok(signal) => info!(signal = signal, "Initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for termination signals, shutting down"),
    }

    // Stop receiving admission traffic before the server drains
    readiness.set_not_ready();
    shutdown_controller.shutdown();

    if let Err(e) = server_handle.await {
        warn!(error = %e, "Server task ended abnormally");
    }

    info!("kim-snatch webhook shut down gracefully");
    Ok(())
}
