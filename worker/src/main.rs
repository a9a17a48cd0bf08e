// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{net::TcpListener, sync::Arc};

use relayapiclient::{ApiClient, RegistryApi, TransportOptions};
use relaybackend::{
    queue::{RedisWorkQueue, WorkQueue},
    settings::load_settings,
    telemetry::init_telemetry,
};
use relayworker::{metrics::WorkerMetrics, run_ops_server, WorkerPool, WorkerPoolConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let configuration = load_settings("worker").expect("Could not load configuration.");

    // Configure logging/trace subscription
    let _telemetry_guard = init_telemetry("relayworker", &configuration.log);

    let worker_settings = configuration
        .worker
        .as_ref()
        .expect("Worker settings are required.");
    let registry_settings = configuration
        .registry
        .as_ref()
        .expect("Registry settings are required for the worker.");

    info!(host = configuration.queue.host, "Connecting to queue store");
    let queue: Arc<dyn WorkQueue> = Arc::new(
        RedisWorkQueue::connect(&configuration.queue)
            .await
            .expect("Failed to connect to the queue store."),
    );

    let api: Arc<dyn RegistryApi> = Arc::new(
        ApiClient::initialize(
            registry_settings.url.clone(),
            &TransportOptions {
                verify_tls: registry_settings.verify_tls,
                ca_cert: registry_settings.ca_cert.clone(),
                client_identity: registry_settings.client_identity.clone(),
            },
        )
        .expect("Failed to build the registry API client."),
    );

    let metrics = Arc::new(WorkerMetrics::new().expect("Failed to build metrics registry."));

    // Health and metrics listener
    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(address).expect("Failed to bind to port.");
    let ops_server = run_ops_server(listener, queue.clone(), metrics.clone())?;
    let ops_handle = ops_server.handle();
    tokio::spawn(ops_server);

    // Shutdown on SIGINT/SIGTERM
    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler.");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    let pool = WorkerPool::new(
        WorkerPoolConfig::from(worker_settings),
        queue,
        api,
        metrics,
    );
    pool.run(shutdown).await;

    ops_handle.stop(true).await;
    Ok(())
}
