// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{net::TcpListener, sync::Arc};

use relayapiclient::{ApiClient, TransportOptions};
use relaybackend::{
    identity::IdentityService,
    infra_service::provision_pool,
    queue::{RedisWorkQueue, WorkQueue},
    rate_limiter::{RateLimiter, RateLimiterConfig},
    settings::load_settings,
    telemetry::init_telemetry,
    tls::server_config,
};
use relaygateway::{
    endpoints::GatewayOptions,
    metrics::GatewayMetrics,
    providers::{PgAuditRecorder, PgClientDirectory},
    run, GatewayServices,
};
use tracing::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Several rustls consumers live in this process; pin the provider once.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // Load configuration
    let configuration = load_settings("gateway").expect("Could not load configuration.");

    // Configure logging/trace subscription
    let _telemetry_guard = init_telemetry("relaygateway", &configuration.log);

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(address).expect("Failed to bind to port.");

    info!(
        host = configuration.database.host,
        "Connecting to postgres server",
    );
    let db_pool = provision_pool(&configuration.database)
        .await
        .expect("Failed to connect to the database.");
    let identity = IdentityService::from_pool(db_pool.clone());

    info!(host = configuration.queue.host, "Connecting to queue store");
    let queue: Arc<dyn WorkQueue> = Arc::new(
        RedisWorkQueue::connect(&configuration.queue)
            .await
            .expect("Failed to connect to the queue store."),
    );

    let registry_settings = configuration
        .registry
        .as_ref()
        .expect("Registry settings are required for the gateway.");
    let registrar = ApiClient::initialize(
        registry_settings.url.clone(),
        &TransportOptions {
            verify_tls: registry_settings.verify_tls,
            ca_cert: registry_settings.ca_cert.clone(),
            client_identity: registry_settings.client_identity.clone(),
        },
    )
    .expect("Failed to build the registry API client.");

    let tls_config = configuration
        .tls
        .as_ref()
        .map(|tls| server_config(tls).expect("Failed to build TLS configuration."));
    if tls_config.is_none() && !configuration.gateway.trusted_header_auth {
        info!("Gateway running without TLS and without trusted header auth; all submissions will be rejected.");
    }

    run(
        listener,
        tls_config,
        GatewayServices {
            directory: PgClientDirectory::new(identity),
            audit: PgAuditRecorder::new(db_pool),
            registrar,
            queue,
            rate_limiter: RateLimiter::new(RateLimiterConfig::from(&configuration.rate_limit)),
            metrics: GatewayMetrics::new().expect("Failed to build metrics registry."),
            options: GatewayOptions {
                trusted_header_auth: configuration.gateway.trusted_header_auth,
            },
        },
    )?
    .await
}
