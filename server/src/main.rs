// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{net::TcpListener, sync::Arc};

use relaybackend::{
    auth::TokenIssuer,
    crypto::{MessageCipher, PhoneHasher},
    identity::IdentityService,
    infra_service::provision_pool,
    queue::{RedisWorkQueue, WorkQueue},
    registry::MessageRegistry,
    settings::load_settings,
    telemetry::init_telemetry,
    tls::server_config,
};
use relayserver::{endpoints::InternalApiPolicy, metrics::ServerMetrics, run, ServerServices};
use tracing::info;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Several rustls consumers live in this process; pin the provider once.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // Load configuration
    let configuration = load_settings("server").expect("Could not load configuration.");

    // Configure logging/trace subscription
    let _telemetry_guard = init_telemetry("relayserver", &configuration.log);

    // Port binding
    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(address).expect("Failed to bind to port.");

    info!(
        host = configuration.database.host,
        "Connecting to postgres server",
    );
    // Try again for 10 times each second in case the postgres server is coming up.
    let mut counter = 0;
    let mut pool_result = provision_pool(&configuration.database).await;
    while let Err(e) = pool_result {
        info!("Failed to connect to postgres server: {}", e);
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        counter += 1;
        if counter > 10 {
            panic!("Database not ready after 10 seconds.");
        }
        pool_result = provision_pool(&configuration.database).await;
    }
    let db_pool = pool_result.expect("Database not reachable.");

    let cipher = Arc::new(
        MessageCipher::from_dir(
            &configuration.crypto.key_dir,
            configuration.crypto.current_key_version,
        )
        .expect("Failed to load encryption keys."),
    );
    let phone_hasher = PhoneHasher::new(configuration.crypto.hash_salt.clone());
    let registry = MessageRegistry::from_pool(db_pool.clone(), cipher, phone_hasher);
    let identity = IdentityService::from_pool(db_pool);

    info!(host = configuration.queue.host, "Connecting to queue store");
    let queue: Arc<dyn WorkQueue> = Arc::new(
        RedisWorkQueue::connect(&configuration.queue)
            .await
            .expect("Failed to connect to the queue store."),
    );

    let auth_settings = configuration
        .auth
        .as_ref()
        .expect("Auth settings are required for the registry server.");
    let token_issuer = TokenIssuer::new(auth_settings);
    let metrics = ServerMetrics::new().expect("Failed to build metrics registry.");

    let tls_config = configuration
        .tls
        .as_ref()
        .map(|tls| server_config(tls).expect("Failed to build TLS configuration."));
    let internal_policy = InternalApiPolicy {
        mtls_enabled: tls_config.is_some(),
        allowed_cns: configuration
            .tls
            .as_ref()
            .map(|tls| tls.internal_allowed_cns.clone())
            .unwrap_or_default(),
    };

    // Start the server
    run(
        listener,
        tls_config,
        ServerServices {
            registry,
            identity,
            queue,
            token_issuer,
            metrics,
            internal_policy,
        },
    )?
    .await
}
