// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Relay registry server.

pub mod auth_extractor;
pub mod connect_info;
pub mod endpoints;
pub mod metrics;

use std::{net::TcpListener, sync::Arc};

use actix_web::{
    dev::Server,
    error::InternalError,
    web::{self, Data},
    App, HttpResponse, HttpServer,
};
use tracing_actix_web::TracingLogger;

use relaybackend::{
    auth::TokenIssuer, identity::IdentityService, queue::WorkQueue, registry::MessageRegistry,
};
use relaycommon::endpoint_paths::*;

use crate::{
    connect_info::extract_peer_identity,
    endpoints::{
        admin, health_check, internal, metrics_endpoint, portal, InternalApiPolicy,
    },
    metrics::ServerMetrics,
};

/// Everything the server needs, built once at startup and handed down
/// explicitly.
pub struct ServerServices {
    pub registry: MessageRegistry,
    pub identity: IdentityService,
    pub queue: Arc<dyn WorkQueue>,
    pub token_issuer: TokenIssuer,
    pub metrics: ServerMetrics,
    pub internal_policy: InternalApiPolicy,
}

/// Configure and run the server application.
pub fn run(
    listener: TcpListener,
    tls_config: Option<rustls::ServerConfig>,
    services: ServerServices,
) -> Result<Server, std::io::Error> {
    let registry_data = Data::new(services.registry);
    let identity_data = Data::new(services.identity);
    let queue_data: Data<dyn WorkQueue> = Data::from(services.queue);
    let token_issuer_data = Data::new(services.token_issuer);
    let metrics_data = Data::new(services.metrics);
    let internal_policy_data = Data::new(services.internal_policy);

    tracing::info!(
        "Starting registry server, listening on {}:{}",
        listener
            .local_addr()
            .expect("Could not get local address")
            .ip(),
        listener
            .local_addr()
            .expect("Could not get local address")
            .port()
    );

    let server = HttpServer::new(move || {
        let request_metrics = metrics_data.clone();
        App::new()
            .wrap(TracingLogger::default())
            .wrap_fn(move |req, srv| {
                let metrics = request_metrics.clone();
                let method = req.method().as_str().to_owned();
                let start = std::time::Instant::now();
                let fut = actix_web::dev::Service::call(srv, req);
                async move {
                    let res = fut.await?;
                    let endpoint = res
                        .request()
                        .match_pattern()
                        .unwrap_or_else(|| "unmatched".to_owned());
                    metrics.observe_request(
                        &method,
                        &endpoint,
                        res.status().as_u16(),
                        start.elapsed(),
                    );
                    Ok(res)
                }
            })
            .app_data(json_error_handler())
            .app_data(registry_data.clone())
            .app_data(identity_data.clone())
            .app_data(queue_data.clone())
            .app_data(token_issuer_data.clone())
            .app_data(metrics_data.clone())
            .app_data(internal_policy_data.clone())
            .route(ENDPOINT_HEALTH, web::get().to(health_check))
            .route(ENDPOINT_METRICS, web::get().to(metrics_endpoint))
            // internal confirmation API
            .route(
                ENDPOINT_INTERNAL_REGISTER,
                web::post().to(internal::register_message),
            )
            .route(
                ENDPOINT_INTERNAL_DELIVER,
                web::post().to(internal::deliver_message),
            )
            .route(
                ENDPOINT_INTERNAL_STATUS,
                web::put().to(internal::update_status),
            )
            // portal
            .route(ENDPOINT_PORTAL_LOGIN, web::post().to(portal::login))
            .route(ENDPOINT_PORTAL_REFRESH, web::post().to(portal::refresh))
            .route(
                ENDPOINT_PORTAL_FORGOT_PASSWORD,
                web::post().to(portal::forgot_password),
            )
            .route(
                ENDPOINT_PORTAL_RESET_PASSWORD,
                web::post().to(portal::reset_password),
            )
            .route(
                ENDPOINT_PORTAL_MESSAGES,
                web::get().to(portal::list_messages),
            )
            .route(ENDPOINT_PORTAL_PROFILE, web::get().to(portal::profile))
            // admin
            .route(ENDPOINT_ADMIN_USERS, web::post().to(admin::create_operator))
            .route(
                ENDPOINT_ADMIN_USER_ROLE,
                web::put().to(admin::update_operator_role),
            )
            .route(
                ENDPOINT_ADMIN_USER_STATUS,
                web::put().to(admin::update_operator_status),
            )
            .route(
                ENDPOINT_ADMIN_USER_PASSWORD,
                web::put().to(admin::change_operator_password),
            )
            .route(ENDPOINT_ADMIN_CLIENTS, web::get().to(admin::list_clients))
            .route(ENDPOINT_ADMIN_CLIENTS, web::post().to(admin::register_client))
            .route(
                ENDPOINT_ADMIN_CLIENT_REVOKE,
                web::post().to(admin::revoke_client),
            )
            .route(
                ENDPOINT_ADMIN_CLIENTS_EXPIRING,
                web::get().to(admin::list_expiring_clients),
            )
            .route(ENDPOINT_ADMIN_STATS, web::get().to(admin::stats))
            .route(
                ENDPOINT_ADMIN_RETENTION,
                web::post().to(admin::retention_cleanup),
            )
            .route(
                ENDPOINT_ADMIN_MESSAGE_BODY,
                web::get().to(admin::message_body),
            )
    });

    let server = match tls_config {
        Some(tls_config) => server
            .on_connect(extract_peer_identity)
            .listen_rustls_0_23(listener, tls_config)?,
        None => server.listen(listener)?,
    };
    Ok(server.run())
}

/// Malformed payloads surface the broker's error shape instead of actix's
/// plaintext default.
fn json_error_handler() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = relaycommon::messages::ErrorBody::new("bad_request", err.to_string());
        InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}
