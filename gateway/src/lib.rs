// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Relay ingress gateway.

pub mod client_auth;
pub mod connect_info;
pub mod endpoints;
pub mod metrics;
pub mod providers;

use std::{net::TcpListener, sync::Arc};

use actix_web::{
    dev::Server,
    error::InternalError,
    web::{self, Data},
    App, HttpResponse, HttpServer,
};
use tracing_actix_web::TracingLogger;

use relaybackend::{queue::WorkQueue, rate_limiter::RateLimiter};
use relaycommon::{
    endpoint_paths::{ENDPOINT_HEALTH, ENDPOINT_METRICS, ENDPOINT_SUBMIT},
    messages::ErrorBody,
};

use crate::{
    connect_info::extract_peer_identity,
    endpoints::{health_check, metrics_endpoint, submit_message, GatewayOptions},
    metrics::GatewayMetrics,
    providers::{AuditRecorder, ClientDirectory, MessageRegistrar},
};

/// The gateway's dependency graph, built once at startup.
pub struct GatewayServices<D, A, R> {
    pub directory: D,
    pub audit: A,
    pub registrar: R,
    pub queue: Arc<dyn WorkQueue>,
    pub rate_limiter: RateLimiter,
    pub metrics: GatewayMetrics,
    pub options: GatewayOptions,
}

/// Configure and run the gateway application.
pub fn run<D, A, R>(
    listener: TcpListener,
    tls_config: Option<rustls::ServerConfig>,
    services: GatewayServices<D, A, R>,
) -> Result<Server, std::io::Error>
where
    D: ClientDirectory + 'static,
    A: AuditRecorder + 'static,
    R: MessageRegistrar + 'static,
{
    let directory_data = Data::new(services.directory);
    let audit_data = Data::new(services.audit);
    let registrar_data = Data::new(services.registrar);
    let queue_data: Data<dyn WorkQueue> = Data::from(services.queue);
    let rate_limiter_data = Data::new(services.rate_limiter);
    let metrics_data = Data::new(services.metrics);
    let options_data = Data::new(services.options);

    tracing::info!(
        "Starting gateway, listening on {}:{}",
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
            .app_data(directory_data.clone())
            .app_data(audit_data.clone())
            .app_data(registrar_data.clone())
            .app_data(queue_data.clone())
            .app_data(rate_limiter_data.clone())
            .app_data(metrics_data.clone())
            .app_data(options_data.clone())
            .route(ENDPOINT_SUBMIT, web::post().to(submit_message::<D, A, R>))
            .route(ENDPOINT_HEALTH, web::get().to(health_check::<D>))
            .route(ENDPOINT_METRICS, web::get().to(metrics_endpoint))
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
pub fn json_error_handler() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = ErrorBody::new("bad_request", err.to_string());
        InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}
