// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use tracing::{subscriber::set_global_default, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

use crate::settings::LogSettings;

/// Build a subscriber for the service's tracing events from multiple layers.
pub fn get_subscriber<Sink>(
    name: String,
    env_filter: String,
    sink: Sink,
) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    // Default to "info" level logging.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    let formatting_layer = BunyanFormattingLayer::new(name, sink);
    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

/// Register a subscriber as global default to process span data.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}

/// Initialize logging for a service binary according to its settings.
///
/// With a log directory configured, events rotate into daily files; the
/// returned guard must stay alive for the lifetime of the process so the
/// non-blocking writer can flush.
pub fn init_telemetry(service_name: &str, log_settings: &LogSettings) -> Option<WorkerGuard> {
    match &log_settings.directory {
        Some(directory) => {
            let file_appender =
                tracing_appender::rolling::daily(directory, format!("{service_name}.log"));
            let (sink, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber =
                get_subscriber(service_name.into(), log_settings.level.clone(), sink);
            init_subscriber(subscriber);
            Some(guard)
        }
        None => {
            let subscriber = get_subscriber(
                service_name.into(),
                log_settings.level.clone(),
                std::io::stdout,
            );
            init_subscriber(subscriber);
            None
        }
    }
}
