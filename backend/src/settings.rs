// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Load a service's settings tree.
///
/// Three layers, last writer wins: `<service>/configuration/base.yaml`, an
/// optional overlay named by `RELAY_CONFIG_OVERLAY` (default `local`;
/// deployments set `production`), and `RELAY_`-prefixed environment
/// variables with `_` as separator, e.g. `RELAY_APPLICATION_PORT=9443`
/// sets `application.port`.
pub fn load_settings(service_dir: &str) -> Result<Settings, ConfigError> {
    let overlay =
        std::env::var("RELAY_CONFIG_OVERLAY").unwrap_or_else(|_| "local".to_owned());
    let configuration_directory = std::env::current_dir()
        .map_err(|e| ConfigError::Message(format!("cannot determine working directory: {e}")))?
        .join(service_dir)
        .join("configuration");
    build_settings(
        File::from(configuration_directory.join("base")).required(true),
        File::from(configuration_directory.join(overlay.as_str())).required(false),
    )
}

/// Build settings from YAML strings. Test entry point.
pub fn load_settings_from_str(base: &str, overlay: &str) -> Result<Settings, ConfigError> {
    build_settings(
        File::from_str(base, config::FileFormat::Yaml),
        File::from_str(overlay, config::FileFormat::Yaml),
    )
}

fn build_settings(
    base: impl config::Source + Send + Sync + 'static,
    overlay: impl config::Source + Send + Sync + 'static,
) -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(base)
        .add_source(overlay)
        .add_source(config::Environment::with_prefix("RELAY").separator("_"))
        .build()?
        .try_deserialize()
}

/// Configuration tree shared by the gateway, registry server and worker.
/// Sections a process does not use may be absent from its configuration
/// files.
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub crypto: CryptoSettings,
    pub queue: QueueSettings,
    #[serde(default)]
    pub auth: Option<AuthSettings>,
    /// If this isn't present, the service listens in plaintext and rejects
    /// certificate-based client authentication.
    #[serde(default)]
    pub tls: Option<TlsSettings>,
    /// Where the gateway and worker reach the registry's internal API.
    #[serde(default)]
    pub registry: Option<RegistrySettings>,
    #[serde(default)]
    pub worker: Option<WorkerSettings>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub log: LogSettings,
}

/// Configuration for the application.
#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub port: u16,
    pub host: String,
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_domain() -> String {
    relaycommon::DEFAULT_DOMAIN.to_owned()
}

/// Configuration for the database.
#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub name: String,
    pub cacertpath: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    // pool of 10 with 20 overflow
    30
}

impl DatabaseSettings {
    /// Add the TLS mode to the connection string if the CA certificate path is
    /// set.
    fn add_tls_mode(&self, mut connection_string: String) -> String {
        if let Some(ref ca_cert_path) = self.cacertpath {
            connection_string.push_str(&format!("?sslmode=verify-ca&sslrootcert={ca_cert_path}"));
        } else {
            tracing::warn!(
                "No CA certificate path set for database connection. TLS will not be enabled."
            );
        }
        connection_string
    }

    /// Compose the base connection string without the database name.
    fn base_connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }

    /// Get the connection string for the database.
    pub fn connection_string(&self) -> String {
        let mut connection_string = self.base_connection_string();
        connection_string.push('/');
        connection_string.push_str(&self.name);
        self.add_tls_mode(connection_string)
    }

    /// Get the connection string for the database without the database name.
    pub fn connection_string_without_database(&self) -> String {
        let connection_string = self.base_connection_string();
        self.add_tls_mode(connection_string)
    }
}

/// Key material and hashing secrets.
#[derive(Deserialize, Clone, Debug)]
pub struct CryptoSettings {
    /// Directory holding `v<N>.key` files, owner-readable only.
    pub key_dir: PathBuf,
    /// Version used for new encryptions.
    pub current_key_version: i16,
    /// Process-wide salt for sender-number hashing.
    pub hash_salt: String,
}

/// The external queue store.
#[derive(Deserialize, Clone, Debug)]
pub struct QueueSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_queue_key")]
    pub key: String,
}

fn default_queue_key() -> String {
    "message_queue".to_owned()
}

fn default_pop_timeout() -> u64 {
    5
}

impl QueueSettings {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// Portal token issuance.
#[derive(Deserialize, Clone, Debug)]
pub struct AuthSettings {
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
}

fn default_access_ttl() -> u64 {
    // 24 hours
    86_400
}

fn default_refresh_ttl() -> u64 {
    // 30 days
    2_592_000
}

/// Mutual TLS material for a listening service.
#[derive(Deserialize, Clone, Debug)]
pub struct TlsSettings {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    #[serde(default)]
    pub crl: Option<PathBuf>,
    /// CNs of service certificates admitted to the internal API.
    #[serde(default)]
    pub internal_allowed_cns: Vec<String>,
}

/// How the gateway and worker reach the registry's internal API.
#[derive(Deserialize, Clone, Debug)]
pub struct RegistrySettings {
    pub url: String,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// PEM bundle (certificate + key) presented as client identity.
    #[serde(default)]
    pub client_identity: Option<PathBuf>,
    /// CA bundle used to verify the registry's server certificate.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// Delivery worker pool tuning.
#[derive(Deserialize, Clone, Debug)]
pub struct WorkerSettings {
    pub worker_id: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_pop_timeout")]
    pub pop_timeout_secs: u64,
    #[serde(default = "default_grace_period")]
    pub shutdown_grace_secs: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_retry_interval() -> u64 {
    30
}

fn default_max_attempts() -> i32 {
    10_000
}

fn default_grace_period() -> u64 {
    30
}

/// Submission rate limiting, per client.
#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitSettings {
    pub window_secs: u64,
    pub max_requests: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 100,
        }
    }
}

/// Gateway-only switches.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct GatewaySettings {
    /// Development shortcut: trust the `X-Client-ID` header instead of a
    /// peer certificate. Off unless explicitly enabled; every use is audit
    /// logged.
    #[serde(default)]
    pub trusted_header_auth: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs rotate daily into this directory instead of stdout.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
database:
  username: relay
  password: secret
  port: 5432
  host: localhost
  name: relay_broker
application:
  host: 127.0.0.1
  port: 8443
crypto:
  key_dir: /var/lib/relay/keys
  current_key_version: 1
  hash_salt: test_salt
queue:
  host: localhost
  port: 6379
"#;

    const OVERLAY: &str = r#"
application:
  port: 9443
rate_limit:
  window_secs: 10
  max_requests: 5
"#;

    #[test]
    fn overlay_wins_over_base() {
        let settings = load_settings_from_str(BASE, OVERLAY).unwrap();
        assert_eq!(settings.application.port, 9443);
        assert_eq!(settings.application.host, "127.0.0.1");
        assert_eq!(settings.rate_limit.max_requests, 5);
        assert_eq!(settings.queue.key, "message_queue");
        assert!(!settings.gateway.trusted_header_auth);
        assert!(settings.tls.is_none());
        assert!(settings.auth.is_none());
    }

    #[test]
    fn queue_url_with_and_without_password() {
        let mut settings = QueueSettings {
            host: "localhost".into(),
            port: 6379,
            password: None,
            key: default_queue_key(),
        };
        assert_eq!(settings.url(), "redis://localhost:6379");
        settings.password = Some("hunter2".into());
        assert_eq!(settings.url(), "redis://:hunter2@localhost:6379");
    }

    #[test]
    fn connection_string_contains_database_name() {
        let settings = DatabaseSettings {
            username: "relay".into(),
            password: "secret".into(),
            port: 5432,
            host: "db".into(),
            name: "relay_broker".into(),
            cacertpath: None,
            max_connections: default_max_connections(),
        };
        assert_eq!(
            settings.connection_string(),
            "postgres://relay:secret@db:5432/relay_broker"
        );
        assert_eq!(
            settings.connection_string_without_database(),
            "postgres://relay:secret@db:5432"
        );
    }
}
