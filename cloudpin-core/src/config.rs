//! `ServiceConfig` and the structs nested under it, per the data model and
//! external interfaces sections. Field names follow the original
//! `savant_cloudpin.cfg` dataclasses; Rust types add the validation the
//! Python side deferred to call sites.

use crate::error::{CloudPinError, ConfigError};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// `source: (router\+)?(bind|connect):(tcp://<host>:<port> | ipc:///<path>)`
static SOURCE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^(router\+)?(bind|connect):(tcp://[^:/]+:\d+|ipc://.+)$").unwrap()
});

/// `sink: (dealer\+)?(bind|connect):(tcp://<host>:<port> | ipc:///<path>)`
static SINK_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^(dealer\+)?(bind|connect):(tcp://[^:/]+:\d+|ipc://.+)$").unwrap()
});

fn validate_source_url(url: &str) -> Result<(), CloudPinError> {
    if SOURCE_URL_RE.is_match(url) {
        Ok(())
    } else {
        Err(CloudPinError::Config(ConfigError::new(format!(
            "source.url does not match (router+)?(bind|connect):(tcp://<host>:<port>|ipc:///<path>): {url}"
        ))))
    }
}

fn validate_sink_url(url: &str) -> Result<(), CloudPinError> {
    if SINK_URL_RE.is_match(url) {
        Ok(())
    } else {
        Err(CloudPinError::Config(ConfigError::new(format!(
            "sink.url does not match (dealer+)?(bind|connect):(tcp://<host>:<port>|ipc:///<path>): {url}"
        ))))
    }
}

/// Local ZeroMQ endpoint the bridge reads application messages from.
///
/// The URL is always coerced to a `router:` socket regardless of the scheme
/// the operator supplies, mirroring `ReaderConfig.as_router` in the original.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    pub results_queue_size: usize,
    pub receive_timeout: Duration,
    pub receive_hwm: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            results_queue_size: 1_000,
            receive_timeout: Duration::from_millis(100),
            receive_hwm: 1_000,
        }
    }
}

/// Local ZeroMQ endpoint the bridge writes application messages to.
///
/// The URL is always coerced to a `dealer:` socket, mirroring
/// `WriterConfig.as_dealer` in the original.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub url: String,
    pub max_inflight_messages: usize,
    pub send_timeout: Duration,
    pub send_retries: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_inflight_messages: 1_000,
            send_timeout: Duration::from_millis(100),
            send_retries: 3,
        }
    }
}

/// Paths to a certificate/key pair, used for both the server's own identity
/// and an optional client-presented identity.
#[derive(Debug, Clone, Default)]
pub struct CertKeyConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// TLS configuration as seen by the Client supervisor (C5).
#[derive(Debug, Clone, Default)]
pub struct ClientTlsConfig {
    /// Skip server certificate verification entirely. Only for local testing.
    pub insecure: bool,
    /// Verify the server's certificate but not that its name matches the URL.
    pub check_hostname: bool,
    /// Custom CA bundle; falls back to the platform's native roots when unset.
    pub ca_file: Option<PathBuf>,
    /// Client certificate presented for mutual TLS, if any.
    pub client_identity: Option<CertKeyConfig>,
}

/// TLS configuration as seen by the Server supervisor (C5).
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
    pub insecure: bool,
    pub client_cert_required: bool,
    pub ca_file: Option<PathBuf>,
    pub identity: CertKeyConfig,
}

/// One histogram's explicit bucket boundaries, or `None` to use the metrics
/// backend's own default bucketing.
pub type HistogramBoundaries = Option<Vec<f64>>;

/// Explicit bucket boundaries for each histogram instrument named in the
/// measurement layer (C7). Each is independently optional.
#[derive(Debug, Clone, Default)]
pub struct HistogramBoundariesConfig {
    pub message_size: HistogramBoundaries,
    pub delay: HistogramBoundaries,
}

/// Everything a running `ClientService` needs, aside from its socket roles.
#[derive(Debug, Clone)]
pub struct ClientServiceConfig {
    pub io_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub server_url: String,
    pub api_key: String,
    pub tls: ClientTlsConfig,
    pub max_frame_size: usize,
    pub histogram_boundaries: HistogramBoundariesConfig,
}

/// Everything a running `ServerService` needs.
#[derive(Debug, Clone)]
pub struct ServerServiceConfig {
    pub io_timeout: Duration,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub endpoint: std::net::SocketAddr,
    pub api_key: String,
    pub tls: ServerTlsConfig,
    pub max_frame_size: usize,
    pub histogram_boundaries: HistogramBoundariesConfig,
}

/// Default cap on `8 + topic.len() + body.len() + extra.len()`, matching
/// common WebSocket max-message-size defaults. Resolves the Open Question
/// about unbounded `extra` left in the design notes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

impl ClientServiceConfig {
    /// Validate cross-field invariants that a plain struct literal cannot
    /// enforce: `wss://` is required unless `insecure` is set, and a client
    /// key requires a matching client cert (and vice versa).
    pub fn validate(&self) -> Result<(), CloudPinError> {
        validate_source_url(&self.source.url)?;
        validate_sink_url(&self.sink.url)?;
        if !self.tls.insecure && !self.server_url.starts_with("wss://") {
            return Err(CloudPinError::Config(ConfigError::new(format!(
                "server_url must use the wss:// scheme unless tls.insecure is set: {}",
                self.server_url
            ))));
        }
        if self.api_key.is_empty() {
            return Err(CloudPinError::Config(ConfigError::new(
                "api_key must not be empty",
            )));
        }
        Ok(())
    }
}

impl ServerServiceConfig {
    pub fn validate(&self) -> Result<(), CloudPinError> {
        if self.api_key.is_empty() {
            return Err(CloudPinError::Config(ConfigError::new(
                "api_key must not be empty",
            )));
        }
        if !self.tls.insecure {
            if self.tls.identity.cert_file.as_os_str().is_empty()
                || self.tls.identity.key_file.as_os_str().is_empty()
            {
                return Err(CloudPinError::Config(ConfigError::new(
                    "tls.identity.{cert_file,key_file} are required unless tls.insecure is set",
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config() -> ClientServiceConfig {
        ClientServiceConfig {
            io_timeout: Duration::from_millis(100),
            reconnect_timeout: Duration::from_secs(2),
            source: SourceConfig {
                url: "bind:tcp://127.0.0.1:5555".to_owned(),
                ..SourceConfig::default()
            },
            sink: SinkConfig {
                url: "connect:tcp://127.0.0.1:5556".to_owned(),
                ..SinkConfig::default()
            },
            server_url: "wss://cloud.example.test".to_owned(),
            api_key: "s3cr3t".to_owned(),
            tls: ClientTlsConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            histogram_boundaries: HistogramBoundariesConfig::default(),
        }
    }

    #[test]
    fn valid_client_config_passes() {
        client_config().validate().unwrap();
    }

    #[test]
    fn client_config_rejects_a_malformed_source_url() {
        let mut cfg = client_config();
        cfg.source.url = "tcp://127.0.0.1:5555".to_owned();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn client_config_rejects_a_malformed_sink_url() {
        let mut cfg = client_config();
        cfg.sink.url = "router+bind:tcp://127.0.0.1:5556".to_owned();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn client_config_requires_wss_unless_insecure() {
        let mut cfg = client_config();
        cfg.server_url = "ws://cloud.example.test".to_owned();
        assert!(cfg.validate().is_err());
        cfg.tls.insecure = true;
        cfg.validate().unwrap();
    }

    #[test]
    fn client_config_rejects_an_empty_api_key() {
        let mut cfg = client_config();
        cfg.api_key = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ipc_urls_are_accepted() {
        let mut cfg = client_config();
        cfg.source.url = "bind:ipc:///tmp/cloudpin-source.sock".to_owned();
        cfg.sink.url = "dealer+connect:ipc:///tmp/cloudpin-sink.sock".to_owned();
        cfg.validate().unwrap();
    }

    #[test]
    fn server_config_requires_tls_identity_unless_insecure() {
        let cfg = ServerServiceConfig {
            io_timeout: Duration::from_millis(100),
            source: SourceConfig {
                url: "bind:tcp://0.0.0.0:5555".to_owned(),
                ..SourceConfig::default()
            },
            sink: SinkConfig {
                url: "connect:tcp://127.0.0.1:5556".to_owned(),
                ..SinkConfig::default()
            },
            endpoint: "0.0.0.0:8443".parse().unwrap(),
            api_key: "s3cr3t".to_owned(),
            tls: ServerTlsConfig {
                insecure: false,
                client_cert_required: false,
                ca_file: None,
                identity: CertKeyConfig::default(),
            },
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            histogram_boundaries: HistogramBoundariesConfig::default(),
        };
        assert!(cfg.validate().is_err());
    }
}
