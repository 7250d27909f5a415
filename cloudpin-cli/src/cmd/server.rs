//! `cloudpin server`: listen, authenticate, accept the first valid client.

use super::{io_timeout, BusArgs, TlsArgs};
use crate::error::ErrorWithExitCode;
use clap::Args;
use cloudpin_core::config::{
    CertKeyConfig, HistogramBoundariesConfig, ServerServiceConfig, ServerTlsConfig, SinkConfig, SourceConfig,
    DEFAULT_MAX_FRAME_SIZE,
};
use cloudpin_core::ServerService;
use rama::graceful::Shutdown;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Args)]
pub struct CliCommandServer {
    #[command(flatten)]
    pub bus: BusArgs,

    #[command(flatten)]
    pub tls: TlsArgs,

    /// Address to listen for client WebSocket connections on.
    #[arg(long, default_value = "0.0.0.0:8443")]
    pub endpoint: SocketAddr,

    /// Shared secret every inbound `x-api-key` header is checked against.
    #[arg(long)]
    pub api_key: String,

    /// Require and verify a client certificate (mutual TLS) against
    /// `--ca-file`.
    #[arg(long)]
    pub client_cert_required: bool,

    /// Idle-poll interval for the pump loops, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub io_timeout_ms: u64,

    /// Cap on `8 + topic.len() + body.len() + extra.len()` for one frame.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Seconds to wait for the service to finish tearing down after a
    /// shutdown signal before giving up on a clean exit.
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

pub async fn run(cmd: CliCommandServer) -> Result<(), ErrorWithExitCode> {
    crate::trace::init_tracing(tracing::level_filters::LevelFilter::INFO);

    let config = ServerServiceConfig {
        io_timeout: io_timeout(cmd.io_timeout_ms),
        source: SourceConfig {
            url: cmd.bus.source_url,
            results_queue_size: cmd.bus.source_queue_size,
            ..SourceConfig::default()
        },
        sink: SinkConfig {
            url: cmd.bus.sink_url,
            max_inflight_messages: cmd.bus.max_inflight_messages,
            ..SinkConfig::default()
        },
        endpoint: cmd.endpoint,
        api_key: cmd.api_key,
        tls: ServerTlsConfig {
            insecure: cmd.tls.insecure,
            client_cert_required: cmd.client_cert_required,
            ca_file: cmd.tls.ca_file,
            identity: CertKeyConfig {
                cert_file: cmd.tls.cert_file.unwrap_or_default(),
                key_file: cmd.tls.key_file.unwrap_or_default(),
            },
        },
        max_frame_size: cmd.max_frame_size,
        histogram_boundaries: HistogramBoundariesConfig::default(),
    };

    let service = Arc::new(ServerService::new(config));
    let shutdown = Shutdown::default();

    let run_service = service.clone();
    shutdown.spawn_task_fn(async move |guard| {
        info!("cloudpin server starting");
        tokio::select! {
            biased;

            () = guard.cancelled() => {
                run_service.stop().await;
            }
            result = run_service.run() => {
                if let Err(err) = result {
                    error!(error = %err, "server service exited with an error");
                }
            }
        }
    });

    shutdown
        .shutdown_with_limit(Duration::from_secs(cmd.shutdown_grace_secs))
        .await
        .map_err(|e| ErrorWithExitCode::new(1, format!("graceful shutdown: {e}")))?;

    Ok(())
}
