//! `cloudpin client`: dial a Server, reconnecting until stopped.
//!
//! Grounded in `rama-cli/src/cmd/stunnel/mod.rs`'s `Shutdown::default()` +
//! `spawn_task_fn` + `shutdown_with_limit` shape: `Shutdown::default()`
//! already listens for SIGINT/SIGTERM (`tokio_graceful::default_signal`),
//! same as every long-running `rama-cli` command; here the spawned task
//! races `ClientService::run()` against the shutdown guard's cancellation
//! and calls `service.stop()` cooperatively on either signal, per §4.6's
//! "`stop()` sets `running=false` and awaits `stopped`".

use super::{io_timeout, BusArgs, TlsArgs};
use crate::error::ErrorWithExitCode;
use clap::Args;
use cloudpin_core::config::{
    CertKeyConfig, ClientServiceConfig, ClientTlsConfig, HistogramBoundariesConfig, SinkConfig, SourceConfig,
    DEFAULT_MAX_FRAME_SIZE,
};
use cloudpin_core::ClientService;
use rama::graceful::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Args)]
pub struct CliCommandClient {
    #[command(flatten)]
    pub bus: BusArgs,

    #[command(flatten)]
    pub tls: TlsArgs,

    /// `wss://` (or `ws://` with `--insecure`) URL of the Server to dial.
    #[arg(long)]
    pub server_url: String,

    /// Shared secret sent as the `x-api-key` handshake header.
    #[arg(long)]
    pub api_key: String,

    /// Verify the server certificate's name matches `--server-url`'s host.
    #[arg(long, default_value_t = true)]
    pub check_hostname: bool,

    /// Idle-poll interval for the pump loops, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub io_timeout_ms: u64,

    /// Delay between reconnect attempts, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub reconnect_timeout_ms: u64,

    /// Cap on `8 + topic.len() + body.len() + extra.len()` for one frame.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Seconds to wait for the service to finish tearing down after a
    /// shutdown signal before giving up on a clean exit.
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

pub async fn run(cmd: CliCommandClient) -> Result<(), ErrorWithExitCode> {
    crate::trace::init_tracing(tracing::level_filters::LevelFilter::INFO);

    let config = ClientServiceConfig {
        io_timeout: io_timeout(cmd.io_timeout_ms),
        reconnect_timeout: Duration::from_millis(cmd.reconnect_timeout_ms),
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
        server_url: cmd.server_url,
        api_key: cmd.api_key,
        tls: ClientTlsConfig {
            insecure: cmd.tls.insecure,
            check_hostname: cmd.check_hostname,
            ca_file: cmd.tls.ca_file,
            client_identity: match (cmd.tls.cert_file, cmd.tls.key_file) {
                (Some(cert_file), Some(key_file)) => Some(CertKeyConfig { cert_file, key_file }),
                _ => None,
            },
        },
        max_frame_size: cmd.max_frame_size,
        histogram_boundaries: HistogramBoundariesConfig::default(),
    };

    let service = Arc::new(ClientService::new(config));
    let shutdown = Shutdown::default();

    let run_service = service.clone();
    shutdown.spawn_task_fn(async move |guard| {
        info!("cloudpin client starting");
        tokio::select! {
            biased;

            () = guard.cancelled() => {
                run_service.stop().await;
            }
            result = run_service.run() => {
                if let Err(err) = result {
                    error!(error = %err, "client service exited with an error");
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
