//! CLI subcommands: `cloudpin client` and `cloudpin server`.

pub mod client;
pub mod server;

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Fields shared by both roles' local bus endpoints, per §3/§6's
/// `SourceConfig`/`SinkConfig`.
#[derive(Debug, Clone, Args)]
pub struct BusArgs {
    /// Local ZeroMQ ROUTER-capable URL the bridge reads application messages
    /// from, e.g. `bind:tcp://127.0.0.1:5555`.
    #[arg(long)]
    pub source_url: String,

    /// Bounded number of results the local reader queues ahead of the
    /// outbound pump.
    #[arg(long, default_value_t = 1_000)]
    pub source_queue_size: usize,

    /// Local ZeroMQ DEALER-capable URL the bridge writes application
    /// messages to, e.g. `connect:tcp://127.0.0.1:5556`.
    #[arg(long)]
    pub sink_url: String,

    /// Maximum number of sends the local writer allows in flight at once.
    #[arg(long, default_value_t = 1_000)]
    pub max_inflight_messages: usize,
}

/// Fields shared by both roles' TLS material, per §6's handshake rules.
#[derive(Debug, Clone, Args)]
pub struct TlsArgs {
    /// Skip TLS handshake verification entirely; permits `ws://` on the
    /// Client and serves plaintext on the Server. Testing/local-only.
    #[arg(long)]
    pub insecure: bool,

    /// Custom CA bundle (PEM). Falls back to the platform's native roots.
    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    /// Certificate presented by this process (Server's own identity, or the
    /// Client's optional mTLS identity).
    #[arg(long)]
    pub cert_file: Option<PathBuf>,

    /// Private key matching `--cert-file`.
    #[arg(long)]
    pub key_file: Option<PathBuf>,
}

pub(crate) const fn io_timeout(io_timeout_ms: u64) -> Duration {
    Duration::from_millis(io_timeout_ms)
}
