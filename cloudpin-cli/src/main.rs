//! entrypoint for cloudpin-cli
//!
//! Wires `cloudpin-core`'s `ClientService`/`ServerService` into a runnable
//! binary: a minimal `clap`-derived config surface, tracing/telemetry
//! bootstrap, and signal-triggered graceful shutdown. Everything in this
//! crate is the "external collaborator" glue `spec.md` §1 names out of
//! scope for the core; the duplex pump itself lives entirely in
//! `cloudpin-core`.

use clap::{Parser, Subcommand};
use rama_error::BoxError;

pub mod cmd;
use cmd::{client, server};

pub mod error;
pub mod trace;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "cloudpin")]
#[command(bin_name = "cloudpin")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmds: CliCommands,
}

#[derive(Debug, Subcommand)]
enum CliCommands {
    /// Dial a CloudPin Server and bridge the local ZeroMQ bus to it.
    Client(client::CliCommandClient),
    /// Listen for CloudPin Clients and bridge the local ZeroMQ bus to them.
    Server(server::CliCommandServer),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    #[allow(clippy::exit)]
    match match cli.cmds {
        CliCommands::Client(cfg) => client::run(cfg).await,
        CliCommands::Server(cfg) => server::run(cfg).await,
    } {
        Ok(()) => Ok(()),
        Err(err) => {
            eprintln!("exit with error ({}): {err}", err.exit_code());
            std::process::exit(err.exit_code());
        }
    }
}
