//! Online proxy daemon: accepts application digests on a local socket,
//! relays them to the offline signer over the serial line, and persists
//! every verified attestation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sigil_chain::{b32enc, log_genesis, Signer};
use sigil_config::{Options, PROXY_SERIAL_PORT};
use sigil_ipc::{inherited_or_bind, ClientHandler, IpcServer};
use sigil_serial::{open_serial, SerialClient};
use sigil_store::ChainStore;

#[derive(Parser, Debug)]
#[command(name = "sigil-proxyd", version, about = "Application-facing signing proxy")]
struct Cli {
    /// Config file
    #[arg(long, default_value = "/etc/sigil/proxyd.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let options = Options::load(&cli.config)
        .with_context(|| format!("load config {:?}", cli.config))?;

    let store = ChainStore::open_or_init(&options.store_dir)
        .with_context(|| format!("open response store under {:?}", options.store_dir))?;

    // The request chain lives only for this boot; a fresh key per run.
    let signer = Signer::new();
    log_genesis(signer.genesis());
    info!(pubkey = %b32enc(signer.public()), "request signer ready");

    let port = options
        .serial_port
        .clone()
        .unwrap_or_else(|| PROXY_SERIAL_PORT.to_string());
    let channel = open_serial(&port).with_context(|| format!("open serial port {port}"))?;
    let serial = SerialClient::new(channel);

    let listener = inherited_or_bind(&options.client_socket)
        .with_context(|| format!("listen on {:?}", options.client_socket))?;
    let mut server = IpcServer::new(listener, ClientHandler::new(signer, serial, store));
    server.serve_forever().context("client server")?;
    Ok(())
}
