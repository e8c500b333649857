//! Offline signer daemon: the chain signer, its private IPC service, and
//! the serial server the proxy talks to.

use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sigil_chain::{log_genesis, ChainSigner};
use sigil_config::{Options, SIGNER_SERIAL_PORT};
use sigil_ipc::{inherited_or_bind, DisplayClient, IpcServer, PrivateClient, PrivateHandler};
use sigil_serial::{open_serial, DebugAbort, SerialServer};
use sigil_store::{atomic_write, ChainStore};

#[derive(Parser, Debug)]
#[command(name = "sigil-signerd", version, about = "Offline chain-signing daemon")]
struct Cli {
    /// Config file
    #[arg(long, default_value = "/etc/sigil/signerd.json")]
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
        .with_context(|| format!("open chain store under {:?}", options.store_dir))?;
    let signer = ChainSigner::new(store).context("initialize chain signer")?;
    log_genesis(signer.genesis());

    // Publish the genesis tip so the display has something to show before
    // the first request arrives. Both paths are best-effort.
    if let Some(parent) = options.tail_file.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    if let Err(err) = atomic_write(0o644, signer.genesis(), &options.tail_file) {
        warn!(error = %err, "cannot publish genesis tail");
    }
    if let Err(err) = DisplayClient::new(options.display_socket.clone()).request(signer.genesis()) {
        warn!(error = %err, "display daemon not reachable yet");
    }

    let handler = PrivateHandler::new(signer)
        .with_display(DisplayClient::new(options.display_socket.clone()))
        .with_tail_file(options.tail_file.clone());
    let listener = inherited_or_bind(&options.private_socket)
        .with_context(|| format!("listen on {:?}", options.private_socket))?;
    let mut private = IpcServer::new(listener, handler);
    thread::spawn(move || {
        // Per-connection errors are isolated inside serve_forever; anything
        // that escapes is a fatal signer condition.
        if let Err(err) = private.serve_forever() {
            error!(error = %err, "signing service failed");
            std::process::exit(1);
        }
    });

    let port = options
        .serial_port
        .clone()
        .unwrap_or_else(|| SIGNER_SERIAL_PORT.to_string());
    let channel = open_serial(&port).with_context(|| format!("open serial port {port}"))?;
    let debug_abort = if options.debug {
        DebugAbort::new(options.debug_abort_probability)
    } else {
        None
    };
    info!(%port, "serial server starting");
    let mut server = SerialServer::new(channel, PrivateClient::new(options.private_socket.clone()))
        .with_debug_abort(debug_abort);
    server.serve_forever().context("serial server")?;
    Ok(())
}
