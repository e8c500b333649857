//! Display daemon: renders the signer's current chain tip on the LCD and
//! serves the display IPC socket the signer pushes to.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sigil_config::Options;
use sigil_display::{Manager, NullLcd};
use sigil_ipc::{inherited_or_bind, DisplayHandler, IpcServer, TipSink};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "sigil-displayd", version, about = "Chain-tip display daemon")]
struct Cli {
    /// Config file
    #[arg(long, default_value = "/etc/sigil/displayd.json")]
    config: PathBuf,
}

struct ManagerSink(Arc<Manager>);

impl TipSink for ManagerSink {
    fn update_tip(&self, tail: &[u8]) {
        self.0.update_tip(tail);
    }
}

fn start_worker(manager: &Arc<Manager>, options: &Options) -> Result<()> {
    if options.use_hardware {
        #[cfg(target_os = "linux")]
        {
            let bus = sigil_display::LinuxI2c::open(options.i2c_bus, options.i2c_address)
                .with_context(|| format!("open /dev/i2c-{}", options.i2c_bus))?;
            let mut lcd = sigil_display::Hd44780::new(bus);
            lcd.init().context("initialize lcd")?;
            info!(bus = options.i2c_bus, address = options.i2c_address, "lcd ready");
            let _ = manager.spawn_worker(lcd);
            return Ok(());
        }
        #[cfg(not(target_os = "linux"))]
        anyhow::bail!("use_hardware requires linux i2c support");
    }
    info!("no display hardware configured; rendering to the void");
    let _ = manager.spawn_worker(NullLcd);
    Ok(())
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

    let manager = Manager::new();
    start_worker(&manager, &options)?;

    if options.poll_tail {
        let poller = Arc::clone(&manager);
        let tail_file = options.tail_file.clone();
        info!(path = %tail_file.display(), "polling tail file");
        thread::spawn(move || loop {
            poller.poll_tail_file(&tail_file);
            thread::sleep(POLL_INTERVAL);
        });
    }

    let listener = inherited_or_bind(&options.display_socket)
        .with_context(|| format!("listen on {:?}", options.display_socket))?;
    let mut server = IpcServer::new(listener, DisplayHandler::new(ManagerSink(manager)));
    server.serve_forever().context("display server")?;
    Ok(())
}
