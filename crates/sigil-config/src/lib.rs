//! Daemon configuration: a small JSON object merged over typed defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config files are tiny; anything bigger is not one of ours.
pub const MAX_CONFIG_FILE_SIZE: u64 = 4096;

/// Role defaults for the UART device.
pub const SIGNER_SERIAL_PORT: &str = "/dev/ttyAMA0";
pub const PROXY_SERIAL_PORT: &str = "/dev/ttyUSB0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file too large: {got} bytes")]
    TooLarge { got: u64 },

    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Options {
    /// UART device; the per-role default applies when unset.
    pub serial_port: Option<String>,

    // Display hardware selection
    pub i2c_bus: u8,
    pub i2c_address: u16,
    pub use_hardware: bool,

    pub debug: bool,
    /// Abort the serial server with probability 1/N per request; 0 disables.
    /// Only honored when `debug` is set.
    pub debug_abort_probability: u32,

    pub store_dir: PathBuf,
    pub private_socket: PathBuf,
    pub display_socket: PathBuf,
    pub client_socket: PathBuf,
    pub tail_file: PathBuf,
    /// Display daemon: also poll `tail_file` for tip changes instead of
    /// relying on pushes alone.
    pub poll_tail: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            serial_port: None,
            i2c_bus: 1,
            i2c_address: 0x27,
            use_hardware: false,
            debug: false,
            debug_abort_probability: 0,
            store_dir: PathBuf::from("/var/lib/sigil"),
            private_socket: PathBuf::from("/run/sigil/private.sock"),
            display_socket: PathBuf::from("/run/sigil/display.sock"),
            client_socket: PathBuf::from("/run/sigil/client.sock"),
            tail_file: PathBuf::from("/run/sigil/tail"),
            poll_tail: false,
        }
    }
}

impl Options {
    /// An absent file is just the defaults; a present one must be a JSON
    /// object holding only recognized, correctly typed keys.
    pub fn load(path: &Path) -> Result<Options, ConfigError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Options::default())
            }
            Err(err) => return Err(err.into()),
        };
        if meta.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge { got: meta.len() });
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}
