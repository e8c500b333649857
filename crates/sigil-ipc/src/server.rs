//! The accept loop and the three server roles.
//!
//! Call graph: `app → client-IPC → serial → private-IPC → {chain-signer,
//! display-IPC}`. Every connection is isolated: one bad peer is logged and
//! dropped, and unless the server was built fatal-on-error the loop keeps
//! accepting. Fatal signer conditions (counter exhaustion, a store write
//! that will not land) still propagate out of `serve_forever`.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use sigil_chain::{
    frame, log_request, log_response, verify_self, ChainError, ChainSigner, FrameStore, Signer,
    DIGEST, GENESIS, REQUEST, RESPONSE,
};
use sigil_crypto::digest;
use sigil_serial::{Channel, SerialClient};
use sigil_store::{atomic_write, ChainStore};

use crate::client::DisplayClient;
use crate::wire::{apply_deadlines, recv_sized, send_final};
use crate::IpcError;

pub const PRIVATE_SIZES: &[usize] = &[REQUEST];
pub const DISPLAY_SIZES: &[usize] = &[GENESIS, RESPONSE];
pub const CLIENT_SIZES: &[usize] = &[DIGEST];

/// One server role: which sizes it accepts and what it does with a request.
pub trait Handler {
    fn sizes(&self) -> &'static [usize];
    fn handle(&mut self, request: &[u8]) -> Result<Vec<u8>, IpcError>;
}

pub struct IpcServer<H> {
    listener: UnixListener,
    handler: H,
    fatal: bool,
}

impl<H: Handler> IpcServer<H> {
    pub fn new(listener: UnixListener, handler: H) -> IpcServer<H> {
        IpcServer {
            listener,
            handler,
            fatal: false,
        }
    }

    /// A fatal server dies on the first handling error instead of isolating
    /// it; the signing and client servers stay non-fatal so one malformed
    /// peer cannot take the daemon down.
    pub fn fatal_on_error(mut self, fatal: bool) -> IpcServer<H> {
        self.fatal = fatal;
        self
    }

    pub fn serve_forever(&mut self) -> Result<(), IpcError> {
        loop {
            let (stream, _) = self.listener.accept()?;
            match self.serve_connection(stream) {
                Ok(len) => debug!(response = len, "request served"),
                Err(err) if self.fatal || fatal_error(&err) => return Err(err),
                Err(err) => warn!(error = %err, "error handling request"),
            }
        }
    }

    fn serve_connection(&mut self, mut stream: UnixStream) -> Result<usize, IpcError> {
        apply_deadlines(&stream)?;
        let request = recv_sized(&mut stream, self.handler.sizes())?;
        debug!(request = request.len(), "request received");
        let response = self.handler.handle(&request)?;
        send_final(&mut stream, &response)?;
        Ok(response.len())
    }
}

/// Chain corruption is never a per-connection condition: once the counter
/// is exhausted or a frame cannot be made durable, the daemon must stop.
fn fatal_error(err: &IpcError) -> bool {
    matches!(
        err,
        IpcError::Chain(ChainError::CounterExhausted { .. }) | IpcError::Chain(ChainError::Io(_))
    )
}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The signing service on the offline device. Owns the chain signer; pushes
/// each fresh tail to the display daemon and the publish file, best-effort.
pub struct PrivateHandler<S: FrameStore> {
    signer: ChainSigner<S>,
    display: Option<DisplayClient>,
    tail_file: Option<PathBuf>,
}

impl<S: FrameStore> PrivateHandler<S> {
    pub fn new(signer: ChainSigner<S>) -> PrivateHandler<S> {
        PrivateHandler {
            signer,
            display: None,
            tail_file: None,
        }
    }

    pub fn with_display(mut self, display: DisplayClient) -> PrivateHandler<S> {
        self.display = Some(display);
        self
    }

    pub fn with_tail_file(mut self, tail_file: PathBuf) -> PrivateHandler<S> {
        self.tail_file = Some(tail_file);
        self
    }

    pub fn signer(&self) -> &ChainSigner<S> {
        &self.signer
    }

    /// The chain store is the durability boundary; the LCD and the publish
    /// file are conveniences and must not fail a signing request.
    fn publish_tail(&self, tail: &[u8]) {
        if let Some(path) = &self.tail_file {
            if let Err(err) = atomic_write(0o644, tail, path) {
                warn!(error = %err, path = %path.display(), "tail publish failed");
            }
        }
        if let Some(display) = &self.display {
            if let Err(err) = display.request(tail) {
                warn!(error = %err, "display push failed");
            }
        }
    }
}

impl<S: FrameStore> Handler for PrivateHandler<S> {
    fn sizes(&self) -> &'static [usize] {
        PRIVATE_SIZES
    }

    fn handle(&mut self, request: &[u8]) -> Result<Vec<u8>, IpcError> {
        verify_self(request)?;
        log_request(request);
        let before = self.signer.counter();
        let response = self.signer.sign(request, None)?.to_vec();
        log_response(&response);
        if self.signer.counter() != before {
            self.publish_tail(&response);
        }
        Ok(response)
    }
}

/// The tip consumer behind the display server; the display manager
/// implements this.
pub trait TipSink: Send {
    fn update_tip(&self, tail: &[u8]);
}

/// The display service: verified tips in, a SHA-384 integrity echo out.
pub struct DisplayHandler<T: TipSink> {
    sink: T,
}

impl<T: TipSink> DisplayHandler<T> {
    pub fn new(sink: T) -> DisplayHandler<T> {
        DisplayHandler { sink }
    }
}

impl<T: TipSink> Handler for DisplayHandler<T> {
    fn sizes(&self) -> &'static [usize] {
        DISPLAY_SIZES
    }

    fn handle(&mut self, request: &[u8]) -> Result<Vec<u8>, IpcError> {
        verify_self(request)?;
        self.sink.update_tip(request);
        let echo = digest::sha384(request).expect("frame is never empty");
        Ok(echo.to_vec())
    }
}

/// The application-facing service on the proxy. Wraps a 48-byte digest in
/// the proxy's own request chain, relays it over the serial line, validates
/// the returned attestation and persists it before handing it back.
pub struct ClientHandler<C: Channel> {
    signer: Signer,
    serial: SerialClient<C>,
    store: ChainStore,
}

impl<C: Channel> ClientHandler<C> {
    pub fn new(signer: Signer, serial: SerialClient<C>, store: ChainStore) -> ClientHandler<C> {
        ClientHandler {
            signer,
            serial,
            store,
        }
    }

    pub fn public(&self) -> &[u8; 32] {
        self.signer.public()
    }
}

impl<C: Channel> Handler for ClientHandler<C> {
    fn sizes(&self) -> &'static [usize] {
        CLIENT_SIZES
    }

    fn handle(&mut self, request: &[u8]) -> Result<Vec<u8>, IpcError> {
        let wrapped = self.signer.sign(wall_clock(), request)?;
        let response = self.serial.request(&wrapped)?;
        verify_self(&response)?;
        if frame::message(&response) != wrapped {
            return Err(IpcError::ResponseMismatch);
        }
        self.store.write(&response)?;
        Ok(response)
    }
}
