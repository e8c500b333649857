//! Half-duplex request/response transport over a UART.
//!
//! There are no framing bytes: length is implied by role. The signer side
//! reads exactly 224 bytes and answers with exactly 400; the proxy side does
//! the reverse. The line is lossy under resets and at boot, so the client
//! retries blindly; the signer's idempotence makes that safe.

use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use sigil_chain::{
    b32enc, is_valid, log_request, log_request_attempt, log_response, message, pubkey, REQUEST,
    RESPONSE,
};

pub const BAUDRATE: u32 = 57_600;
pub const TIMEOUT: Duration = Duration::from_secs(2);
pub const RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bad request size {got}")]
    BadRequest { got: usize },

    #[error("serial retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("serial port: {0}")]
    Port(#[from] serialport::Error),

    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// A duplex byte channel with pyserial-style reads: `read(size)` returns up
/// to `size` bytes, an empty buffer meaning the timeout elapsed idle.
pub trait Channel {
    fn read(&mut self, size: usize) -> io::Result<Vec<u8>>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// A real UART configured 57600 8N1 with the standard read timeout.
pub struct SerialChannel {
    port: Box<dyn serialport::SerialPort>,
}

pub fn open_serial(port: &str) -> Result<SerialChannel, TransportError> {
    let port = serialport::new(port, BAUDRATE)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(TIMEOUT)
        .open()?;
    Ok(SerialChannel { port })
}

impl Channel for SerialChannel {
    fn read(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

/// One read of exactly `size` bytes. Anything else — a timeout tick, a short
/// or long read, a frame that fails self-verification — is `None`: line
/// garbage never raises, it is simply not a frame.
pub fn read_frame<C: Channel>(channel: &mut C, size: usize) -> io::Result<Option<Vec<u8>>> {
    let msg = channel.read(size)?;
    if msg.is_empty() {
        return Ok(None);
    }
    if msg.len() != size {
        warn!(expected = size, got = msg.len(), "short serial read");
        return Ok(None);
    }
    if is_valid(&msg) {
        return Ok(Some(msg));
    }
    warn!(pubkey = %b32enc(pubkey(&msg)), "bad signature on serial frame");
    Ok(None)
}

/// Whatever turns a verified 224-byte request into a 400-byte response; on
/// the signer daemon this is the private-IPC client.
pub trait SignHandler {
    fn sign(&mut self, request: &[u8]) -> io::Result<Vec<u8>>;
}

/// Debug-only fault injection: abort the process with probability 1/N per
/// request, to exercise the recovery path end to end.
pub struct DebugAbort {
    one_in: u32,
}

impl DebugAbort {
    pub fn new(one_in: u32) -> Option<DebugAbort> {
        (one_in > 0).then_some(DebugAbort { one_in })
    }

    fn maybe_abort(&self) {
        use rand::Rng;
        if rand::thread_rng().gen_ratio(1, self.one_in) {
            error!(one_in = self.one_in, "debug abort triggered");
            std::process::abort();
        }
    }
}

/// Signer-side server loop: read a request, sign, write the response. No
/// state is carried across iterations; a malformed read just re-reads.
pub struct SerialServer<C, H> {
    channel: C,
    handler: H,
    debug_abort: Option<DebugAbort>,
}

impl<C: Channel, H: SignHandler> SerialServer<C, H> {
    pub fn new(channel: C, handler: H) -> SerialServer<C, H> {
        SerialServer {
            channel,
            handler,
            debug_abort: None,
        }
    }

    pub fn with_debug_abort(mut self, debug_abort: Option<DebugAbort>) -> SerialServer<C, H> {
        self.debug_abort = debug_abort;
        self
    }

    /// Runs until the port itself fails.
    pub fn serve_forever(&mut self) -> Result<(), TransportError> {
        loop {
            let request = match read_frame(&mut self.channel, REQUEST)? {
                Some(request) => request,
                None => continue,
            };
            if let Some(abort) = &self.debug_abort {
                abort.maybe_abort();
            }
            log_request(&request);
            let response = match self.handler.sign(&request) {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "sign handler failed; dropping request");
                    continue;
                }
            };
            log_response(&response);
            self.channel.write_all(&response)?;
            self.channel.flush()?;
        }
    }
}

/// Proxy-side client: write the request, wait for the one response that
/// embeds it verbatim, retrying through line noise.
pub struct SerialClient<C> {
    channel: C,
    retries: u32,
}

impl<C: Channel> SerialClient<C> {
    pub fn new(channel: C) -> SerialClient<C> {
        SerialClient {
            channel,
            retries: RETRIES,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> SerialClient<C> {
        self.retries = retries;
        self
    }

    pub fn request(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        if request.len() != REQUEST {
            return Err(TransportError::BadRequest { got: request.len() });
        }
        log_request(request);
        for attempt in 0..self.retries {
            log_request_attempt(request, attempt, self.retries);
            self.channel.write_all(request)?;
            self.channel.flush()?;
            if let Some(response) = read_frame(&mut self.channel, RESPONSE)? {
                // Anchor the response to this exact request: the signer
                // embeds the request verbatim in the tail 224 bytes.
                if message(&response) == request {
                    log_response(&response);
                    return Ok(response);
                }
                warn!("valid response for a different request; dropping");
            }
            let drained = self.channel.read(RESPONSE * 2)?;
            if !drained.is_empty() {
                debug!(drained = drained.len(), "drained stray serial bytes");
            }
        }
        Err(TransportError::RetriesExhausted {
            attempts: self.retries,
        })
    }
}
