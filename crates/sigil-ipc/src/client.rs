//! One-shot clients: connect, send, half-close, read the fixed-size reply.

use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use sigil_chain::{DIGEST, RESPONSE};

use crate::wire::{apply_deadlines, send_final};
use crate::IpcError;

pub struct IpcClient {
    path: PathBuf,
    response_size: usize,
}

impl IpcClient {
    pub fn new(path: PathBuf, response_size: usize) -> IpcClient {
        IpcClient {
            path,
            response_size,
        }
    }

    pub fn request(&self, request: &[u8]) -> Result<Vec<u8>, IpcError> {
        let mut stream = UnixStream::connect(&self.path)?;
        apply_deadlines(&stream)?;
        send_final(&mut stream, request)?;
        let mut response = Vec::with_capacity(self.response_size + 1);
        stream
            .by_ref()
            .take(self.response_size as u64 + 1)
            .read_to_end(&mut response)?;
        if response.len() != self.response_size {
            return Err(IpcError::BadResponseSize {
                expected: self.response_size,
                got: response.len(),
            });
        }
        Ok(response)
    }
}

/// Client of the signing service: 224-byte request in, 400-byte response out.
pub struct PrivateClient {
    inner: IpcClient,
}

impl PrivateClient {
    pub fn new(path: PathBuf) -> PrivateClient {
        PrivateClient {
            inner: IpcClient::new(path, RESPONSE),
        }
    }

    pub fn request(&self, request: &[u8]) -> Result<Vec<u8>, IpcError> {
        self.inner.request(request)
    }
}

/// The serial server forwards each verified request straight to the signing
/// service.
impl sigil_serial::SignHandler for PrivateClient {
    fn sign(&mut self, request: &[u8]) -> io::Result<Vec<u8>> {
        self.request(request).map_err(io::Error::from)
    }
}

/// Client of the display service: a 96- or 400-byte tip in, its 48-byte
/// SHA-384 echo out.
pub struct DisplayClient {
    inner: IpcClient,
}

impl DisplayClient {
    pub fn new(path: PathBuf) -> DisplayClient {
        DisplayClient {
            inner: IpcClient::new(path, DIGEST),
        }
    }

    pub fn request(&self, tail: &[u8]) -> Result<Vec<u8>, IpcError> {
        self.inner.request(tail)
    }
}

/// Application-side client of the proxy: a 48-byte digest in, the signer's
/// 400-byte attestation out.
pub struct ProxyClient {
    inner: IpcClient,
}

impl ProxyClient {
    pub fn new(path: PathBuf) -> ProxyClient {
        ProxyClient {
            inner: IpcClient::new(path, RESPONSE),
        }
    }

    pub fn request(&self, digest: &[u8]) -> Result<Vec<u8>, IpcError> {
        self.inner.request(digest)
    }
}
