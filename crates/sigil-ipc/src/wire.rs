//! Exact-size request/response exchange over a connected stream.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;

use crate::{IpcError, IPC_TIMEOUT};

pub(crate) fn apply_deadlines(stream: &UnixStream) -> io::Result<()> {
    stream.set_read_timeout(Some(IPC_TIMEOUT))?;
    stream.set_write_timeout(Some(IPC_TIMEOUT))?;
    Ok(())
}

/// Read the peer's message to EOF, bounded just past the largest size we
/// are willing to accept, then validate the exact byte count.
pub(crate) fn recv_sized(
    stream: &mut UnixStream,
    allowed: &'static [usize],
) -> Result<Vec<u8>, IpcError> {
    let max = allowed.iter().copied().max().unwrap_or(0);
    let mut message = Vec::with_capacity(max + 1);
    Read::by_ref(stream).take(max as u64 + 1).read_to_end(&mut message)?;
    if !allowed.contains(&message.len()) {
        return Err(IpcError::BadRequestSize {
            got: message.len(),
            allowed,
        });
    }
    Ok(message)
}

/// Write a message and half-close so the peer's EOF-bounded read completes.
pub(crate) fn send_final(stream: &mut UnixStream, message: &[u8]) -> io::Result<()> {
    stream.write_all(message)?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SIZES: &[usize] = &[96, 400];

    #[test]
    fn recv_validates_exact_sizes() {
        for good in [96usize, 400] {
            let (mut a, mut b) = UnixStream::pair().unwrap();
            let sender = thread::spawn(move || send_final(&mut a, &vec![7u8; good]).unwrap());
            let got = recv_sized(&mut b, SIZES).unwrap();
            assert_eq!(got, vec![7u8; good]);
            sender.join().unwrap();
        }

        for bad in [0usize, 1, 95, 97, 399, 401, 800] {
            let (mut a, mut b) = UnixStream::pair().unwrap();
            let sender = thread::spawn(move || send_final(&mut a, &vec![7u8; bad]).ok());
            let err = recv_sized(&mut b, SIZES).unwrap_err();
            match err {
                IpcError::BadRequestSize { got, allowed } => {
                    // An over-long send is clamped at the read bound
                    assert_eq!(got, bad.min(401));
                    assert_eq!(allowed, SIZES);
                }
                other => panic!("unexpected error: {other}"),
            }
            sender.join().unwrap();
        }
    }

    #[test]
    fn recv_tolerates_chunked_sends() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let sender = thread::spawn(move || {
            for chunk in [0u8; 400].chunks(64) {
                a.write_all(chunk).unwrap();
                a.flush().unwrap();
            }
            a.shutdown(Shutdown::Write).unwrap();
        });
        let got = recv_sized(&mut b, SIZES).unwrap();
        assert_eq!(got.len(), 400);
        sender.join().unwrap();
    }
}
