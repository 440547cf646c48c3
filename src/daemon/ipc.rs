//! IPC wire protocol and client-side helpers.
//!
//! A connection carries exactly one request and one response. The request is
//! a null-terminated byte sequence; the response is opaque bytes whose shape
//! depends on the command. Endpoint access control is the socket file's
//! permission bits; there is no authentication layer.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Terminator closing every request frame.
pub const REQUEST_TERMINATOR: u8 = 0;

/// Observable state of the daemon endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcState {
    Listening,
    NotListening,
}

/// Probe the endpoint without sending a command. Any peer accepting the
/// connection counts as listening; a stale socket file refuses and counts
/// as not listening.
pub fn get_state(socket: &Path) -> IpcState {
    match UnixStream::connect(socket) {
        Ok(_) => IpcState::Listening,
        Err(_) => IpcState::NotListening,
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fsmonitor--daemon is not running on '{}'", .0.display())]
    NotRunning(PathBuf),

    #[error("request bytes continue past the terminator")]
    TrailingBytes,

    #[error("request is missing its terminator")]
    MissingTerminator,

    #[error("request is not valid UTF-8")]
    NotUtf8,
}

/// Send one command and collect the complete response.
pub fn send_command(socket: &Path, command: &str) -> Result<Vec<u8>, IpcError> {
    let mut stream = UnixStream::connect(socket).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
            IpcError::NotRunning(socket.to_path_buf())
        }
        _ => IpcError::Io(err),
    })?;

    stream.write_all(command.as_bytes())?;
    stream.write_all(&[REQUEST_TERMINATOR])?;
    stream.flush()?;
    // Half-close so the server sees the end of the frame.
    stream.shutdown(Shutdown::Write)?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    Ok(response)
}

/// Decode a request frame read up to EOF.
///
/// The frame must contain exactly one terminator, as its final byte. Bytes
/// continuing past the terminator mean the sender's framing disagrees with
/// its payload; since clients are local, that is a bug, not line noise.
pub fn decode_request(frame: &[u8]) -> Result<&str, IpcError> {
    let Some(nul) = frame.iter().position(|&b| b == REQUEST_TERMINATOR) else {
        return Err(IpcError::MissingTerminator);
    };
    if nul + 1 != frame.len() {
        return Err(IpcError::TrailingBytes);
    }
    std::str::from_utf8(&frame[..nul]).map_err(|_| IpcError::NotUtf8)
}
