// src/transfer/client.rs

//! The requesting side of the transfer channel.

use anyhow::{Context, Result};
use log::debug;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::buffer::BufferInfo;
use crate::error::TransferError;
use crate::transfer::wire;

const REPLY_CAPACITY: usize = 4096;

/// A buffer obtained from the compositor.
#[derive(Debug)]
pub struct ReceivedBuffer {
    pub name: String,
    pub info: BufferInfo,
    pub descriptor: OwnedFd,
}

/// Asks the channel at `path` for the buffer of client `name`.
///
/// The connection is closed before returning, which lets the channel move
/// on to the next peer.
pub fn request_buffer(path: &Path, name: &str) -> Result<ReceivedBuffer> {
    let stream = UnixStream::connect(path)
        .with_context(|| format!("Failed to connect to {}", path.display()))?;
    wire::send_with_fd(stream.as_fd(), name.as_bytes(), None)
        .with_context(|| format!("Failed to send request for '{}'", name))?;

    let mut buf = vec![0u8; REPLY_CAPACITY];
    let (len, descriptor) =
        wire::recv_with_fd(stream.as_fd(), &mut buf).context("Failed to receive reply")?;
    if len == 0 {
        return Err(TransferError::UnknownClient(name.to_string()).into());
    }
    let reply = std::str::from_utf8(&buf[..len])
        .map_err(|_| TransferError::Protocol("reply is not UTF-8".to_string()))?;
    let (replied, info) = wire::parse_reply(reply)?;
    if replied != name {
        return Err(TransferError::Protocol(format!(
            "asked for '{}', got '{}'",
            name, replied
        ))
        .into());
    }
    let descriptor = descriptor
        .ok_or_else(|| TransferError::Protocol("reply carried no descriptor".to_string()))?;

    debug!("transfer client: received '{}' {:?}", name, info);
    Ok(ReceivedBuffer {
        name: replied,
        info,
        descriptor,
    })
}
