// src/transfer/mod.rs

//! Transfer Channel.
//!
//! A unix-domain rendezvous socket through which a process that does not own
//! a client's buffer can get a descriptor for it. One connection is served
//! at a time: the peer sends a client name, the channel replies with the
//! name plus buffer metadata and a duplicated descriptor, then waits for the
//! peer to hang up before accepting the next connection. Unknown names get
//! no reply at all.

pub mod client;
pub mod wire;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crate::buffer::BufferInfo;
use crate::error::{lock_or_recover, TransferError};

/// Pending connections the listener queues while one is being served.
const LISTEN_BACKLOG: libc::c_int = 1;

/// Source of the descriptors the channel hands out.
pub trait DescriptorProvider: Send + Sync {
    /// Returns a fresh duplicate of the named client's buffer descriptor and
    /// its metadata, importing the client's image if it has none yet.
    /// `None` if no client has that name.
    fn descriptor_for(&self, name: &str) -> Option<(OwnedFd, BufferInfo)>;
}

struct Shared {
    stopped: AtomicBool,
    /// Serializes one receive/reply exchange against another.
    exchange: Mutex<()>,
    max_message_len: usize,
}

pub struct TransferChannel {
    path: PathBuf,
    listener: Arc<UnixListener>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl TransferChannel {
    /// Binds `path` (replacing any stale socket there) and starts serving on
    /// a dedicated thread.
    pub fn start(
        path: &Path,
        max_message_len: usize,
        provider: Weak<dyn DescriptorProvider>,
    ) -> Result<Self> {
        let listener = Arc::new(bind_listener(path)?);
        let shared = Arc::new(Shared {
            stopped: AtomicBool::new(false),
            exchange: Mutex::new(()),
            max_message_len: max_message_len.max(1),
        });

        let worker = {
            let listener = Arc::clone(&listener);
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("transfer-channel".to_string())
                .spawn(move || serve(&listener, &shared, &provider))
                .context("Failed to spawn transfer channel thread")?
        };

        info!("TransferChannel: listening on {}", path.display());
        Ok(TransferChannel {
            path: path.to_path_buf(),
            listener,
            shared,
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Stops accepting, waits for an in-flight connection to finish and
    /// removes the socket path. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblocks accept(); an exchange in progress runs to completion.
        // SAFETY: the listener fd stays open until the last Arc drops.
        if unsafe { libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR) } != 0 {
            debug!(
                "TransferChannel: shutdown of listener failed: {}",
                io::Error::last_os_error()
            );
        }
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                // Dropped from inside an exchange; the loop exits on its own.
                debug!("TransferChannel: stopped from the serve thread");
            } else if worker.join().is_err() {
                error!("TransferChannel: serve thread panicked");
            }
        }
        remove_socket(&self.path);
        info!("TransferChannel: stopped ({})", self.path.display());
    }
}

impl Drop for TransferChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn remove_socket(path: &Path) {
    match nix::unistd::unlink(path) {
        Ok(()) => debug!("TransferChannel: removed {}", path.display()),
        Err(nix::errno::Errno::ENOENT) => {}
        Err(e) => warn!("TransferChannel: failed to remove {}: {}", path.display(), e),
    }
}

/// socket/bind/listen with a backlog of one.
fn bind_listener(path: &Path) -> Result<UnixListener> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    remove_socket(path);

    // SAFETY: sockaddr_un is plain data.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= addr.sun_path.len() {
        anyhow::bail!("Socket path {} is too long", path.display());
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    // SAFETY: plain socket creation; the fd is owned immediately.
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error()).context("Failed to create transfer socket");
    }
    // SAFETY: `fd` was just returned by socket() and is not owned elsewhere.
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    // SAFETY: addr is a fully initialized sockaddr_un.
    let bound = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if bound != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("Failed to bind {}", path.display()));
    }
    // SAFETY: listening on a bound socket we own.
    if unsafe { libc::listen(socket.as_raw_fd(), LISTEN_BACKLOG) } != 0 {
        let err = io::Error::last_os_error();
        remove_socket(path);
        return Err(err).with_context(|| format!("Failed to listen on {}", path.display()));
    }
    Ok(UnixListener::from(socket))
}

fn serve(listener: &UnixListener, shared: &Shared, provider: &Weak<dyn DescriptorProvider>) {
    debug!("TransferChannel: serve thread started");
    loop {
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(_) if shared.stopped.load(Ordering::SeqCst) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("TransferChannel: accept failed, giving up: {}", e);
                shared.stopped.store(true, Ordering::SeqCst);
                break;
            }
        };
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = handle_connection(stream, shared, provider) {
            error!("TransferChannel: {:#}", e);
        }
    }
    debug!("TransferChannel: serve thread exiting");
}

fn handle_connection(
    mut stream: UnixStream,
    shared: &Shared,
    provider: &Weak<dyn DescriptorProvider>,
) -> Result<()> {
    let replied = {
        let _exchange = lock_or_recover(&shared.exchange, "TransferChannel exchange");

        let mut buf = vec![0u8; shared.max_message_len];
        // A descriptor sent with the request carries no payload here; it is
        // closed as soon as `_ignored` drops.
        let (len, _ignored) =
            wire::recv_with_fd(stream.as_fd(), &mut buf).context("Failed to receive request")?;
        if len == 0 {
            info!("TransferChannel: peer closed before sending a request");
            return Ok(());
        }
        let name = wire::parse_request(&buf[..len])?;

        let provider = provider.upgrade().ok_or(TransferError::Disabled)?;
        let Some((descriptor, info)) = provider.descriptor_for(&name) else {
            info!("TransferChannel: no client named '{}', not replying", name);
            return Ok(());
        };

        let reply = wire::format_reply(&name, &info);
        let sent = wire::send_with_fd(stream.as_fd(), reply.as_bytes(), Some(descriptor.as_fd()))
            .with_context(|| format!("Failed to send reply for '{}'", name))?;
        if sent != reply.len() {
            anyhow::bail!(
                "Short reply for '{}': {} of {} bytes",
                name,
                sent,
                reply.len()
            );
        }
        debug!("TransferChannel: sent '{}'", reply);
        name
    };

    drain_until_eof(&mut stream, &replied);
    Ok(())
}

fn drain_until_eof(stream: &mut UnixStream, name: &str) {
    let mut scratch = [0u8; 64];
    loop {
        match stream.read(&mut scratch) {
            Ok(0) => {
                info!("TransferChannel: peer for '{}' closed the connection", name);
                return;
            }
            Ok(n) => error!(
                "TransferChannel: {} unexpected bytes from peer for '{}'",
                n, name
            ),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("TransferChannel: read from peer for '{}' failed: {}", name, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests;
