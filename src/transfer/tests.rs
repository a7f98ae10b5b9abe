// src/transfer/tests.rs

use super::client::request_buffer;
use super::*;
use crate::buffer::BufferHandle;
use crate::platform::headless::MemoryBuffer;
use std::collections::HashMap;
use std::os::fd::BorrowedFd;
use std::sync::atomic::AtomicUsize;
use test_log::test;

/// Serves memfd-backed buffers by name and counts lookups.
struct BufferTable {
    buffers: HashMap<String, BufferHandle>,
    lookups: AtomicUsize,
}

impl BufferTable {
    fn with(names: &[&str]) -> Result<Arc<Self>> {
        let mut buffers = HashMap::new();
        for name in names {
            buffers.insert(
                name.to_string(),
                BufferHandle::new(Box::new(MemoryBuffer::allocate(64, 48)?)),
            );
        }
        Ok(Arc::new(BufferTable {
            buffers,
            lookups: AtomicUsize::new(0),
        }))
    }
}

impl DescriptorProvider for BufferTable {
    fn descriptor_for(&self, name: &str) -> Option<(OwnedFd, BufferInfo)> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let handle = self.buffers.get(name)?;
        let fd = handle.duplicate_descriptor().ok()?;
        Some((fd, handle.info()))
    }
}

fn socket_path(tag: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("compositor-test-{}", std::process::id()))
        .join(format!("{}.sock", tag))
}

fn start(tag: &str, table: &Arc<BufferTable>) -> Result<TransferChannel> {
    let provider: Arc<dyn DescriptorProvider> = table.clone();
    TransferChannel::start(&socket_path(tag), 4096, Arc::downgrade(&provider))
}

fn inode(fd: BorrowedFd<'_>) -> Result<(u64, u64)> {
    // SAFETY: fstat into a zeroed stat buffer.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok((st.st_dev as u64, st.st_ino as u64))
}

#[test]
fn it_should_hand_out_the_named_buffer() -> Result<()> {
    let table = BufferTable::with(&["video", "ui"])?;
    let mut channel = start("hand-out", &table)?;

    let received = request_buffer(channel.path(), "video")?;
    let original = &table.buffers["video"];
    assert_eq!(received.name, "video");
    assert_eq!(received.info, original.info());

    // Same memory object, different descriptor.
    let original_fd = original.descriptor().expect("dma ready");
    assert_eq!(inode(received.descriptor.as_fd())?, inode(original_fd)?);
    assert_ne!(received.descriptor.as_raw_fd(), original_fd.as_raw_fd());

    channel.stop();
    Ok(())
}

#[test]
fn it_should_send_nothing_for_an_unknown_name() -> Result<()> {
    let table = BufferTable::with(&["video"])?;
    let mut channel = start("unknown", &table)?;

    let err = request_buffer(channel.path(), "nobody").unwrap_err();
    assert_eq!(
        err.downcast_ref::<TransferError>(),
        Some(&TransferError::UnknownClient("nobody".to_string()))
    );

    // The channel keeps serving afterwards.
    let received = request_buffer(channel.path(), "video")?;
    assert_eq!(received.info.width, 64);
    assert_eq!(table.lookups.load(Ordering::SeqCst), 2);

    channel.stop();
    Ok(())
}

#[test]
fn it_should_serve_sequential_requests() -> Result<()> {
    let table = BufferTable::with(&["a", "b"])?;
    let mut channel = start("sequential", &table)?;

    for name in ["a", "b", "a"] {
        let received = request_buffer(channel.path(), name)?;
        assert_eq!(received.name, name);
    }
    channel.stop();
    Ok(())
}

#[test]
fn it_should_remove_the_socket_when_stopped() -> Result<()> {
    let table = BufferTable::with(&[])?;
    let mut channel = start("stop", &table)?;
    let path = channel.path().to_path_buf();
    assert!(path.exists());
    assert!(channel.is_running());

    channel.stop();
    assert!(!channel.is_running());
    assert!(!path.exists());
    assert!(request_buffer(&path, "video").is_err());

    // Stopping twice is harmless.
    channel.stop();
    Ok(())
}

#[test]
fn it_should_replace_a_stale_socket_on_restart() -> Result<()> {
    let table = BufferTable::with(&["video"])?;
    let path = socket_path("restart");
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, b"stale")?;

    let mut channel = start("restart", &table)?;
    assert_eq!(request_buffer(&path, "video")?.name, "video");
    channel.stop();

    let mut channel = start("restart", &table)?;
    assert_eq!(request_buffer(&path, "video")?.name, "video");
    channel.stop();
    Ok(())
}

#[test]
fn it_should_not_reply_once_the_provider_is_gone() -> Result<()> {
    let table = BufferTable::with(&["video"])?;
    let provider: Arc<dyn DescriptorProvider> = table;
    let mut channel =
        TransferChannel::start(&socket_path("gone"), 4096, Arc::downgrade(&provider))?;
    drop(provider);

    assert!(request_buffer(channel.path(), "video").is_err());
    channel.stop();
    Ok(())
}
