// src/transfer/wire.rs

//! Wire format of the transfer channel.
//!
//! A request is the bare client name. A reply is the same name followed by
//! `:width:height:stride:format:modifier` (decimal, leading colon), with the
//! buffer descriptor attached as a single `SCM_RIGHTS` control message.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use crate::buffer::BufferInfo;
use crate::error::TransferError;

/// Number of numeric fields after the name.
const METADATA_FIELDS: usize = 5;

/// Renders `info` as `:width:height:stride:format:modifier`.
pub fn format_metadata(info: &BufferInfo) -> String {
    format!(
        ":{}:{}:{}:{}:{}",
        info.width, info.height, info.stride, info.format, info.modifier
    )
}

/// Builds the full reply line for `name`.
pub fn format_reply(name: &str, info: &BufferInfo) -> String {
    let mut reply = String::with_capacity(name.len() + 48);
    reply.push_str(name);
    reply.push_str(&format_metadata(info));
    reply
}

/// Splits a reply into the client name and its buffer metadata.
///
/// The metadata is taken from the right so a name containing ':' survives.
pub fn parse_reply(reply: &str) -> Result<(String, BufferInfo), TransferError> {
    let mut fields = reply.rsplitn(METADATA_FIELDS + 1, ':');
    let mut numbers = [0u64; METADATA_FIELDS];
    for slot in numbers.iter_mut().rev() {
        let field = fields
            .next()
            .ok_or_else(|| TransferError::Protocol(format!("truncated metadata in '{}'", reply)))?;
        *slot = field
            .parse()
            .map_err(|_| TransferError::Protocol(format!("bad metadata field '{}'", field)))?;
    }
    let name = fields
        .next()
        .ok_or_else(|| TransferError::Protocol(format!("no name in '{}'", reply)))?;

    let narrow = |value: u64, what: &str| {
        u32::try_from(value)
            .map_err(|_| TransferError::Protocol(format!("{} {} out of range", what, value)))
    };
    let info = BufferInfo {
        width: narrow(numbers[0], "width")?,
        height: narrow(numbers[1], "height")?,
        stride: narrow(numbers[2], "stride")?,
        format: narrow(numbers[3], "format")?,
        modifier: numbers[4],
    };
    Ok((name.to_string(), info))
}

/// Decodes a request message into a client name. Trailing NULs are
/// tolerated for peers that send C strings.
pub fn parse_request(bytes: &[u8]) -> Result<String, TransferError> {
    let trimmed = match bytes.iter().rposition(|&b| b != 0) {
        Some(last) => &bytes[..=last],
        None => return Err(TransferError::Protocol("empty request".to_string())),
    };
    let name = std::str::from_utf8(trimmed)
        .map_err(|_| TransferError::Protocol("request is not UTF-8".to_string()))?;
    if name.contains('\0') {
        return Err(TransferError::Protocol("embedded NUL in request".to_string()));
    }
    Ok(name.to_string())
}

/// Sends `bytes` in one message, attaching `fd` when given.
pub fn send_with_fd(socket: BorrowedFd<'_>, bytes: &[u8], fd: Option<BorrowedFd<'_>>) -> io::Result<usize> {
    if bytes.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to send an empty message",
        ));
    }

    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut libc::c_void,
        iov_len: bytes.len(),
    };
    // SAFETY: CMSG_SPACE is a pure size computation.
    let space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut control = vec![0u8; space];

    // SAFETY: msghdr is plain data; zeroed is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(fd) = fd {
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = space as _;
        // SAFETY: the control buffer is CMSG_SPACE(sizeof fd) bytes, so the
        // first header and its payload fit.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            if cmsg.is_null() {
                return Err(io::Error::new(io::ErrorKind::Other, "no room for control message"));
            }
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut RawFd, fd.as_raw_fd());
        }
    }

    // SAFETY: msg points at live buffers for the duration of the call.
    let sent = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// Receives one message into `buf`. Returns the byte count (0 on orderly
/// shutdown) and the first descriptor attached, already owned. Any extra
/// descriptors are closed.
pub fn recv_with_fd(socket: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<(usize, Option<OwnedFd>)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    // Room for a few descriptors, so a peer sending more than one does not
    // leave any of them open in this process.
    // SAFETY: pure size computation.
    let space = unsafe { libc::CMSG_SPACE((4 * mem::size_of::<RawFd>()) as u32) } as usize;
    let mut control = vec![0u8; space];

    // SAFETY: as in send_with_fd.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = space as _;

    // SAFETY: msg points at live buffers for the duration of the call.
    let received = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut owned: Vec<OwnedFd> = Vec::new();
    // SAFETY: walking the control buffer the kernel just filled, bounded by
    // msg_controllen; each SCM_RIGHTS payload is an array of open fds that
    // now belong to this process.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let header = libc::CMSG_LEN(0) as usize;
                let count = ((*cmsg).cmsg_len as usize).saturating_sub(header) / mem::size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                for i in 0..count {
                    let fd = std::ptr::read_unaligned(data.add(i));
                    owned.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "control message truncated",
        ));
    }
    let first = if owned.is_empty() {
        None
    } else {
        Some(owned.swap_remove(0))
    };
    Ok((received as usize, first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_INVALID};
    use std::io::Read;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;
    use test_log::test;

    fn info() -> BufferInfo {
        BufferInfo {
            width: 1280,
            height: 720,
            stride: 5120,
            format: DRM_FORMAT_ARGB8888,
            modifier: DRM_FORMAT_MOD_INVALID,
        }
    }

    #[test]
    fn it_should_format_metadata_with_a_leading_colon() {
        assert_eq!(
            format_reply("video", &info()),
            format!(
                "video:1280:720:5120:{}:{}",
                DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_INVALID
            )
        );
    }

    #[test]
    fn it_should_parse_a_reply_whose_name_contains_colons() -> anyhow::Result<()> {
        let (name, parsed) = parse_reply(&format_reply("ns:video", &info()))?;
        assert_eq!(name, "ns:video");
        assert_eq!(parsed, info());
        Ok(())
    }

    #[test]
    fn it_should_reject_truncated_metadata() {
        assert!(matches!(
            parse_reply("video:1280:720"),
            Err(TransferError::Protocol(_))
        ));
        assert!(matches!(
            parse_reply("video:1280:720:x:1:2"),
            Err(TransferError::Protocol(_))
        ));
    }

    #[test]
    fn it_should_strip_trailing_nuls_from_requests() {
        assert_eq!(parse_request(b"video\0\0"), Ok("video".to_string()));
        assert!(parse_request(b"\0").is_err());
        assert!(parse_request(b"").is_err());
    }

    #[test]
    fn it_should_pass_a_descriptor_across_a_socket_pair() -> anyhow::Result<()> {
        let (left, right) = UnixStream::pair()?;
        let (mut reader, writer) = UnixStream::pair()?;

        send_with_fd(left.as_fd(), b"hello", Some(writer.as_fd()))?;
        let mut buf = [0u8; 16];
        let (n, fd) = recv_with_fd(right.as_fd(), &mut buf)?;
        assert_eq!(&buf[..n], b"hello");

        // The received descriptor is a second handle on `writer`.
        let fd = fd.expect("descriptor attached");
        let dup = UnixStream::from(fd);
        drop(writer);
        std::io::Write::write_all(&mut &dup, b"x")?;
        drop(dup);
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        assert_eq!(out, b"x");
        Ok(())
    }

    #[test]
    fn it_should_receive_without_a_descriptor() -> anyhow::Result<()> {
        let (left, right) = UnixStream::pair()?;
        send_with_fd(left.as_fd(), b"name", None)?;
        let mut buf = [0u8; 16];
        let (n, fd) = recv_with_fd(right.as_fd(), &mut buf)?;
        assert_eq!(n, 4);
        assert!(fd.is_none());
        drop(left);
        assert_eq!(recv_with_fd(right.as_fd(), &mut buf)?.0, 0);
        Ok(())
    }
}
