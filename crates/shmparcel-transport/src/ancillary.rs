//! `SCM_RIGHTS` descriptor passing over Unix domain sockets.

use std::io::{self, IoSlice, IoSliceMut, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

/// Upper bound on descriptors sent or accepted in a single message.
pub const MAX_FDS_PER_MESSAGE: usize = 32;

pub(crate) fn send_with_fds(
    stream: &UnixStream,
    data: &[u8],
    fds: &[BorrowedFd<'_>],
) -> io::Result<usize> {
    if fds.is_empty() {
        return (&*stream).write(data);
    }
    if data.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "descriptors must accompany at least one data byte",
        ));
    }
    if fds.len() > MAX_FDS_PER_MESSAGE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "too many descriptors ({}, max {MAX_FDS_PER_MESSAGE})",
                fds.len()
            ),
        ));
    }

    let raw: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
    let iov = [IoSlice::new(data)];
    let cmsgs = [ControlMessage::ScmRights(&raw)];
    let sent = sendmsg::<()>(
        stream.as_raw_fd(),
        &iov,
        &cmsgs,
        MsgFlags::MSG_NOSIGNAL,
        None,
    )?;
    Ok(sent)
}

pub(crate) fn recv_with_fds(
    stream: &UnixStream,
    buf: &mut [u8],
    fds: &mut Vec<OwnedFd>,
) -> io::Result<usize> {
    let mut control = nix::cmsg_space!([RawFd; MAX_FDS_PER_MESSAGE]);
    let mut iov = [IoSliceMut::new(buf)];

    let msg = recvmsg::<()>(
        stream.as_raw_fd(),
        &mut iov,
        Some(&mut control),
        MsgFlags::MSG_CMSG_CLOEXEC,
    )?;

    for cmsg in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            // SAFETY: every SCM_RIGHTS descriptor is newly installed in this
            // process and owned by nothing else yet.
            fds.extend(
                received
                    .into_iter()
                    .map(|raw| unsafe { OwnedFd::from_raw_fd(raw) }),
            );
        }
    }

    if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "ancillary data truncated",
        ));
    }

    Ok(msg.bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::os::fd::AsFd;

    use super::*;
    use crate::region::{RegionHandle, SharedRegion};

    #[test]
    fn passes_region_handle_across_socketpair() {
        let (sender, receiver) = UnixStream::pair().unwrap();
        let region = SharedRegion::from_bytes("test-pass", b"shared bytes").unwrap();
        let handle = region.duplicate_handle().unwrap();

        let sent = send_with_fds(&sender, b"x", &[handle.as_fd()]).unwrap();
        assert_eq!(sent, 1);
        drop(handle);

        let mut buf = [0u8; 8];
        let mut fds = Vec::new();
        let read = recv_with_fds(&receiver, &mut buf, &mut fds).unwrap();
        assert_eq!(&buf[..read], b"x");
        assert_eq!(fds.len(), 1);

        let received = RegionHandle::from_owned_fd(fds.pop().unwrap(), 12).unwrap();
        assert_eq!(received.id(), region.id());
        let opened = SharedRegion::open(received).unwrap();
        assert_eq!(opened.copy_out().unwrap(), b"shared bytes");
    }

    #[test]
    fn passes_multiple_descriptors_in_order() {
        let (sender, receiver) = UnixStream::pair().unwrap();
        let a = SharedRegion::from_bytes("test-a", b"first").unwrap();
        let b = SharedRegion::from_bytes("test-b", b"second").unwrap();
        let ha = a.duplicate_handle().unwrap();
        let hb = b.duplicate_handle().unwrap();

        send_with_fds(&sender, b"ab", &[ha.as_fd(), hb.as_fd()]).unwrap();

        let mut buf = [0u8; 8];
        let mut fds = Vec::new();
        recv_with_fds(&receiver, &mut buf, &mut fds).unwrap();
        assert_eq!(fds.len(), 2);

        let rb = RegionHandle::from_owned_fd(fds.pop().unwrap(), 6).unwrap();
        let ra = RegionHandle::from_owned_fd(fds.pop().unwrap(), 5).unwrap();
        assert_eq!(ra.id(), a.id());
        assert_eq!(rb.id(), b.id());
    }

    #[test]
    fn plain_data_without_descriptors() {
        let (sender, mut receiver) = UnixStream::pair().unwrap();
        send_with_fds(&sender, b"plain", &[]).unwrap();

        let mut buf = [0u8; 5];
        receiver.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"plain");
    }

    #[test]
    fn descriptors_require_data() {
        let (sender, _receiver) = UnixStream::pair().unwrap();
        let region = SharedRegion::from_bytes("test-nodata", b"z").unwrap();
        let handle = region.duplicate_handle().unwrap();

        let err = send_with_fds(&sender, b"", &[handle.as_fd()]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
