//! UNIX domain socket helpers, grounded on `original_source/common/sock.h`.
//! INET helpers are intentionally not ported: the control-plane protocol
//! that would use them is out of scope (see SPEC_FULL.md §4.6).

use std::os::unix::io::RawFd;
use std::path::Path;

use nix::sys::socket::{
    accept, bind, connect, getsockopt, listen, socket, sockopt::PeerCredentials, AddressFamily,
    SockFlag, SockProtocol, SockType, UnixAddr,
};
use nix::unistd::close;

use crate::error::HotplugResult;

pub const CMLD_SOCKET_DIR: &str = "/run/socket";

/// `SOCK_PATH(name)` — `/run/socket/cml-<name>`.
pub fn sock_path(name: &str) -> String {
    format!("{}/cml-{}", CMLD_SOCKET_DIR, name)
}

pub fn unix_create(ty: SockType, flags: SockFlag) -> HotplugResult<RawFd> {
    Ok(socket(AddressFamily::Unix, ty, flags, None::<SockProtocol>)?)
}

pub fn unix_bind(fd: RawFd, path: &Path) -> HotplugResult<()> {
    let addr = UnixAddr::new(path)?;
    bind(fd, &addr)?;
    Ok(())
}

pub fn unix_connect(fd: RawFd, path: &Path) -> HotplugResult<()> {
    let addr = UnixAddr::new(path)?;
    connect(fd, &addr)?;
    Ok(())
}

pub fn unix_create_and_bind(ty: SockType, flags: SockFlag, path: &Path) -> HotplugResult<RawFd> {
    let fd = unix_create(ty, flags)?;
    if let Err(e) = unix_bind(fd, path) {
        let _ = close(fd);
        return Err(e);
    }
    Ok(fd)
}

pub fn unix_create_and_connect(ty: SockType, flags: SockFlag, path: &Path) -> HotplugResult<RawFd> {
    let fd = unix_create(ty, flags)?;
    if let Err(e) = unix_connect(fd, path) {
        let _ = close(fd);
        return Err(e);
    }
    Ok(fd)
}

/// Marks the socket passive with a pending-connection queue of 128.
pub fn unix_listen(fd: RawFd) -> HotplugResult<()> {
    listen(fd, 128)?;
    Ok(())
}

pub fn unix_accept(fd: RawFd) -> HotplugResult<RawFd> {
    Ok(accept(fd)?)
}

pub fn unix_close(fd: RawFd) -> HotplugResult<()> {
    close(fd)?;
    Ok(())
}

pub fn unix_close_and_unlink(fd: RawFd, path: &Path) -> HotplugResult<()> {
    close(fd)?;
    let _ = std::fs::remove_file(path);
    Ok(())
}

/// `peer_uid`/`peer_pid` via `SO_PEERCRED`.
pub fn peer_uid(fd: RawFd) -> HotplugResult<u32> {
    Ok(getsockopt(fd, PeerCredentials)?.uid())
}

pub fn peer_pid(fd: RawFd) -> HotplugResult<u32> {
    Ok(getsockopt(fd, PeerCredentials)?.pid() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bind_listen_connect_accept_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");

        let server = unix_create_and_bind(SockType::Stream, SockFlag::empty(), &path).unwrap();
        unix_listen(server).unwrap();

        let client = unix_create_and_connect(SockType::Stream, SockFlag::empty(), &path).unwrap();
        let accepted = unix_accept(server).unwrap();

        assert!(peer_pid(accepted).is_ok());

        unix_close(client).unwrap();
        unix_close(accepted).unwrap();
        unix_close_and_unlink(server, &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn sock_path_matches_cml_convention() {
        assert_eq!(sock_path("container"), "/run/socket/cml-container");
    }
}
