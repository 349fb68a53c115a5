//! Per-socket identifiers: kernel SO_COOKIE with a random fallback.

use std::{io, os::fd::RawFd};

// SO_COOKIE from asm-generic/socket.h; not exported by the libc crate.
const SO_COOKIE: libc::c_int = 57;

/// The kernel's unique 64-bit cookie for this socket.
pub fn socket_cookie(fd: RawFd) -> io::Result<u64> {
    let (cookie, len) = super::getsockopt_struct::<u64>(fd, libc::SOL_SOCKET, SO_COOKIE)?;
    if (len as usize) < std::mem::size_of::<u64>() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "short SO_COOKIE from kernel",
        ));
    }
    Ok(cookie)
}

/// Random identifier used when the kernel cannot provide a cookie. Fails
/// only if the generator yields an empty value, which is unrecoverable.
pub fn fallback_id() -> io::Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    if id.is_empty() {
        return Err(io::Error::other("unable to fall back to uuid: empty value"));
    }
    Ok(id)
}
