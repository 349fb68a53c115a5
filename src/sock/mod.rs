//! Accepted-connection wrapper with kernel-level introspection.
//!
//! Every accepted TCP connection gets its file descriptor duplicated; the
//! duplicate is owned by a [`SockInfo`] handle that can read congestion
//! control and `TCP_INFO` statistics without touching the stream itself. The
//! handle travels alongside the stream through the WebSocket upgrade, so the
//! capability stays reachable after the transport has been layered.

pub mod bbr;
pub mod cookie;
pub mod tcpinfo;

use std::{
    io,
    net::SocketAddr,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    sync::{Arc, OnceLock},
};

use libc::{c_int, c_void, socklen_t};
use log::{debug, error};
use tokio::net::{TcpListener, TcpStream};

use crate::params;
use bbr::BbrSample;
use tcpinfo::LinuxTcpInfo;

/// Capability interface over a wrapped connection. The measurer only ever
/// sees this, never the stream.
pub trait ConnInfo: Send + Sync {
    /// A stable per-connection identifier.
    fn uuid(&self) -> io::Result<String>;
    /// Switch the socket to the BBR congestion-control algorithm. Callers
    /// treat failure as non-fatal; the OS default stays in place.
    fn enable_bbr(&self) -> io::Result<()>;
    /// Read congestion-control counters and the `TCP_INFO` snapshot.
    ///
    /// BBR counters are read first so a `TCP_INFO` failure still tells us
    /// the connection has gone away; reading in the opposite order can miss
    /// that. A BBR failure alone degrades to a zero value.
    fn read_info(&self) -> io::Result<(BbrSample, LinuxTcpInfo)>;
}

/// Owns the duplicated descriptor of one accepted connection.
pub struct SockInfo {
    fd: OwnedFd,
    peer: SocketAddr,
    id: OnceLock<String>,
}

impl SockInfo {
    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl ConnInfo for SockInfo {
    fn uuid(&self) -> io::Result<String> {
        if let Some(id) = self.id.get() {
            return Ok(id.clone());
        }
        let id = match cookie::socket_cookie(self.raw()) {
            Ok(cookie) => format!("{cookie:016x}"),
            Err(err) => {
                // SO_COOKIE is not available on older kernels.
                debug!("sock: no socket cookie for {}: {err}", self.peer);
                cookie::fallback_id()?
            }
        };
        Ok(self.id.get_or_init(|| id).clone())
    }

    fn enable_bbr(&self) -> io::Result<()> {
        bbr::enable(self.raw())
    }

    fn read_info(&self) -> io::Result<(BbrSample, LinuxTcpInfo)> {
        let sample = bbr::read_sample(self.raw()).unwrap_or_default();
        let info = tcpinfo::read(self.raw())?;
        Ok((sample, info))
    }
}

/// An accepted TCP connection paired with its introspection handle.
pub struct MeteredConn {
    stream: TcpStream,
    info: Arc<SockInfo>,
}

impl MeteredConn {
    pub fn info(&self) -> Arc<SockInfo> {
        self.info.clone()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.info.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Splits the wrapper: the stream goes to the upgrade layer, the handle
    /// stays with the orchestrator. Both sides of the connection close when
    /// their owner drops them, independently of each other and exactly once.
    pub fn into_parts(self) -> (TcpStream, Arc<SockInfo>) {
        (self.stream, self.info)
    }
}

/// Accept one connection, enable keep-alive and duplicate its descriptor.
/// If duplication fails the raw connection is dropped and the accept fails.
pub async fn accept(listener: &TcpListener) -> io::Result<MeteredConn> {
    let (stream, peer) = listener.accept().await?;
    wrap(stream, peer)
}

/// Wrap an already-accepted stream. Split out of [`accept`] so the subtest
/// tests can drive it directly.
pub fn wrap(stream: TcpStream, peer: SocketAddr) -> io::Result<MeteredConn> {
    let raw = stream.as_raw_fd();
    if let Err(err) = set_keep_alive(raw, params::KEEP_ALIVE_PERIOD.as_secs() as c_int) {
        // Keep-alive is best effort, the subtest deadlines bound liveness.
        debug!("sock: keep-alive setup failed for {peer}: {err}");
    }
    let fd = match dup_fd(raw) {
        Ok(fd) => fd,
        Err(err) => {
            error!("sock: could not duplicate descriptor for connection from {peer}");
            drop(stream);
            return Err(err);
        }
    };
    Ok(MeteredConn {
        stream,
        info: Arc::new(SockInfo {
            fd,
            peer,
            id: OnceLock::new(),
        }),
    })
}

fn dup_fd(fd: RawFd) -> io::Result<OwnedFd> {
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

fn set_keep_alive(fd: RawFd, idle_secs: c_int) -> io::Result<()> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
    setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, idle_secs)
}

fn setsockopt_int(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const c_int as *const c_void,
            std::mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// getsockopt into a zeroed `T`, returning the value and the length the
/// kernel actually filled in. Older kernels return a shorter struct; the
/// untouched tail stays zero.
pub(crate) fn getsockopt_struct<T: Copy>(
    fd: RawFd,
    level: c_int,
    name: c_int,
) -> io::Result<(T, socklen_t)> {
    let mut value = std::mem::MaybeUninit::<T>::zeroed();
    let mut len = std::mem::size_of::<T>() as socklen_t;
    let rc = unsafe {
        libc::getsockopt(fd, level, name, value.as_mut_ptr() as *mut c_void, &mut len)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((unsafe { value.assume_init() }, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (MeteredConn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, client) = tokio::join!(accept(&listener), TcpStream::connect(addr));
        (accepted.unwrap(), client.unwrap())
    }

    #[tokio::test]
    async fn accept_duplicates_descriptor_and_reads_tcp_info() {
        let (conn, _client) = connected_pair().await;
        let info = conn.info();
        let (_bbr, tcp) = info.read_info().unwrap();
        // Freshly connected loopback socket is established.
        assert_eq!(tcp.tcpi_state, 1);
    }

    #[tokio::test]
    async fn uuid_is_stable_across_calls() {
        let (conn, _client) = connected_pair().await;
        let info = conn.info();
        let first = info.uuid().unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, info.uuid().unwrap());
    }

    #[tokio::test]
    async fn distinct_connections_get_distinct_uuids() {
        let (a, _ca) = connected_pair().await;
        let (b, _cb) = connected_pair().await;
        assert_ne!(a.info().uuid().unwrap(), b.info().uuid().unwrap());
    }

    #[tokio::test]
    async fn enable_bbr_does_not_break_read_info() {
        let (conn, _client) = connected_pair().await;
        let info = conn.info();
        // BBR may or may not be available on the test kernel.
        let _ = info.enable_bbr();
        let (_bbr, tcp) = info.read_info().unwrap();
        assert_eq!(tcp.tcpi_state, 1);
    }

    #[tokio::test]
    async fn failed_descriptor_duplication_closes_the_connection() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, client) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (stream, peer) = accepted.unwrap();
        let mut client = client.unwrap();

        // Pin the descriptor table: with only fd 0 allowed, F_DUPFD_CLOEXEC
        // has to fail with EMFILE. wrap() is synchronous, so nothing else
        // needs a descriptor while the limit is lowered.
        let mut saved = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        assert_eq!(
            unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut saved) },
            0
        );
        let lowered = libc::rlimit {
            rlim_cur: 1,
            rlim_max: saved.rlim_max,
        };
        assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lowered) }, 0);
        let wrapped = wrap(stream, peer);
        assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &saved) }, 0);

        assert!(wrapped.is_err());
        // The raw connection went down with the failed wrapper.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn capability_outlives_the_stream() {
        let (conn, _client) = connected_pair().await;
        let (stream, info) = conn.into_parts();
        drop(stream);
        // The duplicated descriptor still references the socket.
        assert!(!info.uuid().unwrap().is_empty());
    }
}
