//! BBR congestion-control access via the duplicated descriptor.

use std::{io, os::fd::RawFd};

use libc::c_void;

use super::getsockopt_struct;

// TCP_CC_INFO from linux/tcp.h; not exported by the libc crate.
const TCP_CC_INFO: libc::c_int = 26;

const BBR: &[u8] = b"bbr";

/// Raw counters from `struct tcp_bbr_info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BbrSample {
    /// Estimated maximum bandwidth, kernel units (bits per second).
    pub max_bandwidth: u64,
    /// Minimum observed round-trip time in microseconds.
    pub min_rtt: u32,
    pub pacing_gain: u32,
    pub cwnd_gain: u32,
}

// struct tcp_bbr_info, linux/tcp.h
#[repr(C)]
#[derive(Clone, Copy)]
struct TcpBbrInfo {
    bbr_bw_lo: u32,
    bbr_bw_hi: u32,
    bbr_min_rtt: u32,
    bbr_pacing_gain: u32,
    bbr_cwnd_gain: u32,
}

/// Ask the kernel to run BBR on this socket.
pub fn enable(fd: RawFd) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_CONGESTION,
            BBR.as_ptr() as *const c_void,
            BBR.len() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Name of the congestion-control algorithm currently attached to the socket.
pub fn current_algorithm(fd: RawFd) -> io::Result<String> {
    let (buf, len) = getsockopt_struct::<[u8; 16]>(fd, libc::IPPROTO_TCP, libc::TCP_CONGESTION)?;
    let end = buf[..len as usize]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(len as usize);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Read the BBR counters for this socket.
///
/// Fails with `Unsupported` when the socket is not running BBR; the
/// `TCP_CC_INFO` union is only meaningful for the active algorithm.
pub fn read_sample(fd: RawFd) -> io::Result<BbrSample> {
    if current_algorithm(fd)? != "bbr" {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "congestion control is not bbr",
        ));
    }
    let (raw, len) = getsockopt_struct::<TcpBbrInfo>(fd, libc::IPPROTO_TCP, TCP_CC_INFO)?;
    if (len as usize) < std::mem::size_of::<TcpBbrInfo>() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "short tcp_bbr_info from kernel",
        ));
    }
    Ok(BbrSample {
        max_bandwidth: ((raw.bbr_bw_hi as u64) << 32) | raw.bbr_bw_lo as u64,
        min_rtt: raw.bbr_min_rtt,
        pacing_gain: raw.bbr_pacing_gain,
        cwnd_gain: raw.bbr_cwnd_gain,
    })
}
