//! `TCP_INFO` snapshots.
//!
//! The kernel's `struct tcp_info` has grown over time; getsockopt copies out
//! only as many bytes as the running kernel knows about and reports the
//! count. The struct is zero-initialized before the call, so fields newer
//! than the kernel read back as zero instead of garbage.

use std::{io, os::fd::RawFd};

/// `struct tcp_info` through kernel 5.5, field order and padding per
/// linux/tcp.h.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinuxTcpInfo {
    pub tcpi_state: u8,
    pub tcpi_ca_state: u8,
    pub tcpi_retransmits: u8,
    pub tcpi_probes: u8,
    pub tcpi_backoff: u8,
    pub tcpi_options: u8,
    /// snd_wscale in the low nibble, rcv_wscale in the high nibble.
    pub tcpi_wscale: u8,
    /// delivery_rate_app_limited and fastopen_client_fail bits.
    pub tcpi_flags: u8,

    pub tcpi_rto: u32,
    pub tcpi_ato: u32,
    pub tcpi_snd_mss: u32,
    pub tcpi_rcv_mss: u32,

    pub tcpi_unacked: u32,
    pub tcpi_sacked: u32,
    pub tcpi_lost: u32,
    pub tcpi_retrans: u32,
    pub tcpi_fackets: u32,

    pub tcpi_last_data_sent: u32,
    pub tcpi_last_ack_sent: u32,
    pub tcpi_last_data_recv: u32,
    pub tcpi_last_ack_recv: u32,

    pub tcpi_pmtu: u32,
    pub tcpi_rcv_ssthresh: u32,
    pub tcpi_rtt: u32,
    pub tcpi_rttvar: u32,
    pub tcpi_snd_ssthresh: u32,
    pub tcpi_snd_cwnd: u32,
    pub tcpi_advmss: u32,
    pub tcpi_reordering: u32,

    pub tcpi_rcv_rtt: u32,
    pub tcpi_rcv_space: u32,

    pub tcpi_total_retrans: u32,

    pub tcpi_pacing_rate: u64,
    pub tcpi_max_pacing_rate: u64,
    pub tcpi_bytes_acked: u64,
    pub tcpi_bytes_received: u64,

    pub tcpi_segs_out: u32,
    pub tcpi_segs_in: u32,

    pub tcpi_notsent_bytes: u32,
    pub tcpi_min_rtt: u32,
    pub tcpi_data_segs_in: u32,
    pub tcpi_data_segs_out: u32,

    pub tcpi_delivery_rate: u64,

    pub tcpi_busy_time: u64,
    pub tcpi_rwnd_limited: u64,
    pub tcpi_sndbuf_limited: u64,

    pub tcpi_delivered: u32,
    pub tcpi_delivered_ce: u32,

    pub tcpi_bytes_sent: u64,
    pub tcpi_bytes_retrans: u64,

    pub tcpi_dsack_dups: u32,
    pub tcpi_reord_seen: u32,

    pub tcpi_rcv_ooopack: u32,
    pub tcpi_snd_wnd: u32,
}

/// Read the socket's `TCP_INFO` snapshot. A failure here usually means the
/// socket is no longer usable, so callers treat it as a hard error.
pub fn read(fd: RawFd) -> io::Result<LinuxTcpInfo> {
    let (info, len) = super::getsockopt_struct::<LinuxTcpInfo>(fd, libc::IPPROTO_TCP, libc::TCP_INFO)?;
    if len == 0 {
        return Err(io::Error::other("empty TCP_INFO from kernel"));
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_kernel_size() {
        // Size of struct tcp_info through the 5.5 fields.
        assert_eq!(std::mem::size_of::<LinuxTcpInfo>(), 232);
    }
}
