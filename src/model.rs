//! Measurement records exchanged with clients and archived per subtest.
//!
//! Field names on the wire are fixed by the v7 protocol, hence the explicit
//! serde renames instead of a rename_all rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sock::{bbr::BbrSample, tcpinfo::LinuxTcpInfo};

/// One sample of kernel telemetry, produced by the measurer and echoed back
/// by clients as a text frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Microseconds since the sampling run started.
    #[serde(rename = "ElapsedTime", default)]
    pub elapsed_time: i64,
    #[serde(rename = "BBRInfo", default, skip_serializing_if = "Option::is_none")]
    pub bbr_info: Option<BbrInfo>,
    #[serde(rename = "TCPInfo", default, skip_serializing_if = "Option::is_none")]
    pub tcp_info: Option<TcpInfoRecord>,
    #[serde(
        rename = "ConnectionInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_info: Option<ConnectionInfo>,
}

/// Congestion-control counters exposed by the BBR module. Zero-valued when
/// the kernel runs a different congestion-control algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BbrInfo {
    #[serde(rename = "MaxBandwidth", default)]
    pub max_bandwidth: i64,
    #[serde(rename = "MinRTT", default)]
    pub min_rtt: i64,
    #[serde(rename = "PacingGain", default)]
    pub pacing_gain: u32,
    #[serde(rename = "CwndGain", default)]
    pub cwnd_gain: u32,
    #[serde(rename = "ElapsedTime", default)]
    pub elapsed_time: i64,
}

impl BbrInfo {
    pub fn from_sample(sample: &BbrSample, elapsed_time: i64) -> Self {
        Self {
            max_bandwidth: sample.max_bandwidth as i64,
            min_rtt: sample.min_rtt as i64,
            pacing_gain: sample.pacing_gain,
            cwnd_gain: sample.cwnd_gain,
            elapsed_time,
        }
    }
}

/// The subset of the kernel `tcp_info` snapshot reported to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpInfoRecord {
    #[serde(rename = "State", default)]
    pub state: u8,
    #[serde(rename = "RTO", default)]
    pub rto: u32,
    #[serde(rename = "RTT", default)]
    pub rtt: u32,
    #[serde(rename = "RTTVar", default)]
    pub rtt_var: u32,
    #[serde(rename = "MinRTT", default)]
    pub min_rtt: u32,
    #[serde(rename = "SndCwnd", default)]
    pub snd_cwnd: u32,
    #[serde(rename = "SndSsthresh", default)]
    pub snd_ssthresh: u32,
    #[serde(rename = "Retransmits", default)]
    pub retransmits: u8,
    #[serde(rename = "Lost", default)]
    pub lost: u32,
    #[serde(rename = "TotalRetrans", default)]
    pub total_retrans: u32,
    #[serde(rename = "BytesAcked", default)]
    pub bytes_acked: u64,
    #[serde(rename = "BytesReceived", default)]
    pub bytes_received: u64,
    #[serde(rename = "BytesSent", default)]
    pub bytes_sent: u64,
    #[serde(rename = "BytesRetrans", default)]
    pub bytes_retrans: u64,
    #[serde(rename = "DeliveryRate", default)]
    pub delivery_rate: u64,
    #[serde(rename = "ElapsedTime", default)]
    pub elapsed_time: i64,
}

impl TcpInfoRecord {
    pub fn from_snapshot(info: &LinuxTcpInfo, elapsed_time: i64) -> Self {
        Self {
            state: info.tcpi_state,
            rto: info.tcpi_rto,
            rtt: info.tcpi_rtt,
            rtt_var: info.tcpi_rttvar,
            min_rtt: info.tcpi_min_rtt,
            snd_cwnd: info.tcpi_snd_cwnd,
            snd_ssthresh: info.tcpi_snd_ssthresh,
            retransmits: info.tcpi_retransmits,
            lost: info.tcpi_lost,
            total_retrans: info.tcpi_total_retrans,
            bytes_acked: info.tcpi_bytes_acked,
            bytes_received: info.tcpi_bytes_received,
            bytes_sent: info.tcpi_bytes_sent,
            bytes_retrans: info.tcpi_bytes_retrans,
            delivery_rate: info.tcpi_delivery_rate,
            elapsed_time,
        }
    }
}

/// Endpoint identity attached to every measurement; constant for the life of
/// one subtest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "Client", default)]
    pub client: String,
    #[serde(rename = "Server", default)]
    pub server: String,
    #[serde(rename = "UUID", default)]
    pub uuid: String,
}

/// Everything recorded about one completed subtest.
///
/// `server_measurements` is appended to only by the sender task and
/// `client_measurements` only by the receiver task; the orchestrator joins
/// both tasks before reading the record as a whole.
#[derive(Debug, Clone, Serialize)]
pub struct ArchivalData {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "StartTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "EndTime")]
    pub end_time: DateTime<Utc>,
    #[serde(rename = "ServerMeasurements")]
    pub server_measurements: Vec<Measurement>,
    #[serde(rename = "ClientMeasurements")]
    pub client_measurements: Vec<Measurement>,
}

impl ArchivalData {
    pub fn new(uuid: String) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            start_time: now,
            end_time: now,
            server_measurements: Vec::new(),
            client_measurements: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurement_wire_names() {
        let m = Measurement {
            elapsed_time: 1000,
            bbr_info: Some(BbrInfo {
                max_bandwidth: 100_000_000,
                min_rtt: 250,
                pacing_gain: 739,
                cwnd_gain: 512,
                elapsed_time: 1000,
            }),
            tcp_info: Some(TcpInfoRecord {
                state: 1,
                rtt: 300,
                elapsed_time: 1000,
                ..Default::default()
            }),
            connection_info: Some(ConnectionInfo {
                client: "10.0.0.2:52114".into(),
                server: "10.0.0.1:443".into(),
                uuid: "a1b2c3".into(),
            }),
        };
        let json = serde_json::to_string(&m).unwrap();
        for name in [
            "ElapsedTime",
            "BBRInfo",
            "TCPInfo",
            "ConnectionInfo",
            "MaxBandwidth",
            "MinRTT",
            "PacingGain",
            "CwndGain",
            "UUID",
        ] {
            assert!(json.contains(name), "missing {name} in {json}");
        }
    }

    #[test]
    fn measurement_roundtrip() {
        let m = Measurement {
            elapsed_time: 42,
            bbr_info: Some(BbrInfo::default()),
            tcp_info: Some(TcpInfoRecord::default()),
            connection_info: Some(ConnectionInfo::default()),
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: Measurement = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn absent_fields_are_omitted_and_tolerated() {
        let m = Measurement {
            elapsed_time: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(!json.contains("BBRInfo"));
        assert!(!json.contains("TCPInfo"));
        assert!(!json.contains("ConnectionInfo"));

        // Clients may send sparse measurements.
        let back: Measurement = serde_json::from_str(r#"{"ElapsedTime":7}"#).unwrap();
        assert_eq!(m, back);
    }
}
