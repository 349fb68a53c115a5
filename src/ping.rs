//! Liveness probes: Ping frames carrying the subtest's elapsed time.
//!
//! The client's transport echoes the payload back in a Pong; subtracting the
//! echoed elapsed time from the current one gives an application-level RTT.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum TicksError {
    #[error("Probe payload is not UTF-8")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("Probe payload is not a number - {0:?}")]
    Parse(#[from] std::num::ParseIntError),
    #[error("Probe payload is negative")]
    Negative,
}

/// Payload for an outgoing probe: decimal microseconds since `start`.
pub fn ticks(start: Instant) -> Bytes {
    Bytes::from(start.elapsed().as_micros().to_string())
}

/// Decode an echoed probe. Returns the echoed elapsed time in microseconds
/// and the round-trip time measured against `start`.
pub fn parse_ticks(payload: &[u8], start: Instant) -> Result<(i64, Duration), TicksError> {
    let sent: i64 = std::str::from_utf8(payload)?.trim().parse()?;
    if sent < 0 {
        return Err(TicksError::Negative);
    }
    let now = start.elapsed().as_micros() as i64;
    let rtt = Duration::from_micros(now.saturating_sub(sent).max(0) as u64);
    Ok((sent, rtt))
}
