//! Receiver task: reads client frames concurrently with the sender, under
//! the same hard deadline.

use std::sync::Arc;

use futures::{stream::SplitStream, StreamExt};
use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use crate::{metrics::SubtestMetrics, model::Measurement, params, ping, subtest::SubtestKind};

/// Collect client measurement echoes during a download subtest.
///
/// The task runs detached; the returned handle signals completion and yields
/// whatever was collected. Binary frames are a protocol violation in this
/// direction and terminate the loop early.
pub fn start_download<S>(
    src: SplitStream<WebSocketStream<S>>,
    started: Instant,
    deadline: Instant,
    metrics: Arc<SubtestMetrics>,
) -> JoinHandle<Vec<Measurement>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run(src, SubtestKind::Download, started, deadline, metrics))
}

/// Like [`start_download`], but tolerates binary frames: upload clients send
/// them as bulk load and they are discarded without parsing.
pub fn start_upload<S>(
    src: SplitStream<WebSocketStream<S>>,
    started: Instant,
    deadline: Instant,
    metrics: Arc<SubtestMetrics>,
) -> JoinHandle<Vec<Measurement>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run(src, SubtestKind::Upload, started, deadline, metrics))
}

async fn run<S>(
    mut src: SplitStream<WebSocketStream<S>>,
    kind: SubtestKind,
    started: Instant,
    deadline: Instant,
    metrics: Arc<SubtestMetrics>,
) -> Vec<Measurement>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("receiver: start");
    let mut collected = Vec::new();
    loop {
        let message = match timeout_at(deadline, src.next()).await {
            // Deadline reached; not an error, the subtest is simply over.
            Err(_) => {
                metrics.record_receiver_error(kind, "deadline-expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                debug!("receiver: read failed: {err}");
                metrics.record_receiver_error(kind, "read-message");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };
        // Streams upgraded through the server carry a transport-level frame
        // cap that surfaces oversize frames as read errors; this bounds
        // streams built without one.
        if message.len() > params::MAX_MESSAGE_SIZE {
            warn!("receiver: oversized message ({} bytes)", message.len());
            metrics.record_receiver_error(kind, "message-too-large");
            break;
        }
        match message {
            Message::Pong(payload) => match ping::parse_ticks(&payload, started) {
                Ok((_, rtt)) => {
                    debug!("receiver: application-level RTT: {} ms", rtt.as_millis());
                }
                // A client that corrupts the echoed payload is not speaking
                // the protocol; treat it like any other bad frame.
                Err(err) => {
                    warn!("receiver: probe echo unreadable: {err}");
                    metrics.record_receiver_error(kind, "parse-probe-echo");
                    break;
                }
            },
            Message::Binary(_) => match kind {
                SubtestKind::Download => {
                    warn!("receiver: got binary message during download");
                    metrics.record_receiver_error(kind, "wrong-message-type");
                    break;
                }
                // Bulk upload traffic; the payload itself is of no interest.
                SubtestKind::Upload => continue,
            },
            Message::Text(text) => match serde_json::from_str::<Measurement>(text.as_str()) {
                Ok(measurement) => collected.push(measurement),
                Err(err) => {
                    warn!("receiver: client measurement unreadable: {err}");
                    metrics.record_receiver_error(kind, "parse-client-measurement");
                    break;
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the transport layer; raw frames do not
            // surface on a read without frame-by-frame mode.
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }
    debug!("receiver: stop");
    collected
}
