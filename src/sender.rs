//! Sender task: streams measurements (and, for downloads, bulk load) to the
//! client under a session-wide write deadline.

use bytes::Bytes;
use chrono::Utc;
use futures::{stream::SplitSink, SinkExt};
use log::{debug, warn};
use rand::Rng;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc::{self, error::TryRecvError},
    time::{timeout_at, Instant},
};
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};

use crate::{
    error::SubtestError,
    metrics::SubtestMetrics,
    model::{ArchivalData, Measurement},
    params, ping,
    subtest::SubtestKind,
};

type Sink<S> = SplitSink<WebSocketStream<S>, Message>;

/// Forward every measurement from `src` to the client, recording each one in
/// `data` and following it with a liveness probe.
///
/// The write deadline is fixed once at `deadline` (subtest start plus the
/// hard maximum runtime); it bounds the whole session, not individual
/// messages. `src` closing is the normal termination path: the connection
/// close handshake is started and `Ok(())` returned. Any write failure is
/// surfaced to the caller.
pub async fn start<S>(
    ws: &mut Sink<S>,
    src: mpsc::Receiver<Measurement>,
    data: &mut ArchivalData,
    started: Instant,
    deadline: Instant,
    kind: SubtestKind,
    metrics: &SubtestMetrics,
) -> Result<(), SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("sender: start");
    data.start_time = Utc::now();
    let result = run(ws, src, data, started, deadline, kind, metrics).await;
    data.end_time = Utc::now();
    debug!("sender: stop");
    result
}

/// Download-direction variant of [`start`]: identical contract, but fills
/// every gap between measurements with bulk binary frames whose size scales
/// with the amount of data already queued.
pub async fn start_download<S>(
    ws: &mut Sink<S>,
    src: mpsc::Receiver<Measurement>,
    data: &mut ArchivalData,
    started: Instant,
    deadline: Instant,
    kind: SubtestKind,
    metrics: &SubtestMetrics,
) -> Result<(), SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("sender: start");
    data.start_time = Utc::now();
    let result = run_download(ws, src, data, started, deadline, kind, metrics).await;
    data.end_time = Utc::now();
    debug!("sender: stop");
    result
}

async fn run<S>(
    ws: &mut Sink<S>,
    mut src: mpsc::Receiver<Measurement>,
    data: &mut ArchivalData,
    started: Instant,
    deadline: Instant,
    kind: SubtestKind,
    metrics: &SubtestMetrics,
) -> Result<(), SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(measurement) = src.recv().await else {
            // The measurer has finished; this is the normal end of the
            // subtest.
            return begin_closing(ws, deadline, kind, metrics).await;
        };
        forward_measurement(ws, measurement, data, started, deadline, kind, metrics).await?;
    }
}

async fn run_download<S>(
    ws: &mut Sink<S>,
    mut src: mpsc::Receiver<Measurement>,
    data: &mut ArchivalData,
    started: Instant,
    deadline: Instant,
    kind: SubtestKind,
    metrics: &SubtestMetrics,
) -> Result<(), SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut size = params::INITIAL_MESSAGE_SIZE;
    let mut payload = bulk_payload(size);
    let mut queued: usize = 0;
    loop {
        match src.try_recv() {
            Ok(measurement) => {
                forward_measurement(ws, measurement, data, started, deadline, kind, metrics)
                    .await?;
            }
            Err(TryRecvError::Disconnected) => {
                return begin_closing(ws, deadline, kind, metrics).await;
            }
            Err(TryRecvError::Empty) => {
                if let Err(err) =
                    send_within(ws, deadline, Message::Binary(payload.clone())).await
                {
                    warn!("sender: bulk write failed: {err}");
                    metrics.record_sender_error(kind, "write-bulk");
                    return Err(err);
                }
                queued += size;
                if size < params::MAX_SCALED_MESSAGE_SIZE
                    && queued > params::SCALING_FRACTION * size
                {
                    size *= 2;
                    payload = bulk_payload(size);
                }
            }
        }
    }
}

async fn forward_measurement<S>(
    ws: &mut Sink<S>,
    measurement: Measurement,
    data: &mut ArchivalData,
    started: Instant,
    deadline: Instant,
    kind: SubtestKind,
    metrics: &SubtestMetrics,
) -> Result<(), SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = match serde_json::to_string(&measurement) {
        Ok(text) => text,
        Err(err) => {
            warn!("sender: measurement serialization failed: {err}");
            metrics.record_sender_error(kind, "serialize-measurement");
            return Err(err.into());
        }
    };
    if let Err(err) = send_within(ws, deadline, Message::text(text)).await {
        warn!("sender: measurement write failed: {err}");
        metrics.record_sender_error(kind, "write-measurement");
        return Err(err);
    }
    // Only measurements actually sent to the client are archived.
    data.server_measurements.push(measurement);
    if let Err(err) = send_within(ws, deadline, Message::Ping(ping::ticks(started))).await {
        warn!("sender: probe write failed: {err}");
        metrics.record_sender_error(kind, "write-probe");
        return Err(err);
    }
    Ok(())
}

async fn begin_closing<S>(
    ws: &mut Sink<S>,
    deadline: Instant,
    kind: SubtestKind,
    metrics: &SubtestMetrics,
) -> Result<(), SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "measurement session complete".into(),
    };
    if let Err(err) = send_within(ws, deadline, Message::Close(Some(frame))).await {
        warn!("sender: close handshake failed: {err}");
        metrics.record_sender_error(kind, "write-close");
        return Err(err);
    }
    Ok(())
}

async fn send_within<S>(
    ws: &mut Sink<S>,
    deadline: Instant,
    message: Message,
) -> Result<(), SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout_at(deadline, ws.send(message)).await??;
    Ok(())
}

fn bulk_payload(size: usize) -> Bytes {
    let mut buf = vec![0u8; size];
    rand::rng().fill(&mut buf[..]);
    Bytes::from(buf)
}
