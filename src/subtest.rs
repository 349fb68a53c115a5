//! Per-connection orchestration of one measurement subtest.

use std::{fmt, net::SocketAddr, sync::Arc};

use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::Instant,
};
use tokio_tungstenite::WebSocketStream;

use crate::{
    error::SubtestError,
    measurer::Measurer,
    memoryless,
    metrics::SubtestMetrics,
    model::{ArchivalData, ConnectionInfo},
    params, receiver, sender,
    sock::{ConnInfo, SockInfo},
};

/// Direction of one throughput measurement phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtestKind {
    /// Server-to-client: the server generates the load.
    Download,
    /// Client-to-server: the client floods, the server discards.
    Upload,
}

impl SubtestKind {
    pub fn label(self) -> &'static str {
        match self {
            SubtestKind::Download => "download",
            SubtestKind::Upload => "upload",
        }
    }
}

impl fmt::Display for SubtestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runtime bounds of one subtest. Injectable so tests can run short
/// sessions; production uses the defaults from [`params`].
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// How long the measurer samples telemetry.
    pub default_runtime: std::time::Duration,
    /// Hard wall-clock bound on the whole subtest.
    pub max_runtime: std::time::Duration,
    pub sampling: memoryless::Config,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            default_runtime: params::DEFAULT_RUNTIME,
            max_runtime: params::MAX_RUNTIME,
            sampling: memoryless::Config {
                min: params::MIN_POISSON_SAMPLING_INTERVAL,
                expected: params::AVERAGE_POISSON_SAMPLING_INTERVAL,
                max: params::MAX_POISSON_SAMPLING_INTERVAL,
            },
        }
    }
}

/// What one completed subtest hands back to the caller: the archival record
/// plus the sender task's status. Receiver and measurer failures are
/// absorbed locally (logged and counted), sender failures determine the
/// subtest's reported outcome.
pub struct SubtestOutcome {
    pub data: ArchivalData,
    pub sender: Result<(), SubtestError>,
}

/// Run one subtest over an upgraded connection.
///
/// Starts the measurer, spawns the receiver, drives the sender on the
/// current task, then joins the receiver before assembling the archival
/// record. Both tasks are bounded by `started + timing.max_runtime`.
pub async fn run<S>(
    ws: WebSocketStream<S>,
    info: Arc<SockInfo>,
    client: SocketAddr,
    server: SocketAddr,
    kind: SubtestKind,
    timing: &Timing,
    metrics: Arc<SubtestMetrics>,
) -> Result<SubtestOutcome, SubtestError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let info: Arc<dyn ConnInfo> = info;
    let uuid = info.uuid()?;
    let conn_info = ConnectionInfo {
        client: client.to_string(),
        server: server.to_string(),
        uuid: uuid.clone(),
    };
    let mut data = ArchivalData::new(uuid);

    let started = Instant::now();
    let deadline = started + timing.max_runtime;
    let src = Measurer::new(info, conn_info)
        .with_schedule(timing.sampling)
        .start(timing.default_runtime);

    let (mut tx, rx) = ws.split();
    let receiver = match kind {
        SubtestKind::Download => receiver::start_download(rx, started, deadline, metrics.clone()),
        SubtestKind::Upload => receiver::start_upload(rx, started, deadline, metrics.clone()),
    };
    let sender = match kind {
        SubtestKind::Download => {
            sender::start_download(&mut tx, src, &mut data, started, deadline, kind, &metrics)
                .await
        }
        SubtestKind::Upload => {
            sender::start(&mut tx, src, &mut data, started, deadline, kind, &metrics).await
        }
    };

    // The record is only consistent once both writers have stopped.
    data.client_measurements = receiver.await.unwrap_or_default();
    metrics.record_subtest(kind, sender.is_ok());
    Ok(SubtestOutcome { data, sender })
}
