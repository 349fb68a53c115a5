use std::{net::SocketAddr, sync::Arc};

use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, Semaphore},
};
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{HeaderValue, StatusCode},
        protocol::WebSocketConfig,
    },
};

use crate::{
    config::FathomConfig,
    metrics::SubtestMetrics,
    params,
    sock::{self, MeteredConn},
    subtest::{self, SubtestKind, Timing},
    telemetry::get_meter,
};

pub struct Fathom {
    config: FathomConfig,
    timing: Timing,
    metrics: Arc<SubtestMetrics>,
    stop: &'static broadcast::Sender<()>,
}

impl Fathom {
    pub fn new(config: FathomConfig, stop: &'static broadcast::Sender<()>) -> Fathom {
        Fathom {
            config,
            timing: Timing::default(),
            metrics: Arc::new(SubtestMetrics::new(&get_meter())),
            stop,
        }
    }

    /// Replace the default session timing. Used by tests to run short
    /// sessions against a real listener.
    pub fn with_timing(mut self, timing: Timing) -> Fathom {
        self.timing = timing;
        self
    }

    pub async fn start(&'static self) -> anyhow::Result<()> {
        let listener_cfg = self.config.bind.to_owned();
        info!("Preparing socket {}", listener_cfg);
        let address: SocketAddr = listener_cfg.parse()?;
        let listener = TcpListener::bind(address).await?;
        self.serve(listener).await
    }

    pub async fn serve(&'static self, listener: TcpListener) -> anyhow::Result<()> {
        let max_connections = self.config.max_conn as usize;
        let semaphore = Arc::new(Semaphore::new(max_connections));
        let mut stop = self.stop.subscribe();

        loop {
            let conn = tokio::select! {
                accepted = sock::accept(&listener) => accepted,
                _ = stop.recv() => {
                    info!("Stopping listener");
                    return Ok(());
                }
            };
            let conn = match conn {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            };

            match semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    let fathom = self;
                    tokio::spawn(async move {
                        if let Err(e) = fathom.handle_connection(conn).await {
                            debug!("connection closed: {e}")
                        }
                        drop(permit);
                    });
                }
                Err(_) => {
                    // Too many connections, reject immediately
                    drop(conn);
                }
            }
        }
    }

    pub async fn handle_connection(&self, conn: MeteredConn) -> anyhow::Result<()> {
        let client = conn.peer_addr();
        let server = conn.local_addr()?;
        info!("New connection {}", client);

        let (stream, info) = conn.into_parts();
        let (ws, kind) = upgrade(stream).await?;

        let outcome = subtest::run(
            ws,
            info,
            client,
            server,
            kind,
            &self.timing,
            self.metrics.clone(),
        )
        .await?;
        if let Err(e) = &outcome.sender {
            warn!("{kind} subtest for {client} ended early: {e}");
        }
        // One archival record per subtest, as a single JSON line.
        info!("{}", serde_json::to_string(&outcome.data)?);
        Ok(())
    }
}

/// Upgrade an accepted socket to a WebSocket, resolving the subtest kind
/// from the request path. Unknown paths get a 404 instead of an upgrade;
/// the ndt7 subprotocol is echoed back when the client offers it.
async fn upgrade(
    stream: TcpStream,
) -> anyhow::Result<(
    tokio_tungstenite::WebSocketStream<TcpStream>,
    SubtestKind,
)> {
    let mut kind = None;
    let callback = |request: &Request, mut response: Response| {
        kind = match request.uri().path() {
            params::DOWNLOAD_PATH => Some(SubtestKind::Download),
            params::UPLOAD_PATH => Some(SubtestKind::Upload),
            other => {
                debug!("rejecting unknown path {other}");
                let mut reject = ErrorResponse::new(None);
                *reject.status_mut() = StatusCode::NOT_FOUND;
                return Err(reject);
            }
        };
        if let Some(protocols) = request.headers().get("Sec-WebSocket-Protocol") {
            if protocols
                .to_str()
                .is_ok_and(|p| p.split(',').any(|p| p.trim() == params::SEC_WEBSOCKET_PROTOCOL))
            {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static(params::SEC_WEBSOCKET_PROTOCOL),
                );
            }
        }
        Ok(response)
    };
    let config = WebSocketConfig::default().max_message_size(Some(params::MAX_MESSAGE_SIZE));
    let ws = accept_hdr_async_with_config(stream, callback, Some(config)).await?;
    match kind {
        Some(kind) => Ok((ws, kind)),
        None => anyhow::bail!("upgrade finished without a resolved path"),
    }
}
