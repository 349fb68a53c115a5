//! Protocol constants shared by every subtest.

use std::time::Duration;

/// URL path that starts a download (server-to-client) subtest.
pub const DOWNLOAD_PATH: &str = "/ndt/v7/download";

/// URL path that starts an upload (client-to-server) subtest.
pub const UPLOAD_PATH: &str = "/ndt/v7/upload";

/// WebSocket subprotocol announced by v7 clients.
pub const SEC_WEBSOCKET_PROTOCOL: &str = "net.measurementlab.ndt.v7";

/// How long the measurer samples kernel telemetry for one subtest.
pub const DEFAULT_RUNTIME: Duration = Duration::from_secs(10);

/// Hard wall-clock bound on a whole subtest. Sender writes and receiver
/// reads are not allowed past this deadline.
pub const MAX_RUNTIME: Duration = Duration::from_secs(15);

/// Lower bound on the memoryless sampling interval.
pub const MIN_POISSON_SAMPLING_INTERVAL: Duration = Duration::from_millis(250);

/// Expected value of the memoryless sampling interval.
pub const AVERAGE_POISSON_SAMPLING_INTERVAL: Duration = Duration::from_millis(400);

/// Upper bound on the memoryless sampling interval.
pub const MAX_POISSON_SAMPLING_INTERVAL: Duration = Duration::from_millis(800);

/// Largest inbound WebSocket message we accept from a client.
pub const MAX_MESSAGE_SIZE: usize = 1 << 24;

/// Initial size of the bulk binary frames sent during a download subtest.
pub const INITIAL_MESSAGE_SIZE: usize = 1 << 13;

/// Cap on the scaled bulk message size.
pub const MAX_SCALED_MESSAGE_SIZE: usize = 1 << 20;

/// The bulk message size doubles once more than `size * SCALING_FRACTION`
/// bytes have been queued to the client.
pub const SCALING_FRACTION: usize = 16;

/// TCP keep-alive idle period applied to accepted connections.
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(180);
