pub mod config;
pub mod error;
pub mod measurer;
pub mod memoryless;
pub mod metrics;
pub mod model;
pub mod params;
pub mod ping;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod sock;
pub mod subtest;
pub mod telemetry;
pub mod utils;
