//! Periodic kernel-telemetry sampling for one subtest.

use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};

use crate::{
    memoryless::{Config, Ticker},
    model::{BbrInfo, ConnectionInfo, Measurement, TcpInfoRecord},
    params,
    sock::ConnInfo,
};

/// Samples BBR and `TCP_INFO` statistics from a wrapped connection at
/// memoryless intervals and emits them on a channel.
pub struct Measurer {
    info: Arc<dyn ConnInfo>,
    conn_info: ConnectionInfo,
    schedule: Config,
}

impl Measurer {
    pub fn new(info: Arc<dyn ConnInfo>, conn_info: ConnectionInfo) -> Self {
        Self {
            info,
            conn_info,
            schedule: Config {
                min: params::MIN_POISSON_SAMPLING_INTERVAL,
                expected: params::AVERAGE_POISSON_SAMPLING_INTERVAL,
                max: params::MAX_POISSON_SAMPLING_INTERVAL,
            },
        }
    }

    pub fn with_schedule(mut self, schedule: Config) -> Self {
        self.schedule = schedule;
        self
    }

    /// Runs the sampling loop in a background task for at most `runtime`.
    ///
    /// The returned channel closing is the only termination signal: it
    /// closes once the runtime deadline has passed, provided the consumer
    /// keeps reading. The channel holds a single in-flight sample, so a
    /// stalled consumer throttles the sampling loop rather than growing a
    /// queue.
    pub fn start(self, runtime: Duration) -> mpsc::Receiver<Measurement> {
        let (dst, src) = mpsc::channel(1);
        tokio::spawn(self.run(dst, runtime));
        src
    }

    async fn run(self, dst: mpsc::Sender<Measurement>, runtime: Duration) {
        debug!("measurer: start");
        let ticker = match Ticker::new(self.schedule) {
            Ok(ticker) => ticker,
            Err(err) => {
                warn!("measurer: {err}");
                return;
            }
        };
        if let Err(err) = self.info.enable_bbr() {
            warn!("measurer: cannot enable BBR: {err}");
        }
        let start = Instant::now();
        let deadline = start + runtime;
        loop {
            let next = Instant::now() + ticker.next_interval();
            if next >= deadline {
                break;
            }
            sleep_until(next).await;
            let measurement = self.sample(start.elapsed());
            if dst.send(measurement).await.is_err() {
                // Consumer is gone; nothing left to sample for.
                break;
            }
        }
        debug!("measurer: stop");
    }

    fn sample(&self, elapsed: Duration) -> Measurement {
        let elapsed_time = elapsed.as_micros() as i64;
        let mut measurement = Measurement {
            elapsed_time,
            connection_info: Some(self.conn_info.clone()),
            ..Default::default()
        };
        match self.info.read_info() {
            Ok((bbr, tcp)) => {
                measurement.bbr_info = Some(BbrInfo::from_sample(&bbr, elapsed_time));
                measurement.tcp_info = Some(TcpInfoRecord::from_snapshot(&tcp, elapsed_time));
            }
            Err(err) => {
                // Dropped sample; the socket may be on its way out but the
                // schedule keeps running until the deadline.
                debug!("measurer: read_info failed: {err}");
            }
        }
        measurement
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::sock::{bbr::BbrSample, tcpinfo::LinuxTcpInfo};

    struct FakeConn {
        fail_reads: bool,
    }

    impl ConnInfo for FakeConn {
        fn uuid(&self) -> io::Result<String> {
            Ok("fake".into())
        }

        fn enable_bbr(&self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no bbr"))
        }

        fn read_info(&self) -> io::Result<(BbrSample, LinuxTcpInfo)> {
            if self.fail_reads {
                return Err(io::Error::other("socket gone"));
            }
            let tcp = LinuxTcpInfo {
                tcpi_state: 1,
                tcpi_rtt: 123,
                ..Default::default()
            };
            Ok((BbrSample::default(), tcp))
        }
    }

    fn test_measurer(fail_reads: bool) -> Measurer {
        let conn_info = ConnectionInfo {
            client: "127.0.0.1:1".into(),
            server: "127.0.0.1:2".into(),
            uuid: "fake".into(),
        };
        Measurer::new(Arc::new(FakeConn { fail_reads }), conn_info).with_schedule(Config {
            min: Duration::from_millis(10),
            expected: Duration::from_millis(50),
            max: Duration::from_millis(100),
        })
    }

    async fn drain(mut src: mpsc::Receiver<Measurement>) -> Vec<Measurement> {
        let mut out = Vec::new();
        while let Some(m) = src.recv().await {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn emits_bounded_sample_count_and_closes() {
        let src = test_measurer(false).start(Duration::from_millis(250));
        let samples = drain(src).await;
        // floor(250/100) .. ceil(250/10)
        assert!(
            (2..=25).contains(&samples.len()),
            "got {} samples",
            samples.len()
        );
        for pair in samples.windows(2) {
            assert!(pair[1].elapsed_time >= pair[0].elapsed_time);
        }
        for m in &samples {
            assert!(m.tcp_info.is_some());
            assert!(m.bbr_info.is_some());
            assert_eq!(m.connection_info.as_ref().unwrap().uuid, "fake");
        }
    }

    #[tokio::test]
    async fn telemetry_read_failure_drops_fields_not_samples() {
        let src = test_measurer(true).start(Duration::from_millis(250));
        let samples = drain(src).await;
        assert!(!samples.is_empty());
        for m in &samples {
            assert!(m.bbr_info.is_none());
            assert!(m.tcp_info.is_none());
            assert!(m.connection_info.is_some());
        }
    }

    #[tokio::test]
    async fn invalid_schedule_aborts_without_output() {
        let measurer = test_measurer(false).with_schedule(Config {
            min: Duration::ZERO,
            expected: Duration::from_millis(50),
            max: Duration::from_millis(100),
        });
        let src = measurer.start(Duration::from_millis(100));
        assert!(drain(src).await.is_empty());
    }

    #[tokio::test]
    async fn slow_consumer_throttles_sampling() {
        let mut src = test_measurer(false).start(Duration::from_millis(200));
        // Stall before reading anything; the loop blocks on the handoff.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut count = 0;
        while src.recv().await.is_some() {
            count += 1;
        }
        // One in-flight sample plus at most one more tick after the
        // deadline-bounded loop resumes.
        assert!(count <= 3, "got {count} samples");
    }
}
