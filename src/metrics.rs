use opentelemetry::{
    metrics::{Counter, Meter},
    KeyValue,
};

use crate::subtest::SubtestKind;

/// Counters for subtest outcomes and per-task failure reasons, labelled by
/// subtest direction.
pub struct SubtestMetrics {
    subtests: Counter<u64>,
    sender_errors: Counter<u64>,
    receiver_errors: Counter<u64>,
}

impl SubtestMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            subtests: meter.u64_counter("fathom_subtests_total").build(),
            sender_errors: meter.u64_counter("fathom_sender_errors_total").build(),
            receiver_errors: meter.u64_counter("fathom_receiver_errors_total").build(),
        }
    }

    pub fn record_subtest(&self, kind: SubtestKind, ok: bool) {
        self.subtests.add(
            1,
            &[
                KeyValue::new("direction", kind.label()),
                KeyValue::new("result", if ok { "ok" } else { "error" }),
            ],
        );
    }

    pub fn record_sender_error(&self, kind: SubtestKind, reason: &'static str) {
        self.sender_errors.add(
            1,
            &[
                KeyValue::new("direction", kind.label()),
                KeyValue::new("reason", reason),
            ],
        );
    }

    pub fn record_receiver_error(&self, kind: SubtestKind, reason: &'static str) {
        self.receiver_errors.add(
            1,
            &[
                KeyValue::new("direction", kind.label()),
                KeyValue::new("reason", reason),
            ],
        );
    }
}
