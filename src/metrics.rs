//! Prometheus Metrics for the Chat Relay
//!
//! Counters are registered once at startup and cloned into every
//! connection task; prometheus handles are cheap `Arc` clones.

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

use crate::registry::Delivery;

/// Relay server metrics.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    // Connections
    /// TCP connections accepted.
    pub connections_total: IntCounter,
    /// Sessions currently registered.
    pub sessions_active: IntGauge,
    /// Connections dropped before reaching the active state.
    pub handshake_failures: IntCounter,

    // Inbound frames
    pub frames_received: IntCounter,
    /// Frames dropped because the tag did not match or the envelope was malformed.
    pub integrity_failures: IntCounter,
    /// Frames dropped because base64, UTF-8 or JSON decoding failed.
    pub decode_failures: IntCounter,
    pub unknown_payloads: IntCounter,

    // Outbound
    /// Chat messages fanned out (one per `msg`, regardless of recipients).
    pub messages_relayed: IntCounter,
    /// Envelopes written to clients, including presence updates.
    pub frames_sent: IntCounter,
    /// Envelopes that could not be written to a recipient.
    pub send_failures: IntCounter,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("static metric definition")
}

impl RelayMetrics {
    /// Creates a new metrics instance with all counters registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = counter(
            "relay_connections_total",
            "Total TCP connections accepted",
        );
        let sessions_active = IntGauge::with_opts(Opts::new(
            "relay_sessions_active",
            "Sessions currently joined",
        ))
        .expect("static metric definition");
        let handshake_failures = counter(
            "relay_handshake_failures_total",
            "Connections closed during the handshake",
        );
        let frames_received = counter(
            "relay_frames_received_total",
            "Envelopes received from active sessions",
        );
        let integrity_failures = counter(
            "relay_integrity_failures_total",
            "Envelopes dropped for a malformed frame or tag mismatch",
        );
        let decode_failures = counter(
            "relay_decode_failures_total",
            "Envelopes dropped because decryption or parsing failed",
        );
        let unknown_payloads = counter(
            "relay_unknown_payloads_total",
            "Payloads with an unrecognized type",
        );
        let messages_relayed = counter(
            "relay_messages_relayed_total",
            "Chat messages fanned out to other sessions",
        );
        let frames_sent = counter(
            "relay_frames_sent_total",
            "Envelopes written to clients",
        );
        let send_failures = counter(
            "relay_send_failures_total",
            "Envelopes that failed to reach a recipient",
        );

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(connections_total.clone()),
            Box::new(sessions_active.clone()),
            Box::new(handshake_failures.clone()),
            Box::new(frames_received.clone()),
            Box::new(integrity_failures.clone()),
            Box::new(decode_failures.clone()),
            Box::new(unknown_payloads.clone()),
            Box::new(messages_relayed.clone()),
            Box::new(frames_sent.clone()),
            Box::new(send_failures.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        RelayMetrics {
            registry: Arc::new(registry),
            connections_total,
            sessions_active,
            handshake_failures,
            frames_received,
            integrity_failures,
            decode_failures,
            unknown_payloads,
            messages_relayed,
            frames_sent,
            send_failures,
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Records the outcome of one broadcast.
    pub fn record_delivery(&self, delivery: Delivery) {
        self.frames_sent.inc_by(delivery.sent as u64);
        self.send_failures.inc_by(delivery.failed as u64);
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
