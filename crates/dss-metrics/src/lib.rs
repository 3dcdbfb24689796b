//! Metrics for the DSS emulator.
//!
//! The emulator records counters and histograms only. Each one is declared
//! in [`metric_defs`] with its unit and the labels it carries on top of
//! `role` and `node`, so call sites never spell metric names by hand. The
//! `metrics` crate is re-exported for the recording macros.
//!
//! ```rust
//! use dss_metrics::{describe_metrics, metric_defs, metrics, MetricLabels};
//!
//! describe_metrics();
//!
//! let labels = MetricLabels::new("UDB", "device");
//! metrics::counter!(
//!     metric_defs::FRAMES_TX.name,
//!     &labels.with(&[("opcode", "RT".to_string())])
//! )
//! .increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_histogram, Unit};

/// How a metric is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

/// One recorded series.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Unit,
    pub description: &'static str,
    /// Labels beyond [`metric_defs::STANDARD_LABELS`].
    pub extra_labels: &'static [&'static str],
}

impl Metric {
    /// Every label key the series carries.
    pub fn label_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        metric_defs::STANDARD_LABELS
            .iter()
            .chain(self.extra_labels)
            .copied()
    }

    /// Registers the description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

const fn count(
    name: &'static str,
    description: &'static str,
    extra_labels: &'static [&'static str],
) -> Metric {
    Metric {
        name,
        kind: MetricKind::Counter,
        unit: Unit::Count,
        description,
        extra_labels,
    }
}

const fn distribution(name: &'static str, unit: Unit, description: &'static str) -> Metric {
    Metric {
        name,
        kind: MetricKind::Histogram,
        unit,
        description,
        extra_labels: &[],
    }
}

/// Metric definitions for the emulator.
pub mod metric_defs {
    use super::{count, distribution, Metric, Unit};

    /// Labels attached to every metric.
    pub const STANDARD_LABELS: &[&str] = &["role", "node"];

    // ========================================================================
    // Link
    // ========================================================================

    pub const FRAMES_TX: Metric =
        count("dss.link.frames_tx", "Frames sent to the peer", &["opcode"]);

    pub const FRAMES_RX: Metric =
        count("dss.link.frames_rx", "Frames received from the peer", &["opcode"]);

    pub const FRAMES_DROPPED: Metric = count(
        "dss.link.frames_dropped",
        "Inbound lines dropped for format or checksum errors",
        &["reason"],
    );

    pub const ACK_LATENCY: Metric = distribution(
        "dss.link.ack_latency_ms",
        Unit::Milliseconds,
        "Time from request to acknowledgement in milliseconds",
    );

    /// Acknowledgements whose id differs from the request waiting on them.
    pub const ACK_ID_MISMATCH: Metric = count(
        "dss.link.ack_id_mismatch",
        "Acknowledgements resolved against a request with another id",
        &[],
    );

    // ========================================================================
    // Registers and state
    // ========================================================================

    pub const CHANGE_NOTIFICATIONS: Metric = count(
        "dss.registers.notifications",
        "Register change notifications sent",
        &[],
    );

    pub const CHANGED_REGISTERS: Metric = distribution(
        "dss.registers.changed_per_notification",
        Unit::Count,
        "Registers carried by one change notification",
    );

    pub const STATE_TRANSITIONS: Metric = count(
        "dss.state.transitions",
        "Release state machine transitions",
        &["state"],
    );

    pub const OPERATIONS_RESOLVED: Metric = count(
        "dss.device.operations",
        "Device operations resolved",
        &["operation", "outcome"],
    );

    // ========================================================================
    // Firmware
    // ========================================================================

    /// Includes retries.
    pub const FIRMWARE_LINES_SENT: Metric =
        count("dss.firmware.lines_sent", "Firmware load attempts sent", &[]);

    pub const FIRMWARE_LINES_RETRIED: Metric = count(
        "dss.firmware.lines_retried",
        "Firmware lines resent after a NAK or timeout",
        &[],
    );

    pub const FIRMWARE_TRANSFERS: Metric = count(
        "dss.firmware.transfers",
        "Firmware transfers finished",
        &["outcome"],
    );

    pub const ALL: &[&Metric] = &[
        &FRAMES_TX,
        &FRAMES_RX,
        &FRAMES_DROPPED,
        &ACK_LATENCY,
        &ACK_ID_MISMATCH,
        &CHANGE_NOTIFICATIONS,
        &CHANGED_REGISTERS,
        &STATE_TRANSITIONS,
        &OPERATIONS_RESOLVED,
        &FIRMWARE_LINES_SENT,
        &FIRMWARE_LINES_RETRIED,
        &FIRMWARE_TRANSFERS,
    ];
}

/// Labels identifying the role that records a metric.
#[derive(Debug, Clone)]
pub struct MetricLabels {
    /// Protocol id of the recording role (`RC-RI` or `UDB`).
    pub node: String,
    /// Role kind (`controller` or `device`).
    pub role: String,
}

impl MetricLabels {
    pub fn new(node: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            role: role.into(),
        }
    }

    /// Convert to a label list for the `metrics` macros.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("role", self.role.clone()), ("node", self.node.clone())]
    }

    /// The standard labels plus `extra`.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Registers descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Installs a Prometheus recorder serving `/metrics` on `addr`.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_exporter(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let labels = MetricLabels::new("UDB", "device");
        let list = labels.to_labels();
        assert_eq!(list.len(), 2);
        assert!(list.contains(&("node", "UDB".to_string())));
        assert!(list.contains(&("role", "device".to_string())));

        let extended = labels.with(&[("opcode", "RM".to_string())]);
        assert_eq!(extended.len(), 3);
    }

    #[test]
    fn test_definitions_are_unique_and_described() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());

        for metric in metric_defs::ALL {
            assert!(!metric.description.is_empty(), "{} lacks a description", metric.name);
            assert!(metric.name.starts_with("dss."), "{}", metric.name);
        }
    }

    #[test]
    fn test_label_keys() {
        let keys: Vec<_> = metric_defs::OPERATIONS_RESOLVED.label_keys().collect();
        assert_eq!(keys, vec!["role", "node", "operation", "outcome"]);
        let keys: Vec<_> = metric_defs::ACK_LATENCY.label_keys().collect();
        assert_eq!(keys, vec!["role", "node"]);
        assert_eq!(metric_defs::ACK_LATENCY.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::ACK_LATENCY.unit, Unit::Milliseconds);
    }

    #[test]
    fn test_describe_without_recorder() {
        // No recorder installed: descriptions go to the no-op recorder.
        describe_metrics();
    }
}
