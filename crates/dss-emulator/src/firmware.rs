//! Line-by-line firmware upload with bounded retries.
//!
//! Each line goes out as one `LD` frame and must be answered with `OK` or
//! `ACK` before the next line is sent. A refused or unanswered line is
//! retried up to [`TransferConfig::max_attempts`] times, after which the
//! whole transfer stops. Lines the device already accepted stay loaded.
//! A final `RB` asks the device to apply the image; it is not awaited.

use crate::cancel::{race_with_cancellation, CancelFlag};
use crate::clock::Clock;
use crate::config::TransferConfig;
use crate::engine::ProtocolEngine;
use crate::error::{EmulatorError, TransferError};
use dss_metrics::metric_defs;
use dss_protocol::{FrameError, Request, FIELD_SEPARATOR};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress after a line was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Position of the accepted line in the source.
    pub line_index: usize,
    /// Lines accepted so far.
    pub completed: usize,
    /// Lines that will be sent in total.
    pub total: usize,
    /// `completed / total`, as a rounded percentage.
    pub percent: u8,
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Lines accepted by the device.
    pub lines_sent: usize,
    /// Blank source lines that were not sent.
    pub lines_skipped: usize,
    /// `LD` frames sent, retries included.
    pub attempts: u32,
    /// Attempts beyond the first for any line.
    pub retries: u32,
}

/// Drives one firmware upload over a protocol engine.
pub struct FirmwareTransfer<'a> {
    engine: &'a ProtocolEngine,
    clock: Arc<dyn Clock>,
    config: TransferConfig,
}

impl<'a> FirmwareTransfer<'a> {
    /// Create a transfer. Acknowledgements must be routed to `engine` by
    /// whoever receives the peer's bytes. `clock` only paces the lines.
    pub fn new(engine: &'a ProtocolEngine, clock: Arc<dyn Clock>, config: TransferConfig) -> Self {
        FirmwareTransfer {
            engine,
            clock,
            config,
        }
    }

    /// Upload `lines` and request a reboot.
    ///
    /// `progress` is called once per accepted line. Blank lines are skipped
    /// but keep their position for the indices reported in errors.
    pub async fn run<I, S>(
        &self,
        lines: I,
        cancel: &CancelFlag,
        progress: impl FnMut(Progress),
    ) -> Result<TransferReport, TransferError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let result = self.transfer(lines, cancel, progress).await;
        let outcome = match &result {
            Ok(_) => "completed",
            Err(TransferError::Cancelled { .. }) => "cancelled",
            Err(_) => "failed",
        };
        let labels = self
            .engine
            .labels()
            .with(&[("outcome", outcome.to_string())]);
        dss_metrics::metrics::counter!(metric_defs::FIRMWARE_TRANSFERS.name, &labels).increment(1);
        result
    }

    async fn transfer<I, S>(
        &self,
        lines: I,
        cancel: &CancelFlag,
        mut progress: impl FnMut(Progress),
    ) -> Result<TransferReport, TransferError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.config.max_attempts == 0 {
            return Err(EmulatorError::Config("max_attempts must be at least 1".to_string()).into());
        }

        let mut report = TransferReport::default();
        let mut queue = Vec::new();
        for (index, line) in lines.into_iter().enumerate() {
            let line: String = line.into();
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if line.trim().is_empty() {
                report.lines_skipped += 1;
                continue;
            }
            if line.contains(FIELD_SEPARATOR) {
                return Err(EmulatorError::Frame(FrameError::InvalidField {
                    field: "line",
                    value: line,
                })
                .into());
            }
            queue.push((index, line));
        }

        let total = queue.len();
        info!(
            "{}: uploading {} firmware lines",
            self.engine.self_id(),
            total
        );

        for (completed, (line_index, line)) in queue.into_iter().enumerate() {
            if completed > 0
                && race_with_cancellation(self.clock.sleep(self.config.pacing()), cancel)
                    .await
                    .is_none()
            {
                return Err(TransferError::Cancelled { line_index });
            }

            self.send_line(line_index, line, cancel, &mut report).await?;
            report.lines_sent += 1;

            let done = completed + 1;
            progress(Progress {
                line_index,
                completed: done,
                total,
                percent: ((done * 100 + total / 2) / total) as u8,
            });
        }

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled {
                line_index: report.lines_sent + report.lines_skipped,
            });
        }
        self.engine.send_request(&Request::Reboot)?;
        info!(
            "{}: firmware upload complete ({} lines, {} retries), reboot requested",
            self.engine.self_id(),
            report.lines_sent,
            report.retries
        );
        Ok(report)
    }

    async fn send_line(
        &self,
        line_index: usize,
        line: String,
        cancel: &CancelFlag,
        report: &mut TransferReport,
    ) -> Result<(), TransferError> {
        let max_attempts = self.config.max_attempts;
        let labels = self.engine.labels().to_labels();
        let request = Request::LoadLine { line };

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled { line_index });
            }
            if attempt > 1 {
                report.retries += 1;
                dss_metrics::metrics::counter!(metric_defs::FIRMWARE_LINES_RETRIED.name, &labels)
                    .increment(1);
            }

            let receiver = self.engine.request_with_ack(&request)?;
            report.attempts += 1;
            dss_metrics::metrics::counter!(metric_defs::FIRMWARE_LINES_SENT.name, &labels)
                .increment(1);

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled { line_index }),
                response = receiver => response.ok(),
                _ = tokio::time::sleep(self.config.ack_timeout()) => None,
            };

            match response {
                Some(response) if response.is_positive() => {
                    debug!(
                        "{}: line {} accepted on attempt {}",
                        self.engine.self_id(),
                        line_index,
                        attempt
                    );
                    return Ok(());
                }
                Some(response) => warn!(
                    "{}: line {} refused with {} (attempt {}/{})",
                    self.engine.self_id(),
                    line_index,
                    response.opcode(),
                    attempt,
                    max_attempts
                ),
                None => warn!(
                    "{}: line {} not acknowledged within {:?} (attempt {}/{})",
                    self.engine.self_id(),
                    line_index,
                    self.config.ack_timeout(),
                    attempt,
                    max_attempts
                ),
            }
        }

        Err(TransferError::RetryExhausted {
            line_index,
            attempts: max_attempts,
        })
    }
}
