//! Firmware upload over TCP.

use crate::config::SimConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::tcp::TcpLink;
use dss_emulator::{pump, CancelFlag, Clock, Controller, Progress, TransferReport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::ToSocketAddrs;
use tracing::{info, warn};

/// How long queued frames get to reach the socket after a transfer.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Read a firmware image as text lines.
pub fn read_firmware(path: &Path) -> RunnerResult<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|source| RunnerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Connect to a device at `addr` and upload the image in `path`.
pub async fn upload_file(
    addr: impl ToSocketAddrs,
    path: &Path,
    config: &SimConfig,
    clock: Arc<dyn Clock>,
    cancel: &CancelFlag,
    progress: impl FnMut(Progress),
) -> RunnerResult<TransferReport> {
    let lines = read_firmware(path)?;
    info!("uploading {} ({} lines)", path.display(), lines.len());

    let TcpLink {
        transport,
        inbound,
        task,
    } = TcpLink::connect(addr).await?;
    info!("connected to {}", transport.peer());
    let controller = Controller::new(
        config.emulator.controller.clone(),
        &config.emulator.link,
        Arc::new(transport),
        clock,
    );
    let receiver = tokio::spawn(pump(Arc::clone(&controller), inbound));

    let result = controller
        .upload_firmware(lines, &config.emulator.transfer, cancel, progress)
        .await;

    // Dropping the last transport clone lets the socket task flush the
    // trailing RB and close.
    receiver.abort();
    let _ = receiver.await;
    drop(controller);
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!("connection closed with error: {}", err),
        Ok(Err(err)) => warn!("connection task ended abnormally: {}", err),
        Err(_) => warn!("connection did not close within {:?}", DRAIN_TIMEOUT),
    }

    let report = result?;
    info!(
        "upload complete: {} lines, {} retries",
        report.lines_sent, report.retries
    );
    Ok(report)
}
