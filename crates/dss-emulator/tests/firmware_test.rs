mod common;

use common::{collect, controller, controller_with_clock, delayed_peer, scripted_peer};
use dss_emulator::{CancelFlag, EmulatorError, ScaledClock, TransferConfig, TransferError};
use std::sync::Arc;
use dss_protocol::{Frame, FrameError, Opcode, Response};
use std::time::Duration;

fn loads_of(frames: &[Frame], line: &str) -> usize {
    frames
        .iter()
        .filter(|f| f.opcode == Opcode::LoadLine && f.data[0] == line)
        .count()
}

fn reboots(frames: &[Frame]) -> usize {
    frames.iter().filter(|f| f.opcode == Opcode::Reboot).count()
}

#[tokio::test(start_paused = true)]
async fn retried_line_succeeds_on_fifth_attempt() {
    let (controller, link) = controller();
    let mut naks = 0;
    let mut seen = scripted_peer(link, move |frame| match frame.opcode {
        Opcode::LoadLine if frame.data[0] == "line-2" => {
            naks += 1;
            Some(if naks <= 4 { Response::Nak } else { Response::Ok })
        }
        Opcode::LoadLine => Some(Response::Ack),
        _ => None,
    });

    let mut percents = Vec::new();
    let report = controller
        .upload_firmware(
            ["line-1", "line-2", "line-3"],
            &TransferConfig::default(),
            &CancelFlag::new(),
            |progress| percents.push(progress.percent),
        )
        .await
        .unwrap();

    assert_eq!(percents, vec![33, 67, 100]);
    assert_eq!(report.lines_sent, 3);
    assert_eq!(report.attempts, 7);
    assert_eq!(report.retries, 4);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let frames = collect(&mut seen);
    assert_eq!(loads_of(&frames, "line-2"), 5);
    assert_eq!(reboots(&frames), 1);
    assert_eq!(frames.last().unwrap().opcode, Opcode::Reboot);
}

#[tokio::test(start_paused = true)]
async fn unanswered_line_exhausts_retries() {
    let (controller, link) = controller();
    let mut seen = scripted_peer(link, |frame| match frame.opcode {
        Opcode::LoadLine if frame.data[0] == "line-2" => None,
        Opcode::LoadLine => Some(Response::Ack),
        _ => None,
    });

    let mut percents = Vec::new();
    let result = controller
        .upload_firmware(
            vec!["line-1".to_string(), "line-2".to_string(), "line-3".to_string()],
            &TransferConfig::default(),
            &CancelFlag::new(),
            |progress| percents.push(progress.percent),
        )
        .await;

    assert!(matches!(
        result,
        Err(TransferError::RetryExhausted {
            line_index: 1,
            attempts: 5
        })
    ));
    assert_eq!(percents, vec![33]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let frames = collect(&mut seen);
    assert_eq!(loads_of(&frames, "line-2"), 5);
    assert_eq!(loads_of(&frames, "line-3"), 0);
    assert_eq!(reboots(&frames), 0);

    // The engine stays usable after an aborted transfer.
    controller.get_identity().unwrap();
}

#[tokio::test(start_paused = true)]
async fn blank_lines_keep_source_positions() {
    let (controller, link) = controller();
    let mut seen = scripted_peer(link, |frame| match frame.opcode {
        Opcode::LoadLine if frame.data[0] == "C" => Some(Response::Nak),
        Opcode::LoadLine => Some(Response::Ack),
        _ => None,
    });

    let mut progress = Vec::new();
    let config = TransferConfig {
        max_attempts: 2,
        ..TransferConfig::default()
    };
    let result = controller
        .upload_firmware(["A", "", "B", "  ", "C"], &config, &CancelFlag::new(), |p| {
            progress.push((p.line_index, p.percent))
        })
        .await;

    assert_eq!(progress, vec![(0, 33), (2, 67)]);
    assert!(matches!(
        result,
        Err(TransferError::RetryExhausted {
            line_index: 4,
            attempts: 2
        })
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(loads_of(&collect(&mut seen), "C"), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_transfer() {
    let (controller, link) = controller();
    let mut seen = scripted_peer(link, |frame| match frame.opcode {
        Opcode::LoadLine if frame.data[0] == "second" => None,
        Opcode::LoadLine => Some(Response::Ack),
        _ => None,
    });

    let cancel = CancelFlag::new();
    let remote = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        remote.cancel();
    });

    let result = controller
        .upload_firmware(
            ["first", "second", "third"],
            &TransferConfig::default(),
            &cancel,
            |_| {},
        )
        .await;
    assert!(matches!(
        result,
        Err(TransferError::Cancelled { line_index: 1 })
    ));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let frames = collect(&mut seen);
    assert_eq!(loads_of(&frames, "second"), 1);
    assert_eq!(loads_of(&frames, "third"), 0);
    assert_eq!(reboots(&frames), 0);
}

#[tokio::test]
async fn separator_in_line_is_rejected_up_front() {
    let (controller, link) = controller();
    let mut seen = scripted_peer(link, |_| Some(Response::Ack));

    let result = controller
        .upload_firmware(
            ["ok", "bad,line"],
            &TransferConfig::default(),
            &CancelFlag::new(),
            |_| {},
        )
        .await;
    assert!(matches!(
        result,
        Err(TransferError::Emulator(EmulatorError::Frame(
            FrameError::InvalidField { field: "line", .. }
        )))
    ));
    tokio::task::yield_now().await;
    assert!(collect(&mut seen).is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_image_only_reboots() {
    let (controller, link) = controller();
    let mut seen = scripted_peer(link, |_| None);

    let report = controller
        .upload_firmware(
            Vec::<String>::new(),
            &TransferConfig::default(),
            &CancelFlag::new(),
            |_| panic!("no progress expected"),
        )
        .await
        .unwrap();
    assert_eq!(report.lines_sent, 0);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let frames = collect(&mut seen);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, Opcode::Reboot);
}

#[tokio::test(start_paused = true)]
async fn ack_timeout_is_not_scaled_by_speed() {
    let clock = Arc::new(ScaledClock::new(1000.0).unwrap());
    let (controller, link) = controller_with_clock(clock);
    delayed_peer(link, Response::Ack, Duration::from_millis(100));

    let report = controller
        .upload_firmware(
            ["line-1", "line-2"],
            &TransferConfig::default(),
            &CancelFlag::new(),
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(report.lines_sent, 2);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.retries, 0);
}
