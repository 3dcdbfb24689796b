mod common;

use common::{linked, seeded, wait_for_state};
use dss_emulator::{
    CancelFlag, ControllerEvent, DeviceConfig, ReleaseState, TransferConfig,
};
use dss_protocol::{Request, Response};
use dss_registers::RegisterValue;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(30);

fn count(events: &[ControllerEvent], wanted: &ControllerEvent) -> usize {
    events.iter().filter(|event| *event == wanted).count()
}

#[tokio::test(start_paused = true)]
async fn release_workflow_from_idle_to_trigger() {
    let (controller, device) = linked(seeded(21));
    let mut events = controller.subscribe();

    controller.idle().unwrap();
    wait_for_state(&mut events, ReleaseState::IdleAck, LIMIT).await;
    assert_eq!(
        controller.register_value("MODEL").unwrap(),
        RegisterValue::Integer(12345)
    );

    controller.initialize().unwrap();
    let seen = wait_for_state(&mut events, ReleaseState::InitOk, LIMIT).await;
    assert!(seen.contains(&ControllerEvent::StateChanged {
        from: ReleaseState::InitReq,
        to: ReleaseState::InitPending,
    }));
    assert_eq!(
        device.register_value("AR_MODEL").unwrap(),
        RegisterValue::Text("ARC1-12".into())
    );
    assert_eq!(
        controller.register_value("RR1_LGD").unwrap(),
        RegisterValue::Text("Battery V".into())
    );

    controller.connect().unwrap();
    let seen = wait_for_state(&mut events, ReleaseState::ConOk, LIMIT).await;
    assert!(seen.contains(&ControllerEvent::StateChanged {
        from: ReleaseState::ConId1,
        to: ReleaseState::ConId2,
    }));
    assert_eq!(
        device.register_value("PIN_ID").unwrap(),
        RegisterValue::Integer(12345)
    );

    controller.single_range().unwrap();
    let seen = wait_for_state(&mut events, ReleaseState::RngSingleOk, LIMIT).await;
    let range = device.sensor_values().range;
    assert!(seen.contains(&ControllerEvent::RangeReceived { range }));
    // The detection alert follows the state change that raises it.
    let alert = events.recv().await.unwrap();
    assert_eq!(
        alert,
        ControllerEvent::DetectionAlert {
            state: ReleaseState::RngSingleOk
        }
    );
    assert_eq!(controller.current_range(), range);
    assert_eq!(controller.retry_count(), 0);

    controller.trigger_release().unwrap();
    wait_for_state(&mut events, ReleaseState::AtTrgOk, LIMIT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut rest = Vec::new();
    while let Ok(event) = events.try_recv() {
        rest.push(event);
    }
    assert_eq!(count(&rest, &ControllerEvent::ReleaseAlert), 1);
    assert_eq!(
        controller.register_value("RR4_VAL").unwrap(),
        RegisterValue::Integer(0)
    );
}

#[tokio::test(start_paused = true)]
async fn continuous_ranging_streams_until_idle() {
    let (controller, device) = linked(seeded(22));
    let mut events = controller.subscribe();

    controller.idle().unwrap();
    wait_for_state(&mut events, ReleaseState::IdleAck, LIMIT).await;
    controller.initialize().unwrap();
    wait_for_state(&mut events, ReleaseState::InitOk, LIMIT).await;
    controller.connect().unwrap();
    wait_for_state(&mut events, ReleaseState::ConOk, LIMIT).await;

    controller.continuous_range().unwrap();
    wait_for_state(&mut events, ReleaseState::RngContOk, LIMIT).await;

    tokio::time::sleep(Duration::from_millis(15_500)).await;
    let mut streamed = Vec::new();
    while let Ok(event) = events.try_recv() {
        streamed.push(event);
    }
    let ranges = streamed
        .iter()
        .filter(|event| matches!(event, ControllerEvent::RangeReceived { .. }))
        .count();
    assert_eq!(ranges, 3);
    assert_eq!(controller.state(), ReleaseState::RngContOk);
    assert_eq!(
        controller.register_value("RR_CTR").unwrap(),
        RegisterValue::Integer(3)
    );

    controller.idle().unwrap();
    wait_for_state(&mut events, ReleaseState::IdleAck, LIMIT).await;
    assert!(!device.status().ranging);

    tokio::time::sleep(Duration::from_secs(20)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ControllerEvent::RangeReceived { .. }),
            "ranging continued after idle"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn noise_test_after_idle() {
    let (controller, device) = linked(seeded(23));
    let mut events = controller.subscribe();

    assert!(!controller.is_ready_for_noise_test());
    controller.idle().unwrap();
    wait_for_state(&mut events, ReleaseState::IdleAck, LIMIT).await;
    assert!(controller.is_ready_for_noise_test());

    controller.noise_test().unwrap();
    wait_for_state(&mut events, ReleaseState::NtOk, LIMIT).await;
    let noise = device.sensor_values().noise;
    assert!((15..=80).contains(&noise));
    assert_eq!(
        controller.register_value("AR_NOISE_DB").unwrap(),
        RegisterValue::Integer(noise)
    );
}

#[tokio::test(start_paused = true)]
async fn manual_requests_round_trip() {
    let (controller, device) = linked(seeded(24));
    let mut events = controller.subscribe();

    let response = controller
        .execute_default(&Request::SetProtected {
            password: "1776".into(),
            name: "AR_ACP".into(),
            value: "202".into(),
        })
        .await
        .unwrap();
    assert_eq!(response, Response::Ok);
    assert_eq!(
        device.register_value("AR_ACP").unwrap(),
        RegisterValue::Integer(202)
    );

    let response = controller
        .execute_default(&Request::SetIdentity {
            password: "wrong".into(),
            serial: "1".into(),
        })
        .await
        .unwrap();
    assert_eq!(response, Response::No);

    controller.get_identity().unwrap();
    let event = tokio::time::timeout(LIMIT, events.recv()).await.unwrap();
    assert_eq!(
        event,
        Some(ControllerEvent::IdentityReceived {
            serial: "67890".into()
        })
    );

    let response = controller
        .execute(&Request::FactoryTest, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response, Response::Ok);
}

#[tokio::test(start_paused = true)]
async fn firmware_upload_lands_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = DeviceConfig {
        firmware_dir: dir.path().to_path_buf(),
        ..seeded(25)
    };
    let (controller, device) = linked(config);

    let image = [":10000000AA", ":10001000BB", "", ":00000001FF"];
    let mut percents = Vec::new();
    let report = controller
        .upload_firmware(image, &TransferConfig::default(), &CancelFlag::new(), |p| {
            percents.push(p.percent)
        })
        .await
        .unwrap();
    assert_eq!(report.lines_sent, 3);
    assert_eq!(report.lines_skipped, 1);
    assert_eq!(report.retries, 0);
    assert_eq!(percents, vec![33, 67, 100]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(device.firmware_lines().is_empty());
    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(
        std::fs::read_to_string(&files[0]).unwrap(),
        ":10000000AA\n:10001000BB\n:00000001FF\n"
    );
}
