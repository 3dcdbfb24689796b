#![allow(dead_code)]

use dss_emulator::{
    pump, ChannelLink, ChannelTransport, Clock, Controller, ControllerConfig, ControllerEvent,
    Device, DeviceConfig, LinkConfig, ReleaseState, Role, TokioClock, Transport,
};
use dss_protocol::{Frame, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A controller whose outbound bytes land in the returned link.
pub fn controller() -> (Arc<Controller>, ChannelLink) {
    controller_with_clock(Arc::new(TokioClock))
}

/// Like [`controller`] with a custom clock.
pub fn controller_with_clock(clock: Arc<dyn Clock>) -> (Arc<Controller>, ChannelLink) {
    let (rc, udb) = ChannelTransport::pair("RC-RI", "UDB");
    let controller = Controller::new(
        ControllerConfig::default(),
        &LinkConfig::default(),
        Arc::new(rc.transport),
        clock,
    );
    tokio::spawn(pump(controller.clone(), rc.inbound));
    (controller, udb)
}

/// A device whose outbound bytes land in the returned link.
pub fn device(config: DeviceConfig) -> (Arc<Device>, ChannelLink) {
    let (rc, udb) = ChannelTransport::pair("RC-RI", "UDB");
    let device = Device::new(
        config,
        &LinkConfig::default(),
        Arc::new(udb.transport),
        Arc::new(TokioClock),
    )
    .unwrap();
    (device, rc)
}

/// A deterministic device configuration.
pub fn seeded(seed: u64) -> DeviceConfig {
    DeviceConfig {
        seed: Some(seed),
        ..DeviceConfig::default()
    }
}

/// Controller and device wired back to back.
pub fn linked(config: DeviceConfig) -> (Arc<Controller>, Arc<Device>) {
    let (rc, udb) = ChannelTransport::pair("RC-RI", "UDB");
    let link = LinkConfig::default();
    let clock = Arc::new(TokioClock);
    let controller = Controller::new(
        ControllerConfig::default(),
        &link,
        Arc::new(rc.transport),
        clock.clone(),
    );
    let device = Device::new(config, &link, Arc::new(udb.transport), clock).unwrap();
    tokio::spawn(pump(controller.clone(), rc.inbound));
    tokio::spawn(pump(device.clone(), udb.inbound));
    (controller, device)
}

/// Answer the controller's frames with `script`, forwarding every frame seen.
pub fn scripted_peer<F>(mut link: ChannelLink, mut script: F) -> mpsc::UnboundedReceiver<Frame>
where
    F: FnMut(&Frame) -> Option<Response> + Send + 'static,
{
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(bytes) = link.inbound.recv().await {
            let frame = Frame::parse(&bytes).unwrap();
            if let Some(response) = script(&frame) {
                let reply = response.to_frame(&frame.id, &frame.source, &frame.destination);
                if link.transport.send_bytes(&reply.encode()).is_err() {
                    break;
                }
            }
            if seen_tx.send(frame).is_err() {
                break;
            }
        }
    });
    seen_rx
}

/// Frames currently queued on `link`.
pub fn drain(link: &mut ChannelLink) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(bytes) = link.inbound.try_recv() {
        frames.push(Frame::parse(&bytes).unwrap());
    }
    frames
}

/// Frames currently queued on a receiver.
pub fn collect<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = receiver.try_recv() {
        items.push(item);
    }
    items
}

/// Deliver an `RT` for `name` to the controller.
pub fn report(controller: &Arc<Controller>, name: &str, value: &str) {
    let frame = Response::RegisterValue {
        name: name.to_string(),
        value: value.to_string(),
    }
    .to_frame("I100", "RC-RI", "UDB");
    controller.receive(&frame.encode());
}

/// Wait until the controller reaches `target`, failing after `limit`.
pub async fn wait_for_state(
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    target: ReleaseState,
    limit: Duration,
) -> Vec<ControllerEvent> {
    let mut seen = Vec::new();
    let reached = tokio::time::timeout(limit, async {
        while let Some(event) = events.recv().await {
            let done = matches!(event, ControllerEvent::StateChanged { to, .. } if to == target);
            seen.push(event);
            if done {
                return true;
            }
        }
        false
    })
    .await;
    assert!(
        matches!(reached, Ok(true)),
        "never reached {}; saw {:?}",
        target,
        seen
    );
    seen
}

/// Answer every request with `response` after `delay` of tokio time.
pub fn delayed_peer(mut link: ChannelLink, response: Response, delay: Duration) {
    tokio::spawn(async move {
        while let Some(bytes) = link.inbound.recv().await {
            let frame = Frame::parse(&bytes).unwrap();
            tokio::time::sleep(delay).await;
            let reply = response.to_frame(&frame.id, &frame.source, &frame.destination);
            if link.transport.send_bytes(&reply.encode()).is_err() {
                break;
            }
        }
    });
}
