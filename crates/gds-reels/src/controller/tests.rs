use std::time::Duration;

use gds::report::{CrcData, DeviceState, GatData, Report};
use gds::transport::{ChannelTransport, DeviceEnd};
use gds::{DeviceConfiguration, EngineOptions, codec};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;

struct Harness {
    controller: Arc<GdsReelController>,
    engine: Arc<GdsEngine>,
    events: broadcast::Receiver<ReelControllerEvent>,
    device: DeviceEnd,
}

async fn harness() -> Harness {
    let (transport, _reader, device) = ChannelTransport::pair(DeviceConfiguration::default());
    let engine = GdsEngine::new("reels", Arc::new(transport), EngineOptions::default());
    let controller = GdsReelController::new(Arc::clone(&engine), DEFAULT_MAX_REELS);
    engine.connect().await.unwrap();
    let events = controller.subscribe();
    Harness {
        controller,
        engine,
        events,
        device,
    }
}

fn drain(events: &mut broadcast::Receiver<ReelControllerEvent>) -> Vec<ReelControllerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn reel_status(reel_id: u8, connected: bool) -> Report {
    ReelStatus {
        reel_id,
        connected,
        ..Default::default()
    }
    .into()
}

fn stopped(reel_id: u8) -> Report {
    ReelSpinningStatus {
        reel_id,
        idle_at_stop: true,
        ..Default::default()
    }
    .into()
}

fn reel_failure(reel_id: u8, f: impl FnOnce(&mut ReelFailure)) -> Option<ReelFailure> {
    let mut failure = ReelFailure {
        reel_id,
        ..Default::default()
    };
    f(&mut failure);
    Some(failure)
}

fn spawn_responder(
    engine: &Arc<GdsEngine>,
    mut commands: UnboundedReceiver<Vec<u8>>,
    mut respond: impl FnMut(Command) -> Vec<Report> + Send + 'static,
) {
    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        while let Some(frame) = commands.recv().await {
            for report in respond(codec::decode_command(&frame).unwrap()) {
                engine.dispatch(report);
            }
        }
    });
}

#[tokio::test]
async fn first_disconnected_status_is_silent() {
    let mut h = harness().await;

    h.engine.dispatch(reel_status(4, false));
    assert!(h.controller.faults(4).contains(ReelFaults::DISCONNECTED));
    assert!(drain(&mut h.events).is_empty());

    h.engine.dispatch(reel_status(4, false));
    assert!(drain(&mut h.events).is_empty());

    h.engine.dispatch(reel_status(4, true));
    assert!(!h.controller.faults(4).contains(ReelFaults::DISCONNECTED));
    assert_eq!(
        drain(&mut h.events),
        vec![ReelControllerEvent::ReelConnected { reel_id: 4 }]
    );

    h.engine.dispatch(reel_status(4, true));
    assert!(drain(&mut h.events).is_empty());

    h.engine.dispatch(reel_status(4, false));
    assert_eq!(
        drain(&mut h.events),
        vec![ReelControllerEvent::ReelDisconnected { reel_id: 4 }]
    );
}

#[tokio::test]
async fn first_connected_status_is_silent() {
    let mut h = harness().await;
    h.engine.dispatch(reel_status(1, true));
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(h.controller.connected_reels(), vec![1]);
    assert!(h.controller.reel_status(1).unwrap().connected);
}

#[tokio::test]
async fn reel_faults_are_edge_triggered() {
    let mut h = harness().await;
    let report: Report = FailureStatus {
        reel: reel_failure(2, |r| r.stall = true),
        ..Default::default()
    }
    .into();

    h.engine.dispatch(report.clone());
    h.engine.dispatch(report);
    assert_eq!(
        drain(&mut h.events),
        vec![ReelControllerEvent::FaultOccurred {
            reel_id: 2,
            faults: ReelFaults::REEL_STALL
        }]
    );

    h.engine.dispatch(
        FailureStatusClear {
            reel: reel_failure(2, |r| {
                r.stall = true;
                r.tamper = true;
            }),
            ..Default::default()
        }
        .into(),
    );
    assert_eq!(
        drain(&mut h.events),
        vec![ReelControllerEvent::FaultCleared {
            reel_id: 2,
            faults: ReelFaults::REEL_STALL
        }]
    );
    assert!(h.controller.faults(2).is_empty());
}

#[tokio::test]
async fn controller_faults_accumulate_and_clear() {
    let mut h = harness().await;
    h.engine.dispatch(
        FailureStatus {
            firmware_error: true,
            component_error: true,
            communication_error: true,
            ..Default::default()
        }
        .into(),
    );
    let expected = ReelControllerFaults::REQUEST_ERROR | ReelControllerFaults::COMMUNICATION_ERROR;
    assert_eq!(h.controller.controller_faults(), expected);

    h.engine.dispatch(
        FailureStatus {
            diagnostic_code: true,
            ..Default::default()
        }
        .into(),
    );
    assert_eq!(
        h.controller.controller_faults(),
        expected | ReelControllerFaults::FIRMWARE_FAULT
    );

    h.engine.dispatch(
        FailureStatusClear {
            communication_error: true,
            ..Default::default()
        }
        .into(),
    );
    assert_eq!(
        h.controller.controller_faults(),
        ReelControllerFaults::REQUEST_ERROR | ReelControllerFaults::FIRMWARE_FAULT
    );
    assert_eq!(
        drain(&mut h.events),
        vec![
            ReelControllerEvent::ControllerFaultOccurred(expected),
            ReelControllerEvent::ControllerFaultOccurred(ReelControllerFaults::FIRMWARE_FAULT),
            ReelControllerEvent::ControllerFaultCleared(ReelControllerFaults::COMMUNICATION_ERROR),
        ]
    );
}

#[tokio::test]
async fn clear_faults_raises_one_event_per_flag() {
    let mut h = harness().await;
    h.engine.dispatch(
        FailureStatus {
            hardware_error: true,
            diagnostic_code: true,
            reel: reel_failure(3, |r| {
                r.stall = true;
                r.low_voltage = true;
                r.failed_home = true;
            }),
            ..Default::default()
        }
        .into(),
    );
    drain(&mut h.events);

    h.controller.clear_faults(3);
    assert_eq!(
        drain(&mut h.events),
        vec![
            ReelControllerEvent::FaultCleared {
                reel_id: 3,
                faults: ReelFaults::REEL_STALL
            },
            ReelControllerEvent::FaultCleared {
                reel_id: 3,
                faults: ReelFaults::LOW_VOLTAGE
            },
            ReelControllerEvent::ControllerFaultCleared(ReelControllerFaults::HARDWARE_ERROR),
        ]
    );
    assert_eq!(h.controller.faults(3), ReelFaults::FAILED_HOME);
    assert_eq!(
        h.controller.controller_faults(),
        ReelControllerFaults::FIRMWARE_FAULT
    );

    // Unknown reels stay unknown.
    h.controller.clear_faults(9);
    assert!(!h.controller.connected_reels().contains(&9));
}

#[tokio::test]
async fn home_reels_skips_disconnected() {
    let h = harness().await;
    h.engine.dispatch(reel_status(1, false));
    h.engine.dispatch(reel_status(2, true));
    h.engine.dispatch(reel_status(3, true));

    let homed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&homed);
    spawn_responder(&h.engine, h.device.commands, move |command| match command {
        Command::HomeReel { reel_id, .. } => {
            log.lock().push(reel_id);
            vec![stopped(reel_id)]
        }
        _ => Vec::new(),
    });

    assert!(h.controller.home_reels().await);
    assert_eq!(*homed.lock(), vec![2, 3]);
    assert!(h.controller.reel_status(2).is_none());
}

#[tokio::test(start_paused = true)]
async fn home_reels_fails_if_any_reel_fails() {
    let h = harness().await;
    h.engine.dispatch(reel_status(1, false));
    h.engine.dispatch(reel_status(2, true));
    h.engine.dispatch(reel_status(3, true));

    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::HomeReel { reel_id: 2, .. } => vec![stopped(2)],
        _ => Vec::new(),
    });

    assert!(!h.controller.home_reels().await);
}

#[tokio::test]
async fn home_reels_with_no_reels_succeeds() {
    let h = harness().await;
    assert!(h.controller.home_reels().await);
}

#[tokio::test]
async fn home_reel_ignores_other_reels() {
    let h = harness().await;
    let controller = Arc::clone(&h.controller);
    let job = tokio::spawn(async move { controller.home_reel(5, 40).await });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    h.engine.dispatch(stopped(6));
    h.engine.dispatch(
        ReelSpinningStatus {
            reel_id: 5,
            spinning: true,
            ..Default::default()
        }
        .into(),
    );
    assert!(!job.is_finished());

    h.engine.dispatch(stopped(5));
    assert!(job.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn home_reel_ignores_earlier_stop() {
    let h = harness().await;
    h.engine.dispatch(stopped(2));

    assert!(!h.controller.home_reel(2, 0).await);
}

#[tokio::test(start_paused = true)]
async fn home_reels_ignores_earlier_stop() {
    let h = harness().await;
    h.engine.dispatch(reel_status(3, true));
    h.engine.dispatch(stopped(3));

    assert!(!h.controller.home_reels().await);
}

#[tokio::test]
async fn home_reel_keeps_other_reels_stop() {
    let h = harness().await;
    h.engine.dispatch(stopped(6));

    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::HomeReel { reel_id, .. } => vec![stopped(reel_id)],
        _ => Vec::new(),
    });
    assert!(h.controller.home_reel(5, 0).await);

    let other = h
        .engine
        .wait_for_matching::<ReelSpinningStatus, _>(Duration::from_millis(10), |s| s.reel_id == 6)
        .await;
    assert_eq!(other.map(|s| s.reel_id), Some(6));
}

#[tokio::test]
async fn spinning_status_events() {
    let mut h = harness().await;
    h.engine.dispatch(
        ReelSpinningStatus {
            reel_id: 1,
            spinning: true,
            ..Default::default()
        }
        .into(),
    );
    h.engine.dispatch(
        ReelSpinningStatus {
            reel_id: 1,
            spinning: true,
            slow_spinning: true,
            ..Default::default()
        }
        .into(),
    );
    h.engine.dispatch(
        ReelSpinningStatus {
            reel_id: 1,
            idle_at_stop: true,
            step: 120,
            ..Default::default()
        }
        .into(),
    );
    assert_eq!(
        drain(&mut h.events),
        vec![
            ReelControllerEvent::ReelSpinning { reel_id: 1 },
            ReelControllerEvent::ReelSlowSpinning { reel_id: 1 },
            ReelControllerEvent::ReelStopped {
                reel_id: 1,
                step: 120
            },
        ]
    );
}

#[tokio::test]
async fn fire_and_forget_sends_one_command() {
    let mut h = harness().await;
    let spin = vec![
        ReelSpinData {
            reel_id: 1,
            rpm: 60,
            ..Default::default()
        },
        ReelSpinData {
            reel_id: 2,
            rpm: 60,
            ..Default::default()
        },
    ];
    assert!(h.controller.spin_reels(spin.clone()));
    assert!(h.controller.set_reel_offsets(vec![0, 10, 20]));

    let frame = h.device.commands.recv().await.unwrap();
    assert_eq!(codec::decode_command(&frame).unwrap(), Command::SpinReels(spin));
    let frame = h.device.commands.recv().await.unwrap();
    assert_eq!(
        codec::decode_command(&frame).unwrap(),
        Command::SetOffsets(vec![0, 10, 20])
    );
    assert!(h.device.commands.try_recv().is_err());

    h.engine.handle_disconnected();
    assert!(!h.controller.nudge_reels(Vec::new()));
}

#[tokio::test]
async fn brightness_ignores_stale_response() {
    let h = harness().await;
    h.engine.dispatch(
        ReelLightResponse {
            lights_updated: false,
        }
        .into(),
    );
    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::SetBrightness { .. } | Command::SetLamps(_) => vec![
            ReelLightResponse {
                lights_updated: true,
            }
            .into(),
        ],
        _ => Vec::new(),
    });

    assert!(h.controller.set_brightness(80).await);
    assert!(h.controller.set_lights(vec![ReelLampData::default()]).await);
}

#[tokio::test(start_paused = true)]
async fn brightness_times_out_false() {
    let h = harness().await;
    assert!(!h.controller.set_brightness(10).await);
}

#[tokio::test]
async fn light_identifiers_range() {
    let h = harness().await;
    let answers = Arc::new(Mutex::new(vec![(5u32, 1u32), (1, 24)]));
    let next = Arc::clone(&answers);
    spawn_responder(&h.engine, h.device.commands, move |command| match command {
        Command::GetReelLightIdentifiers => next
            .lock()
            .pop()
            .map(|(start_id, end_id)| ReelLightIdentifiersResponse { start_id, end_id }.into())
            .into_iter()
            .collect(),
        _ => Vec::new(),
    });

    assert_eq!(h.controller.get_reel_light_identifiers().await, 1..=24);
    assert!(h.controller.get_reel_light_identifiers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn light_identifiers_timeout_is_empty() {
    let h = harness().await;
    assert!(h.controller.get_reel_light_identifiers().await.is_empty());
}

#[tokio::test]
async fn tilt_reels_reports_flag() {
    let h = harness().await;
    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::TiltReels => vec![TiltReelsResponse { tilted: true }.into()],
        _ => Vec::new(),
    });
    assert!(h.controller.tilt_reels().await);
}

fn reset_responder(initialize: bool) -> impl FnMut(Command) -> Vec<Report> + Send + 'static {
    move |command| match command {
        Command::Disable => vec![DeviceState { enabled: false }.into()],
        Command::CalculateCrc { .. } => vec![CrcData { result: 0x1234 }.into()],
        Command::RequestGatReport => {
            let mut reports: Vec<Report> = vec![GatData { data: "GAT".into() }.into()];
            if initialize {
                reports.push(ControllerInitializedStatus { reel_count: 5 }.into());
            }
            reports
        }
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn reset_waits_for_initialization() {
    let mut h = harness().await;
    spawn_responder(&h.engine, h.device.commands, reset_responder(true));

    assert!(h.controller.reset(0xffff).await);
    assert_eq!(h.controller.reel_count(), 5);
    assert!(
        drain(&mut h.events).contains(&ReelControllerEvent::HardwareInitialized { reel_count: 5 })
    );
}

#[tokio::test(start_paused = true)]
async fn reset_fails_without_initialization() {
    let h = harness().await;
    spawn_responder(&h.engine, h.device.commands, reset_responder(false));
    assert!(!h.controller.reset(0xffff).await);
}

#[tokio::test]
async fn self_test_checks_failure_bits() {
    let h = harness().await;
    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::SelfTest { nvm_clear } => vec![
            FailureStatus {
                nvm_error: nvm_clear,
                ..Default::default()
            }
            .into(),
        ],
        _ => Vec::new(),
    });
    assert!(h.controller.self_test(false).await);
    assert!(!h.controller.self_test(true).await);
}
