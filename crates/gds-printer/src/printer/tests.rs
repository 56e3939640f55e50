use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use gds::report::{DeviceState, Report};
use gds::transport::{ChannelTransport, DeviceEnd};
use gds::{EngineOptions, codec};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;

struct Harness {
    printer: Arc<GdsPrinter>,
    engine: Arc<GdsEngine>,
    events: broadcast::Receiver<PrinterEvent>,
    device: DeviceEnd,
}

async fn harness_with(config: DeviceConfiguration) -> Harness {
    let (transport, _reader, device) = ChannelTransport::pair(config);
    let engine = GdsEngine::new("printer", Arc::new(transport), EngineOptions::default());
    let printer = GdsPrinter::new(Arc::clone(&engine));
    let events = printer.subscribe();
    engine.connect().await.unwrap();
    Harness {
        printer,
        engine,
        events,
        device,
    }
}

async fn harness() -> Harness {
    let mut h = harness_with(DeviceConfiguration::default()).await;
    drain(&mut h.events);
    h
}

async fn enabled_harness() -> Harness {
    let h = harness().await;
    h.engine.dispatch(DeviceState { enabled: true }.into());
    h
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut broadcast::Receiver<PrinterEvent>) -> Vec<PrinterEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn status(f: impl FnOnce(&mut TicketPrintStatus)) -> Report {
    let mut status = TicketPrintStatus::default();
    f(&mut status);
    status.into()
}

fn counting_callback(counter: &Arc<AtomicUsize>) -> Option<FieldOfInterestCallback> {
    let counter = Arc::clone(counter);
    Some(Box::new(move || {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }))
}

fn spawn_print(
    printer: &Arc<GdsPrinter>,
    callback: Option<FieldOfInterestCallback>,
) -> tokio::task::JoinHandle<bool> {
    let printer = Arc::clone(printer);
    tokio::spawn(async move { printer.print_ticket(TicketData::default(), callback).await })
}

/// Feed `reports` to the engine one at a time, letting the print loop
/// re-register its wait between them.
async fn feed(engine: &GdsEngine, reports: Vec<Report>) {
    for report in reports {
        settle().await;
        engine.dispatch(report);
    }
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
async fn repeated_fault_raises_single_event() {
    let mut h = harness().await;

    h.printer.set_fault(PrinterFaultTypes::PAPER_JAM, true);
    h.printer.set_fault(PrinterFaultTypes::PAPER_JAM, true);
    h.printer.set_fault(PrinterFaultTypes::CHASSIS_OPEN, false);

    assert_eq!(
        drain(&mut h.events),
        vec![PrinterEvent::FaultOccurred(PrinterFaultTypes::PAPER_JAM)]
    );

    h.printer.set_fault(PrinterFaultTypes::PAPER_JAM, false);
    h.printer.set_fault(PrinterFaultTypes::PAPER_JAM, false);
    assert_eq!(
        drain(&mut h.events),
        vec![PrinterEvent::FaultCleared(PrinterFaultTypes::PAPER_JAM)]
    );
}

#[tokio::test]
async fn print_completes_with_single_callback() {
    let mut h = enabled_harness().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let job = spawn_print(&h.printer, counting_callback(&calls));
    feed(
        &h.engine,
        vec![
            status(|s| s.print_in_progress = true),
            status(|s| s.field_of_interest1 = true),
            status(|s| s.print_complete = true),
        ],
    )
    .await;

    assert!(job.await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!h.printer.is_printing());
    assert_eq!(
        drain(&mut h.events),
        vec![
            PrinterEvent::PrintInProgress,
            PrinterEvent::FieldOfInterestPrinted,
            PrinterEvent::PrintCompleted,
        ]
    );
}

#[tokio::test]
async fn completion_without_field_of_interest_still_notifies() {
    let h = enabled_harness().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let job = spawn_print(&h.printer, counting_callback(&calls));
    feed(&h.engine, vec![status(|s| s.print_complete = true)]).await;

    assert!(job.await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn incomplete_print_fails_without_callback() {
    let mut h = enabled_harness().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let job = spawn_print(&h.printer, counting_callback(&calls));
    feed(&h.engine, vec![status(|s| s.print_incomplete = true)]).await;

    assert!(!job.await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!h.printer.is_printing());
    assert_eq!(drain(&mut h.events), vec![PrinterEvent::PrintIncomplete]);
}

#[tokio::test]
async fn one_unexpected_report_is_tolerated() {
    let h = enabled_harness().await;
    let job = spawn_print(&h.printer, None);
    feed(
        &h.engine,
        vec![status(|_| {}), status(|s| s.print_complete = true)],
    )
    .await;
    assert!(job.await.unwrap());

    let job = spawn_print(&h.printer, None);
    feed(&h.engine, vec![status(|_| {}), status(|_| {})]).await;
    assert!(!job.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn missing_status_fails_without_fault_events() {
    let mut h = enabled_harness().await;

    assert!(!h.printer.print_ticket(TicketData::default(), None).await);
    assert!(!h.printer.is_printing());
    assert!(drain(&mut h.events).is_empty());
    assert!(h.printer.faults().is_empty());
}

#[tokio::test]
async fn disconnect_cancels_print() {
    let mut h = enabled_harness().await;
    let job = spawn_print(&h.printer, None);
    settle().await;
    assert!(h.printer.is_printing());

    h.engine.handle_disconnected();
    let printed = tokio::time::timeout(Duration::from_secs(1), job)
        .await
        .expect("print should stop on disconnect")
        .unwrap();
    assert!(!printed);
    assert!(!h.printer.is_printing());
    assert!(drain(&mut h.events).contains(&PrinterEvent::Disconnected));
}

#[tokio::test]
async fn cancel_printing_is_idempotent() {
    let h = enabled_harness().await;
    h.printer.cancel_printing();

    let job = spawn_print(&h.printer, None);
    settle().await;
    h.printer.cancel_printing();
    h.printer.cancel_printing();
    assert!(!job.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn print_requires_enable() {
    let h = harness().await;
    assert!(!h.printer.print_ticket(TicketData::default(), None).await);
    assert!(!h.printer.is_printing());
}

#[tokio::test]
async fn print_enables_first() {
    let h = harness().await;
    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::Enable => vec![DeviceState { enabled: true }.into()],
        Command::PrintTicket(_) => vec![status(|s| s.print_complete = true)],
        _ => Vec::new(),
    });
    assert!(h.printer.print_ticket(TicketData::default(), None).await);
    assert!(h.engine.is_enabled());
}

#[tokio::test]
async fn form_feed_refused_while_printing() {
    let mut h = enabled_harness().await;
    let job = spawn_print(&h.printer, None);
    settle().await;

    assert!(!h.printer.form_feed().await);

    h.engine.dispatch(status(|s| s.print_complete = true));
    assert!(job.await.unwrap());
    drain(&mut h.events);
}

#[tokio::test(start_paused = true)]
async fn form_feed_always_reports_completion() {
    let mut h = enabled_harness().await;
    assert!(!h.printer.form_feed().await);
    assert_eq!(drain(&mut h.events), vec![PrinterEvent::PrintCompleted]);
}

#[tokio::test]
async fn form_feed_completes_without_field_of_interest() {
    let mut h = enabled_harness().await;
    let printer = Arc::clone(&h.printer);
    let job = tokio::spawn(async move { printer.form_feed().await });

    feed(
        &h.engine,
        vec![
            status(|s| s.print_in_progress = true),
            status(|s| s.print_complete = true),
        ],
    )
    .await;

    assert!(job.await.unwrap());
    assert_eq!(
        drain(&mut h.events),
        vec![PrinterEvent::PrintInProgress, PrinterEvent::PrintCompleted]
    );
}

#[tokio::test]
async fn printer_status_raises_one_event_per_fault() {
    let mut h = harness().await;

    h.engine.dispatch(
        PrinterStatus {
            paper_empty: true,
            paper_jam: true,
            paper_low: true,
            paper_in_chute: true,
            ..Default::default()
        }
        .into(),
    );
    assert_eq!(
        drain(&mut h.events),
        vec![
            PrinterEvent::FaultOccurred(PrinterFaultTypes::PAPER_EMPTY),
            PrinterEvent::FaultOccurred(PrinterFaultTypes::PAPER_JAM),
            PrinterEvent::WarningOccurred(PrinterWarningTypes::PAPER_LOW),
            PrinterEvent::WarningOccurred(PrinterWarningTypes::PAPER_IN_CHUTE),
        ]
    );

    h.engine.dispatch(
        PrinterStatus {
            paper_jam: true,
            ..Default::default()
        }
        .into(),
    );
    assert_eq!(h.printer.faults(), PrinterFaultTypes::PAPER_JAM);
    assert_eq!(
        drain(&mut h.events),
        vec![
            PrinterEvent::FaultCleared(PrinterFaultTypes::PAPER_EMPTY),
            PrinterEvent::WarningCleared(PrinterWarningTypes::PAPER_LOW),
            PrinterEvent::WarningCleared(PrinterWarningTypes::PAPER_IN_CHUTE),
        ]
    );
}

#[tokio::test]
async fn printer_status_drives_faults_and_warnings() {
    let mut h = harness().await;

    h.engine.dispatch(
        PrinterStatus {
            paper_empty: true,
            paper_low: true,
            top_of_form: false,
            ticket_retractable: true,
            print_incomplete: true,
            ..Default::default()
        }
        .into(),
    );
    assert_eq!(h.printer.faults(), PrinterFaultTypes::PAPER_EMPTY);
    assert_eq!(h.printer.warnings(), PrinterWarningTypes::PAPER_LOW);
    assert!(h.printer.can_retract());
    assert_eq!(
        drain(&mut h.events),
        vec![
            PrinterEvent::FaultOccurred(PrinterFaultTypes::PAPER_EMPTY),
            PrinterEvent::WarningOccurred(PrinterWarningTypes::PAPER_LOW),
        ]
    );

    h.engine.dispatch(PrinterStatus::default().into());
    assert!(h.printer.faults().is_empty());
    assert!(!h.printer.faults().contains(PrinterFaultTypes::PAPER_NOT_TOP_OF_FORM));
    assert!(!h.printer.can_retract());
    assert_eq!(
        drain(&mut h.events),
        vec![
            PrinterEvent::FaultCleared(PrinterFaultTypes::PAPER_EMPTY),
            PrinterEvent::WarningCleared(PrinterWarningTypes::PAPER_LOW),
        ]
    );
}

#[tokio::test]
async fn failure_status_sets_faults_and_republishes() {
    let mut h = harness().await;
    let report = FailureStatus {
        nvm_error: true,
        temperature_error: true,
        ..Default::default()
    };
    h.engine.dispatch(report.clone().into());

    let expected = PrinterFaultTypes::NVM_FAULT | PrinterFaultTypes::TEMPERATURE_ERROR;
    assert_eq!(h.printer.faults(), expected);
    assert_eq!(
        drain(&mut h.events),
        vec![
            PrinterEvent::FaultOccurred(expected),
            PrinterEvent::FailureReported(report.clone()),
        ]
    );

    // Repeated report: no new fault edge, raw report still republished.
    h.engine.dispatch(report.clone().into());
    assert_eq!(drain(&mut h.events), vec![PrinterEvent::FailureReported(report)]);
}

#[tokio::test]
async fn failure_clear_clears_firmware_fault() {
    let h = harness().await;
    h.engine.dispatch(
        FailureStatus {
            firmware_error: true,
            ..Default::default()
        }
        .into(),
    );
    h.engine.dispatch(
        FailureStatusClear {
            firmware_error: true,
            ..Default::default()
        }
        .into(),
    );
    assert!(h.printer.faults().is_empty());
}

#[tokio::test]
async fn reports_with_transaction_id_are_acked() {
    let mut h = harness().await;
    h.engine.dispatch(
        PrinterStatus {
            transaction_id: 42,
            ..Default::default()
        }
        .into(),
    );
    let frame = h.device.commands.recv().await.unwrap();
    assert_eq!(
        codec::decode_command(&frame).unwrap(),
        Command::Ack {
            transaction_id: 42,
            requires_response: false
        }
    );
}

#[tokio::test]
async fn self_test_refused_while_enabled() {
    let h = enabled_harness().await;
    assert!(!h.printer.self_test(false).await);
}

#[tokio::test]
async fn self_test_checks_failure_bits() {
    let h = harness().await;
    let failing = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&failing);
    spawn_responder(&h.engine, h.device.commands, move |command| match command {
        Command::SelfTest { .. } => vec![
            FailureStatus {
                print_head_damaged: flag.load(Ordering::SeqCst),
                ..Default::default()
            }
            .into(),
        ],
        _ => Vec::new(),
    });

    assert!(h.printer.self_test(true).await);
    failing.store(true, Ordering::SeqCst);
    assert!(!h.printer.self_test(true).await);
    assert!(h.printer.faults().contains(PrinterFaultTypes::PRINT_HEAD_DAMAGED));
}

#[tokio::test]
async fn connect_normalises_identity() {
    let h = harness_with(DeviceConfiguration {
        manufacturer: "FUTURELOGICinc ".into(),
        model: "a,b,gen2".into(),
        ..Default::default()
    })
    .await;
    let config = h.printer.configuration();
    assert_eq!(config.manufacturer, "FutureLogic");
    assert_eq!(config.model, "Gen2 Universal");
    assert_eq!(config.firmware_id, "b");
}

#[tokio::test]
async fn transfer_file_sends_chunks() {
    let h = harness().await;
    let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let mut expected = 0u32;
    spawn_responder(&h.engine, h.device.commands, move |command| match command {
        Command::GraphicTransferSetup {
            file_index,
            file_size,
            ..
        } => {
            expected = file_size;
            vec![
                TransferStatus {
                    file_index,
                    code: TransferCode::Ready,
                }
                .into(),
            ]
        }
        Command::FileTransfer {
            file_index,
            offset,
            data,
        } => {
            let mut sink = sink.lock();
            assert_eq!(offset as usize, sink.len());
            sink.extend_from_slice(&data);
            if sink.len() as u32 == expected {
                vec![
                    TransferStatus {
                        file_index,
                        code: TransferCode::Complete,
                    }
                    .into(),
                ]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    });

    let data: Vec<u8> = (0..1100u32).map(|i| i as u8).collect();
    assert!(h.printer.transfer_file(GraphicType::Bitmap, 2, &data).await);
    assert_eq!(*received.lock(), data);
}

#[tokio::test(start_paused = true)]
async fn transfer_file_requires_ready() {
    let h = harness().await;
    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::GraphicTransferSetup { file_index, .. } => vec![
            TransferStatus {
                file_index,
                code: TransferCode::Rejected,
            }
            .into(),
        ],
        _ => Vec::new(),
    });
    assert!(!h.printer.transfer_file(GraphicType::Font, 1, &[1, 2, 3]).await);
}

#[tokio::test]
async fn metrics_and_retract() {
    let h = harness().await;
    spawn_responder(&h.engine, h.device.commands, |command| match command {
        Command::PrinterRequestMetrics => vec![
            Metrics {
                data: "tickets=12".into(),
            }
            .into(),
        ],
        _ => Vec::new(),
    });

    assert_eq!(h.printer.read_metrics().await.as_deref(), Some("tickets=12"));

    assert!(!h.printer.retract_ticket());
    h.engine.dispatch(
        PrinterStatus {
            ticket_retractable: true,
            print_incomplete: true,
            ..Default::default()
        }
        .into(),
    );
    assert!(h.printer.retract_ticket());
    assert!(!h.printer.can_retract());
}
