//! Reel controller device state machine.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use gds::command::{NudgeReelData, ReelLampData, ReelSpeedData, ReelSpinData};
use gds::report::{
    ControllerInitializedStatus, FailureStatus, FailureStatusClear, ReelFailure,
    ReelLightIdentifiersResponse, ReelLightResponse, ReelSpinningStatus, ReelStatus,
    TiltReelsResponse,
};
use gds::{Command, ConnectionEvent, Edge, FaultState, GdsEngine, GdsReport};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::faults::{ReelControllerFaults, ReelFaults};

/// Highest reel id homed by [`GdsReelController::home_reels`] unless configured otherwise.
pub const DEFAULT_MAX_REELS: u8 = 12;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Stop position used when homing every reel.
const HOME_STOP: i32 = 0;

/// Events published to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReelControllerEvent {
    Connected,
    Disconnected,
    FaultOccurred { reel_id: u8, faults: ReelFaults },
    FaultCleared { reel_id: u8, faults: ReelFaults },
    ControllerFaultOccurred(ReelControllerFaults),
    ControllerFaultCleared(ReelControllerFaults),
    ReelConnected { reel_id: u8 },
    ReelDisconnected { reel_id: u8 },
    ReelStopped { reel_id: u8, step: u16 },
    ReelSpinning { reel_id: u8 },
    ReelSlowSpinning { reel_id: u8 },
    HardwareInitialized { reel_count: u8 },
}

/// Multi-reel controller built on a [`GdsEngine`].
pub struct GdsReelController {
    engine: Arc<GdsEngine>,
    max_reels: u8,
    reel_count: AtomicU8,
    reel_faults: Mutex<BTreeMap<u8, FaultState<ReelFaults>>>,
    reel_status: Mutex<BTreeMap<u8, ReelStatus>>,
    controller_faults: Mutex<FaultState<ReelControllerFaults>>,
    events: broadcast::Sender<ReelControllerEvent>,
}

fn reel_fault_bits(failure: &ReelFailure) -> ReelFaults {
    ReelFaults::when(ReelFaults::REEL_STALL, failure.stall)
        | ReelFaults::when(ReelFaults::REEL_TAMPER, failure.tamper)
        | ReelFaults::when(ReelFaults::LOW_VOLTAGE, failure.low_voltage)
        | ReelFaults::when(ReelFaults::FAILED_HOME, failure.failed_home)
}

impl GdsReelController {
    /// Create the controller and register its report handlers on `engine`.
    ///
    /// `max_reels` bounds the reel ids considered by [`Self::home_reels`].
    pub fn new(engine: Arc<GdsEngine>, max_reels: u8) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let controller = Arc::new(Self {
            engine,
            max_reels,
            reel_count: AtomicU8::new(0),
            reel_faults: Mutex::new(BTreeMap::new()),
            reel_status: Mutex::new(BTreeMap::new()),
            controller_faults: Mutex::new(FaultState::new()),
            events,
        });

        controller.handle(Self::on_failure_status);
        controller.handle(Self::on_failure_clear);
        controller.handle(Self::on_reel_status);
        controller.handle(Self::on_spinning_status);
        controller.handle(Self::on_controller_initialized);

        let weak = Arc::downgrade(&controller);
        controller.engine.on_connection_event(move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.publish(match event {
                    ConnectionEvent::Connected => ReelControllerEvent::Connected,
                    ConnectionEvent::Disconnected => ReelControllerEvent::Disconnected,
                });
            }
        });

        controller
    }

    fn handle<T: GdsReport>(self: &Arc<Self>, handler: fn(&Self, &T)) {
        let weak = Arc::downgrade(self);
        self.engine.register_callback::<T>(move |report| {
            if let Some(controller) = weak.upgrade() {
                handler(&controller, report);
            }
        });
    }

    pub fn engine(&self) -> &Arc<GdsEngine> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReelControllerEvent> {
        self.events.subscribe()
    }

    /// Reel count announced by the last `ControllerInitializedStatus`.
    pub fn reel_count(&self) -> u8 {
        self.reel_count.load(Ordering::Acquire)
    }

    /// Current faults of `reel_id`; empty for a reel never reported.
    pub fn faults(&self, reel_id: u8) -> ReelFaults {
        self.reel_faults
            .lock()
            .get(&reel_id)
            .map(FaultState::current)
            .unwrap_or_default()
    }

    pub fn controller_faults(&self) -> ReelControllerFaults {
        self.controller_faults.lock().current()
    }

    /// Last status snapshot for `reel_id`.
    pub fn reel_status(&self, reel_id: u8) -> Option<ReelStatus> {
        self.reel_status.lock().get(&reel_id).cloned()
    }

    /// Known reels not flagged `DISCONNECTED`, in id order.
    pub fn connected_reels(&self) -> Vec<u8> {
        self.reel_faults
            .lock()
            .iter()
            .filter(|(_, state)| !state.current().contains(ReelFaults::DISCONNECTED))
            .map(|(reel_id, _)| *reel_id)
            .collect()
    }

    fn publish(&self, event: ReelControllerEvent) {
        tracing::trace!(device = %self.engine.name(), ?event, "Reel controller event");
        let _ = self.events.send(event);
    }

    // -- Fault consolidation --

    /// Set or clear faults of one reel, publishing one event per actual change.
    pub fn set_reel_fault(&self, reel_id: u8, faults: ReelFaults, present: bool) {
        let edge = {
            let mut reels = self.reel_faults.lock();
            if present {
                reels.entry(reel_id).or_default().update(faults, true)
            } else {
                reels.get_mut(&reel_id).and_then(|state| state.update(faults, false))
            }
        };
        match edge {
            Some(Edge::Occurred(faults)) => {
                tracing::warn!(device = %self.engine.name(), reel_id, ?faults, "Reel fault occurred");
                self.publish(ReelControllerEvent::FaultOccurred { reel_id, faults });
            }
            Some(Edge::Cleared(faults)) => {
                tracing::info!(device = %self.engine.name(), reel_id, ?faults, "Reel fault cleared");
                self.publish(ReelControllerEvent::FaultCleared { reel_id, faults });
            }
            None => {}
        }
    }

    /// Set or clear controller-level faults, publishing one event per actual change.
    pub fn set_controller_fault(&self, faults: ReelControllerFaults, present: bool) {
        let edge = self.controller_faults.lock().update(faults, present);
        match edge {
            Some(Edge::Occurred(faults)) => {
                tracing::warn!(device = %self.engine.name(), ?faults, "Controller fault occurred");
                self.publish(ReelControllerEvent::ControllerFaultOccurred(faults));
            }
            Some(Edge::Cleared(faults)) => {
                tracing::info!(device = %self.engine.name(), ?faults, "Controller fault cleared");
                self.publish(ReelControllerEvent::ControllerFaultCleared(faults));
            }
            None => {}
        }
    }

    /// Clear stall, tamper and low-voltage on `reel_id` plus the controller's
    /// request, communication and hardware errors. Each cleared flag raises
    /// its own event.
    pub fn clear_faults(&self, reel_id: u8) {
        for fault in ReelFaults::CLEARABLE {
            self.set_reel_fault(reel_id, fault, false);
        }
        for fault in ReelControllerFaults::CLEARABLE {
            self.set_controller_fault(fault, false);
        }
    }

    // -- Report handlers --

    fn ack(&self, transaction_id: u8) {
        if transaction_id == 0 {
            return;
        }
        if let Err(e) = self.engine.ack(transaction_id, false) {
            tracing::warn!(device = %self.engine.name(), transaction_id, error = %e, "Ack failed");
        }
    }

    fn on_failure_status(&self, report: &FailureStatus) {
        self.ack(report.transaction_id);

        let faults = ReelControllerFaults::when(
            ReelControllerFaults::REQUEST_ERROR,
            report.firmware_error || report.component_error,
        ) | ReelControllerFaults::when(ReelControllerFaults::FIRMWARE_FAULT, report.diagnostic_code)
            | ReelControllerFaults::when(
                ReelControllerFaults::COMMUNICATION_ERROR,
                report.communication_error,
            )
            | ReelControllerFaults::when(ReelControllerFaults::HARDWARE_ERROR, report.hardware_error);
        self.set_controller_fault(faults, true);

        if let Some(reel) = &report.reel {
            self.set_reel_fault(reel.reel_id, reel_fault_bits(reel), true);
        }
    }

    fn on_failure_clear(&self, report: &FailureStatusClear) {
        self.ack(report.transaction_id);

        let faults = ReelControllerFaults::when(
            ReelControllerFaults::REQUEST_ERROR,
            report.firmware_error || report.component_error,
        ) | ReelControllerFaults::when(
            ReelControllerFaults::COMMUNICATION_ERROR,
            report.communication_error,
        ) | ReelControllerFaults::when(ReelControllerFaults::HARDWARE_ERROR, report.hardware_error);
        self.set_controller_fault(faults, false);

        if let Some(reel) = &report.reel {
            self.set_reel_fault(reel.reel_id, reel_fault_bits(reel), false);
        }
    }

    fn on_reel_status(&self, status: &ReelStatus) {
        self.ack(status.transaction_id);
        let reel_id = status.reel_id;

        let event = {
            let mut reels = self.reel_faults.lock();
            let first = !reels.contains_key(&reel_id);
            let state = reels.entry(reel_id).or_default();
            let disconnected = state.current().contains(ReelFaults::DISCONNECTED);

            if status.connected && (first || disconnected) {
                state.update(ReelFaults::DISCONNECTED, false);
                (!first).then_some(ReelControllerEvent::ReelConnected { reel_id })
            } else if !status.connected && (first || !disconnected) {
                state.update(ReelFaults::DISCONNECTED, true);
                (!first).then_some(ReelControllerEvent::ReelDisconnected { reel_id })
            } else {
                None
            }
        };

        self.reel_status.lock().insert(reel_id, status.clone());
        tracing::debug!(device = %self.engine.name(), reel_id, connected = status.connected, "Reel status");
        if let Some(event) = event {
            tracing::info!(device = %self.engine.name(), ?event, "Reel connectivity changed");
            self.publish(event);
        }
    }

    fn on_spinning_status(&self, status: &ReelSpinningStatus) {
        self.ack(status.transaction_id);
        let reel_id = status.reel_id;
        let event = if status.idle_at_stop {
            ReelControllerEvent::ReelStopped {
                reel_id,
                step: status.step,
            }
        } else if status.slow_spinning {
            ReelControllerEvent::ReelSlowSpinning { reel_id }
        } else if status.spinning {
            ReelControllerEvent::ReelSpinning { reel_id }
        } else {
            return;
        };
        self.publish(event);
    }

    fn on_controller_initialized(&self, status: &ControllerInitializedStatus) {
        tracing::info!(device = %self.engine.name(), reel_count = status.reel_count, "Reel controller initialized");
        self.reel_count.store(status.reel_count, Ordering::Release);
        self.publish(ReelControllerEvent::HardwareInitialized {
            reel_count: status.reel_count,
        });
    }

    // -- Operations --

    /// Disable, check firmware CRC and GAT, then wait for the controller to
    /// announce its initialisation. Every step must succeed.
    pub async fn reset(&self, crc_seed: u32) -> bool {
        self.engine.clear_report::<ControllerInitializedStatus>();
        if !self.engine.run_reset_checks(crc_seed).await {
            return false;
        }

        let timeout = self.engine.options().long_timeout;
        if self
            .engine
            .wait_for::<ControllerInitializedStatus>(timeout)
            .await
            .is_none()
        {
            tracing::warn!(device = %self.engine.name(), "Reset failed: controller not initialized");
            return false;
        }
        true
    }

    /// Run the controller self test. Only valid while disabled.
    pub async fn self_test(&self, nvm_clear: bool) -> bool {
        if self.engine.is_enabled() {
            tracing::warn!(device = %self.engine.name(), "Self test refused while enabled");
            return false;
        }

        let timeout = self.engine.options().extended_timeout;
        let Some(report) = self
            .engine
            .request::<FailureStatus>(&Command::SelfTest { nvm_clear }, timeout)
            .await
        else {
            tracing::warn!(device = %self.engine.name(), "No self test result");
            return false;
        };

        let passed = !(report.firmware_error
            || report.component_error
            || report.nvm_error
            || report.diagnostic_code
            || report.hardware_error);
        if !passed {
            tracing::warn!(device = %self.engine.name(), ?report, "Self test failed");
        }
        passed
    }

    /// Home one reel to `stop` and wait until it reports idle at the stop.
    pub async fn home_reel(&self, reel_id: u8, stop: i32) -> bool {
        self.clear_faults(reel_id);

        // A stop left over from an earlier spin or nudge must not count.
        let timeout = self.engine.options().long_timeout;
        let stopped = self
            .engine
            .request_matching::<ReelSpinningStatus, _>(&Command::HomeReel { reel_id, stop }, timeout, move |status| {
                status.reel_id == reel_id && status.idle_at_stop
            })
            .await;
        if stopped.is_none() {
            tracing::warn!(device = %self.engine.name(), reel_id, stop, "Reel did not home");
            return false;
        }
        true
    }

    /// Home every connected reel concurrently. True only if every issued
    /// home succeeds; disconnected reels are skipped, not failed.
    pub async fn home_reels(&self) -> bool {
        let mut reel_ids = Vec::new();
        {
            let mut snapshots = self.reel_status.lock();
            let faults = self.reel_faults.lock();
            for reel_id in 1..=self.max_reels {
                snapshots.remove(&reel_id);
                let connected = faults
                    .get(&reel_id)
                    .is_some_and(|state| !state.current().contains(ReelFaults::DISCONNECTED));
                if connected {
                    reel_ids.push(reel_id);
                }
            }
        }
        tracing::info!(device = %self.engine.name(), ?reel_ids, "Homing reels");

        let results =
            futures::future::join_all(reel_ids.iter().map(|&reel_id| self.home_reel(reel_id, HOME_STOP)))
                .await;
        results.into_iter().all(|homed| homed)
    }

    fn send(&self, command: Command) -> bool {
        match self.engine.send_command(&command) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device = %self.engine.name(), command = command.name(), error = %e, "Command not sent");
                false
            }
        }
    }

    pub fn spin_reels(&self, spin: Vec<ReelSpinData>) -> bool {
        self.send(Command::SpinReels(spin))
    }

    pub fn nudge_reels(&self, nudge: Vec<NudgeReelData>) -> bool {
        self.send(Command::Nudge(nudge))
    }

    pub fn set_reel_speed(&self, speeds: Vec<ReelSpeedData>) -> bool {
        self.send(Command::SetSpeed(speeds))
    }

    pub fn set_reel_offsets(&self, offsets: Vec<i32>) -> bool {
        self.send(Command::SetOffsets(offsets))
    }

    pub async fn set_brightness(&self, brightness: u8) -> bool {
        self.lights_request(Command::SetBrightness { brightness }).await
    }

    pub async fn set_lights(&self, lamps: Vec<ReelLampData>) -> bool {
        self.lights_request(Command::SetLamps(lamps)).await
    }

    async fn lights_request(&self, command: Command) -> bool {
        let timeout = self.engine.options().normal_timeout;
        match self.engine.request::<ReelLightResponse>(&command, timeout).await {
            Some(response) => response.lights_updated,
            None => {
                tracing::warn!(device = %self.engine.name(), command = command.name(), "No light response");
                false
            }
        }
    }

    pub async fn tilt_reels(&self) -> bool {
        let timeout = self.engine.options().normal_timeout;
        self.engine
            .request::<TiltReelsResponse>(&Command::TiltReels, timeout)
            .await
            .is_some_and(|response| response.tilted)
    }

    /// Inclusive range of light ids on the reels; empty when the controller
    /// does not answer or answers with `start_id > end_id`.
    pub async fn get_reel_light_identifiers(&self) -> RangeInclusive<u32> {
        let timeout = self.engine.options().long_timeout;
        let response = self
            .engine
            .request::<ReelLightIdentifiersResponse>(&Command::GetReelLightIdentifiers, timeout)
            .await;
        match response {
            Some(ids) if ids.start_id <= ids.end_id => ids.start_id..=ids.end_id,
            other => {
                tracing::warn!(device = %self.engine.name(), response = ?other, "No valid reel light identifiers");
                RangeInclusive::new(1, 0)
            }
        }
    }
}
