//! GDS protocol engine.
//!
//! Owns the transport, sends framed commands, demultiplexes inbound
//! reports to one handler per [`ReportKind`], and correlates commands with
//! responses through [`GdsEngine::wait_for`].
//!
//! Connection lifecycle: `Disconnected -> Connecting -> Connected`, and back
//! to `Disconnected` on transport loss, which resolves every pending wait
//! with "no report".

mod correlation;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec;
use crate::command::Command;
use crate::configuration::DeviceConfiguration;
use crate::options::EngineOptions;
use crate::report::{CrcData, DeviceState, GatData, GdsReport, Report, ReportKind};
use crate::transport::{Transport, TransportEvent};
use crate::{GdsError, Result};

use correlation::{Correlation, Matcher, Registration};

/// Handler invoked synchronously on the dispatch path.
pub type ReportHandler = Arc<dyn Fn(&Report) + Send + Sync>;

/// Listener for connection lifecycle changes.
pub type ConnectionHandler = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

fn matcher<T, F>(predicate: F) -> Matcher
where
    T: GdsReport,
    F: Fn(&T) -> bool + Send + 'static,
{
    Box::new(move |report: &Report| T::from_report_ref(report).is_some_and(|r| predicate(r)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Protocol engine for a single peripheral.
pub struct GdsEngine {
    name: String,
    transport: Arc<dyn Transport>,
    options: EngineOptions,
    state: Mutex<ConnectionState>,
    enabled: AtomicBool,
    transaction_id: AtomicU8,
    configuration: RwLock<DeviceConfiguration>,
    handlers: Mutex<HashMap<ReportKind, ReportHandler>>,
    connection_handlers: Mutex<Vec<ConnectionHandler>>,
    correlation: Mutex<Correlation>,
}

impl GdsEngine {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: EngineOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            transport,
            options,
            state: Mutex::new(ConnectionState::Disconnected),
            enabled: AtomicBool::new(false),
            transaction_id: AtomicU8::new(0),
            configuration: RwLock::new(DeviceConfiguration::default()),
            handlers: Mutex::new(HashMap::new()),
            connection_handlers: Mutex::new(Vec::new()),
            correlation: Mutex::new(Correlation::default()),
        })
    }

    /// Device name used in log fields.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn configuration(&self) -> DeviceConfiguration {
        self.configuration.read().clone()
    }

    /// Generic configuration handling: store the trimmed identification strings.
    pub fn update_configuration(&self, config: DeviceConfiguration) {
        let config = config.normalized();
        tracing::info!(
            device = %self.name,
            manufacturer = %config.manufacturer,
            model = %config.model,
            firmware_id = %config.firmware_id,
            firmware_revision = %config.firmware_revision,
            "Device configuration updated"
        );
        *self.configuration.write() = config;
    }

    // -- Connection lifecycle --

    /// Open the transport and move to `Connected`.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(GdsError::Transport("connect already in progress".into()));
                }
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        tracing::info!(device = %self.name, "Connecting");
        if let Err(e) = self.transport.connect().await {
            *self.state.lock() = ConnectionState::Disconnected;
            tracing::warn!(device = %self.name, error = %e, "Connect failed");
            return Err(e);
        }

        self.correlation.lock().open();
        *self.state.lock() = ConnectionState::Connected;
        self.update_configuration(self.transport.configuration());
        tracing::info!(device = %self.name, "Connected");
        self.notify(ConnectionEvent::Connected);
        Ok(())
    }

    /// Close the transport and run disconnect handling.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.transport.disconnect().await;
        self.handle_disconnected();
        result
    }

    /// Transport loss: cancel every pending wait, reset correlation state,
    /// assume disabled. Idempotent.
    pub fn handle_disconnected(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);
        let cancelled = self.correlation.lock().cancel_all();
        if previous == ConnectionState::Disconnected {
            return;
        }

        self.enabled.store(false, Ordering::Release);
        tracing::info!(device = %self.name, cancelled, "Disconnected");
        self.notify(ConnectionEvent::Disconnected);
    }

    /// Register a connection lifecycle listener. Listeners run after the
    /// engine has updated its own state.
    pub fn on_connection_event(&self, handler: impl Fn(ConnectionEvent) + Send + Sync + 'static) {
        self.connection_handlers.lock().push(Arc::new(handler));
    }

    fn notify(&self, event: ConnectionEvent) {
        let handlers = self.connection_handlers.lock().clone();
        for handler in handlers {
            handler(event);
        }
    }

    // -- Inbound path --

    /// Spawn the task that feeds transport events into the engine.
    pub fn spawn_reader(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(engine.run_reader(events))
    }

    async fn run_reader(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Frame(frame) => self.handle_frame(&frame),
                TransportEvent::Disconnected => self.handle_disconnected(),
            }
        }
        tracing::debug!(device = %self.name, "Transport event stream closed");
        self.handle_disconnected();
    }

    /// Decode one inbound frame and dispatch it. Undecodable frames are dropped.
    pub fn handle_frame(&self, frame: &[u8]) {
        match codec::decode_report(frame) {
            Ok(report) => self.dispatch(report),
            Err(e) => {
                tracing::warn!(device = %self.name, error = %e, len = frame.len(), "Dropping undecodable frame");
            }
        }
    }

    /// Deliver a report: registered handler first, then the oldest
    /// matching waiter (or the unclaimed slot).
    pub fn dispatch(&self, report: Report) {
        let kind = report.kind();
        if !self.is_connected() {
            tracing::debug!(device = %self.name, ?kind, "Report ignored while disconnected");
            return;
        }
        tracing::trace!(device = %self.name, ?kind, "Report received");

        if let Report::DeviceState(state) = &report {
            self.enabled.store(state.enabled, Ordering::Release);
        }

        let handler = self.handlers.lock().get(&kind).cloned();
        if let Some(handler) = handler {
            handler(&report);
        }

        if !self.correlation.lock().complete(report) {
            tracing::trace!(device = %self.name, ?kind, "Report kept unclaimed");
        }
    }

    /// Associate `T`'s report kind with `handler`. A kind has exactly one
    /// handler; a later registration replaces the earlier one.
    pub fn register_callback<T: GdsReport>(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        let wrapped: ReportHandler = Arc::new(move |report: &Report| {
            if let Some(inner) = T::from_report_ref(report) {
                handler(inner);
            }
        });
        if self.handlers.lock().insert(T::KIND, wrapped).is_some() {
            tracing::debug!(device = %self.name, kind = ?T::KIND, "Replaced report handler");
        }
    }

    // -- Outbound path --

    pub fn send_command(&self, command: &Command) -> Result<()> {
        self.send_frame(command, codec::encode_command(command)?)
    }

    pub fn send_command_with_correlation(&self, command: &Command, transaction_id: u8) -> Result<()> {
        self.send_frame(command, codec::encode_command_with_id(command, transaction_id)?)
    }

    fn send_frame(&self, command: &Command, frame: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(GdsError::NotConnected);
        }
        tracing::trace!(
            device = %self.name,
            command = command.name(),
            bytes = frame.len(),
            "Sending command"
        );
        self.transport.send(frame)
    }

    /// Next transaction id, cycling through 1..=255.
    pub fn next_transaction_id(&self) -> u8 {
        loop {
            let id = self.transaction_id.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    /// Acknowledge a received report so the device releases its queue entry.
    pub fn ack(&self, transaction_id: u8, requires_response: bool) -> Result<()> {
        self.send_command(&Command::Ack {
            transaction_id,
            requires_response,
        })
    }

    // -- Correlation --

    /// Wait for the next report of kind `T`.
    ///
    /// Resolves to `None` on timeout or disconnect. A timeout is a normal
    /// outcome meaning the device did not answer.
    pub async fn wait_for<T: GdsReport>(&self, timeout: Duration) -> Option<T> {
        self.wait_for_matching(timeout, |_: &T| true).await
    }

    /// Wait for the next report of kind `T` accepted by `predicate`.
    ///
    /// Waiters for the same kind are served in submission order among those
    /// whose predicate accepts a given report.
    pub async fn wait_for_matching<T, F>(&self, timeout: Duration, predicate: F) -> Option<T>
    where
        T: GdsReport,
        F: Fn(&T) -> bool + Send + 'static,
    {
        let registration = self
            .correlation
            .lock()
            .register(T::KIND, matcher(predicate), false);
        self.await_registration(registration, timeout).await
    }

    /// Send `command` and wait for the first `T` accepted by `predicate`
    /// that is dispatched after the wait was queued.
    ///
    /// The waiter is registered before the command goes out, and a stale
    /// unclaimed `T` that `predicate` accepts is discarded. Unclaimed
    /// reports the predicate rejects are left alone, so concurrent requests
    /// for different targets do not disturb each other.
    pub async fn request_matching<T, F>(&self, command: &Command, timeout: Duration, predicate: F) -> Option<T>
    where
        T: GdsReport,
        F: Fn(&T) -> bool + Send + 'static,
    {
        let registration = self
            .correlation
            .lock()
            .register(T::KIND, matcher(predicate), true);
        if let Registration::Pending { id, .. } = &registration {
            if let Err(e) = self.send_command(command) {
                self.correlation.lock().withdraw(T::KIND, *id);
                tracing::warn!(device = %self.name, command = command.name(), error = %e, "Command not sent");
                return None;
            }
        }
        self.await_registration(registration, timeout).await
    }

    async fn await_registration<T: GdsReport>(&self, registration: Registration, timeout: Duration) -> Option<T> {
        let (id, mut rx) = match registration {
            Registration::Ready(report) => return T::from_report(report),
            Registration::Closed => return None,
            Registration::Pending { id, rx } => (id, rx),
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(Some(report))) => T::from_report(report),
            Ok(Ok(None)) | Ok(Err(_)) => {
                tracing::debug!(device = %self.name, kind = ?T::KIND, "Wait cancelled");
                None
            }
            Err(_) => {
                let withdrawn = self.correlation.lock().withdraw(T::KIND, id);
                if !withdrawn {
                    // Completed between the deadline firing and the withdraw.
                    if let Ok(Some(report)) = rx.try_recv() {
                        return T::from_report(report);
                    }
                }
                tracing::debug!(device = %self.name, kind = ?T::KIND, ?timeout, "Wait timed out");
                None
            }
        }
    }

    /// Discard a stale unclaimed report of kind `T`.
    pub fn clear_report<T: GdsReport>(&self) {
        if self.correlation.lock().clear_unclaimed(T::KIND) {
            tracing::trace!(device = %self.name, kind = ?T::KIND, "Cleared stale report");
        }
    }

    /// Clear any stale `T`, send `command`, and wait for the next `T`.
    pub async fn request<T: GdsReport>(&self, command: &Command, timeout: Duration) -> Option<T> {
        self.clear_report::<T>();
        if let Err(e) = self.send_command(command) {
            tracing::warn!(device = %self.name, command = command.name(), error = %e, "Command not sent");
            return None;
        }
        self.wait_for(timeout).await
    }

    /// Number of live waiters for `kind`.
    pub fn pending_waits(&self, kind: ReportKind) -> usize {
        self.correlation.lock().pending(kind)
    }

    // -- Lifecycle primitives shared by all devices --

    pub async fn enable(&self) -> bool {
        match self
            .request::<DeviceState>(&Command::Enable, self.options.normal_timeout)
            .await
        {
            Some(state) => state.enabled,
            None => {
                tracing::warn!(device = %self.name, "No response to Enable");
                false
            }
        }
    }

    pub async fn disable(&self) -> bool {
        match self
            .request::<DeviceState>(&Command::Disable, self.options.normal_timeout)
            .await
        {
            Some(state) => !state.enabled,
            None => {
                tracing::warn!(device = %self.name, "No response to Disable");
                false
            }
        }
    }

    /// Ask the device for a firmware CRC. Returns 0 when it does not answer.
    pub async fn calculate_crc(&self, seed: u32) -> u16 {
        self.request::<CrcData>(&Command::CalculateCrc { seed }, self.options.extended_timeout)
            .await
            .map_or(0, |crc| crc.result)
    }

    /// Request the GAT (game authentication terminal) report. Empty when the
    /// device does not answer.
    pub async fn request_gat_report(&self) -> String {
        self.request::<GatData>(&Command::RequestGatReport, self.options.extended_timeout)
            .await
            .map(|gat| gat.data)
            .unwrap_or_default()
    }

    /// Common reset checks: disable, firmware CRC, GAT report. Logs the
    /// first step that fails.
    pub async fn run_reset_checks(&self, seed: u32) -> bool {
        if !self.disable().await {
            tracing::warn!(device = %self.name, "Reset failed: device did not disable");
            return false;
        }
        if self.calculate_crc(seed).await == 0 {
            tracing::warn!(device = %self.name, seed, "Reset failed: CRC calculation");
            return false;
        }
        if self.request_gat_report().await.is_empty() {
            tracing::warn!(device = %self.name, "Reset failed: GAT report empty");
            return false;
        }
        true
    }
}
