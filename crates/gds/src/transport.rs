//! Transport boundary.
//!
//! The engine never opens physical ports. It is handed a [`Transport`]
//! for outbound frames and a channel of [`TransportEvent`]s for inbound
//! traffic. [`ChannelTransport`] is an in-memory implementation used by
//! simulators and tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::configuration::DeviceConfiguration;
use crate::{GdsError, Result};

/// Inbound traffic from the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete, still-encoded report frame.
    Frame(Vec<u8>),
    /// The link to the peripheral was lost.
    Disconnected,
}

/// Full-duplex message channel to one peripheral.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Queue one encoded frame for transmission. Must not block.
    fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Raw identification strings read from the peripheral descriptor.
    fn configuration(&self) -> DeviceConfiguration {
        DeviceConfiguration::default()
    }
}

/// Peripheral side of a [`ChannelTransport`].
pub struct DeviceEnd {
    /// Encoded command frames written by the engine.
    pub commands: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Inbound events delivered to the engine's reader.
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl DeviceEnd {
    /// Deliver an encoded report frame to the engine.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.events
            .send(TransportEvent::Frame(frame))
            .map_err(|_| GdsError::Transport("engine reader closed".into()))
    }

    /// Signal loss of the link.
    pub fn drop_link(&self) {
        let _ = self.events.send(TransportEvent::Disconnected);
    }
}

/// In-memory transport backed by unbounded tokio channels.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    connected: AtomicBool,
    configuration: DeviceConfiguration,
}

impl ChannelTransport {
    /// Create a transport, the receiver the engine reads inbound events
    /// from, and the peripheral's end of the link.
    pub fn pair(
        configuration: DeviceConfiguration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>, DeviceEnd) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx: cmd_tx,
            connected: AtomicBool::new(false),
            configuration,
        };
        let device = DeviceEnd {
            commands: cmd_rx,
            events: event_tx,
        };
        (transport, event_rx, device)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<()> {
        if self.tx.is_closed() {
            return Err(GdsError::Transport("peripheral end dropped".into()));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn send(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(GdsError::NotConnected);
        }
        self.tx
            .send(frame)
            .map_err(|_| GdsError::Transport("peripheral end dropped".into()))
    }

    fn configuration(&self) -> DeviceConfiguration {
        self.configuration.clone()
    }
}
