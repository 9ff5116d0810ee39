//! Connection lifecycle for the crow serial device.
//!
//! [`ConnectionManager::listen`] is the outermost control loop of the client:
//!
//! ```text
//! Idle ─► Discovering ─► Open ─► Closed ─┐
//!              ▲            │            │
//!              └── delay ◄──┴────────────┘
//! ```
//!
//! Discovery or open failures and lost connections all lead to the same
//! retry delay. The loop never gives up on its own; it ends only when the
//! [`Shutdown`] token fires, which is a clean exit rather than a failure.
//!
//! While a connection is open a blocking reader task owns the read half of
//! the port together with a fresh [`LineFramer`]. The port's short read
//! timeout lets that task notice shutdown between reads.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serialport::SerialPortType;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use super::framing::LineFramer;
use super::router::Pipeline;
use super::writer::OutputWriter;
use super::CrowError;

/// USB vendor ID of crow (STMicroelectronics).
pub const CROW_VID: u16 = 0x0483;
/// USB product ID of crow (virtual COM port).
pub const CROW_PID: u16 = 0x5740;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bytes requested per read call.
const READ_CHUNK: usize = 1024;

// =============================================================================
// Transport
// =============================================================================

/// Both halves of an open device.
pub struct SerialLink {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Finds and opens the device.
///
/// `SerialTransport` is the real implementation; tests substitute scripted
/// transports.
pub trait Transport: Send {
    /// Resolve the device path to connect to.
    fn discover(&mut self) -> Result<String, CrowError>;

    /// Open the device at `path`.
    fn open(&mut self, path: &str) -> Result<SerialLink, CrowError>;
}

/// Serial port parameters and the identity used for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub vid: u16,
    pub pid: u16,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    /// Fixed device path. Skips discovery when set.
    pub port: Option<String>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            vid: CROW_VID,
            pid: CROW_PID,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            port: None,
        }
    }
}

/// [`Transport`] backed by the `serialport` crate.
#[derive(Debug, Clone, Default)]
pub struct SerialTransport {
    settings: SerialSettings,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl Transport for SerialTransport {
    fn discover(&mut self) -> Result<String, CrowError> {
        if let Some(port) = &self.settings.port {
            return Ok(port.clone());
        }

        let ports = serialport::available_ports().map_err(CrowError::Enumerate)?;
        for port in ports {
            let SerialPortType::UsbPort(usb) = &port.port_type else {
                debug!(port = %port.port_name, "skipping non-USB port");
                continue;
            };
            info!(
                port = %port.port_name,
                "comport - USB VID:PID={:04X}:{:04X}",
                usb.vid,
                usb.pid
            );
            if usb.vid == self.settings.vid && usb.pid == self.settings.pid {
                info!(port = %port.port_name, "using");
                return Ok(port.port_name);
            }
        }

        Err(CrowError::DeviceNotFound)
    }

    fn open(&mut self, path: &str) -> Result<SerialLink, CrowError> {
        let port = serialport::new(path, self.settings.baud_rate)
            .timeout(self.settings.read_timeout)
            .open()
            .map_err(|source| CrowError::Open {
                path: path.to_string(),
                source,
            })?;
        let writer = port.try_clone().map_err(|source| CrowError::Open {
            path: path.to_string(),
            source,
        })?;

        Ok(SerialLink {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Fires a [`Shutdown`] token.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation token for the listen loop and its reader.
///
/// Dropping the trigger counts as firing it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Non-blocking check, usable from the blocking reader thread.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until the token fires.
    pub async fn triggered(&mut self) {
        // An error means the trigger is gone, which is also a shutdown.
        let _ = self.rx.wait_for(|&stop| stop).await;
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

// =============================================================================
// Connection State & Callbacks
// =============================================================================

/// Metadata handed to the connect callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub port: String,
}

/// Why an open connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The port reported end of stream; the device went away.
    Eof,
    /// A read failed.
    Io(String),
    /// The listen loop was cancelled.
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Eof => f.write_str("device closed the connection"),
            DisconnectReason::Io(msg) => write!(f, "read error: {}", msg),
            DisconnectReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Discovering,
    Open(ConnectionInfo),
    Closed,
}

type ConnectCallback = Box<dyn Fn(&ConnectionInfo) + Send + Sync>;
type DisconnectCallback = Box<dyn Fn(&DisconnectReason) + Send + Sync>;

/// Lifecycle callbacks. Both default to no-ops.
pub struct ConnectionEvents {
    on_connect: ConnectCallback,
    on_disconnect: DisconnectCallback,
}

impl Default for ConnectionEvents {
    fn default() -> Self {
        Self {
            on_connect: Box::new(|_| {}),
            on_disconnect: Box::new(|_| {}),
        }
    }
}

impl ConnectionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        self.on_connect = Box::new(f);
        self
    }

    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.on_disconnect = Box::new(f);
        self
    }
}

/// Retry timing for the listen loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// How one connection attempt ended, when it got as far as opening.
enum SessionEnd {
    Closed,
    Shutdown,
}

/// Discovers, opens and supervises the crow connection.
///
/// The manager is the only owner of connection state. At most one
/// connection is open at a time: a new attempt starts only after the
/// previous reader has finished.
pub struct ConnectionManager<T> {
    transport: Arc<Mutex<T>>,
    pipeline: Arc<Pipeline>,
    writer: OutputWriter,
    events: ConnectionEvents,
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u64,
    span: tracing::Span,
}

impl<T: Transport + 'static> ConnectionManager<T> {
    pub fn new(transport: T, pipeline: Pipeline, writer: OutputWriter) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            pipeline: Arc::new(pipeline),
            writer,
            events: ConnectionEvents::default(),
            policy: ReconnectPolicy::default(),
            state: ConnectionState::Idle,
            attempts: 0,
            span: tracing::info_span!("crow"),
        }
    }

    pub fn with_events(mut self, events: ConnectionEvents) -> Self {
        self.events = events;
        self
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Log inside `span` instead of the default one.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Number of discovery attempts so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Connect and reconnect until `shutdown` fires.
    pub async fn listen(&mut self, shutdown: Shutdown) {
        let span = self.span.clone();
        self.listen_loop(shutdown).instrument(span).await
    }

    async fn listen_loop(&mut self, mut shutdown: Shutdown) {
        while !shutdown.is_triggered() {
            match self.run_session(&shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => {}
                Err(_) if shutdown.is_triggered() => break,
                Err(e) => warn!(error = %e, attempt = self.attempts, "connection attempt failed"),
            }

            debug!(delay_ms = self.policy.retry_delay.as_millis() as u64, "waiting to retry");
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(self.policy.retry_delay) => {}
            }
        }

        self.writer.detach();
        self.set_state(ConnectionState::Idle);
        info!("listener stopped");
    }

    /// One pass through Discovering, Open and Closed.
    async fn run_session(&mut self, shutdown: &Shutdown) -> Result<SessionEnd, CrowError> {
        self.attempts += 1;
        self.set_state(ConnectionState::Discovering);

        // Discovery and open block on the OS; keep them off the async task
        // so shutdown can interrupt a slow attempt.
        let transport = Arc::clone(&self.transport);
        let span = tracing::Span::current();
        let connect = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let mut transport = transport.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let path = transport.discover()?;
            let link = transport.open(&path)?;
            Ok::<_, CrowError>((path, link))
        });

        let mut cancel = shutdown.clone();
        let opened = tokio::select! {
            _ = cancel.triggered() => {
                debug!("shutdown during connection attempt");
                self.set_state(ConnectionState::Closed);
                return Ok(SessionEnd::Shutdown);
            }
            joined = connect => joined.unwrap_or_else(|e| {
                Err(CrowError::Io(std::io::Error::other(format!("connect task failed: {}", e))))
            }),
        };
        let (port, link) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                return Err(e);
            }
        };

        let info = ConnectionInfo { port };
        self.writer.attach(link.writer);
        self.set_state(ConnectionState::Open(info.clone()));
        info!(port = %info.port, "connected");
        (self.events.on_connect)(&info);

        let pipeline = Arc::clone(&self.pipeline);
        let reader_shutdown = shutdown.clone();
        let span = tracing::Span::current();
        let reader = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            read_loop(link.reader, &pipeline, &reader_shutdown)
        });
        let reason = reader
            .await
            .unwrap_or_else(|e| DisconnectReason::Io(format!("reader task failed: {}", e)));

        self.writer.detach();
        self.set_state(ConnectionState::Closed);
        match &reason {
            DisconnectReason::Shutdown => info!(port = %info.port, "connection closed"),
            reason => warn!(port = %info.port, %reason, "connection lost"),
        }
        (self.events.on_disconnect)(&reason);

        Ok(match reason {
            DisconnectReason::Shutdown => SessionEnd::Shutdown,
            _ => SessionEnd::Closed,
        })
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "state");
            self.state = state;
        }
    }
}

/// Feed the port into a fresh framer until the port fails or shutdown.
///
/// Packets are routed in the order their bytes arrived.
fn read_loop(
    mut reader: Box<dyn Read + Send>,
    pipeline: &Pipeline,
    shutdown: &Shutdown,
) -> DisconnectReason {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        if shutdown.is_triggered() {
            return DisconnectReason::Shutdown;
        }

        match reader.read(&mut buf) {
            Ok(0) => return DisconnectReason::Eof,
            Ok(n) => {
                for packet in framer.feed(&buf[..n]) {
                    let _ = pipeline.handle_packet(&packet);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => return DisconnectReason::Io(e.to_string()),
        }
    }
}
