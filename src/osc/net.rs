use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use rosc::{OscMessage, OscPacket};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

pub const OUTBOX_CAPACITY: usize = 1024;
const LISTEN_POLL: Duration = Duration::from_millis(100);

/// Bounded queue of outbound messages. Posting never blocks: when the queue is
/// full the message is dropped and logged, so timers and the scheduler cannot
/// stall on the network.
#[derive(Clone)]
pub struct OscOutbox {
    tx: Sender<OscMessage>,
}

impl OscOutbox {
    pub fn bounded(capacity: usize) -> (Self, Receiver<OscMessage>) {
        let (tx, rx) = crossbeam::channel::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn post(&self, message: OscMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(addr = %message.addr, "outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Disconnected(message)) => {
                debug!(addr = %message.addr, "no outbound sender attached");
                false
            }
        }
    }
}

/// Drains an outbox onto a UDP socket from its own thread. The thread ends once
/// every [`OscOutbox`] handle has been dropped.
pub struct OscSender {
    target: SocketAddr,
}

impl OscSender {
    pub fn spawn(host: &str, port: u16, rx: Receiver<OscMessage>) -> Result<Self> {
        let target = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| BridgeError::validation(format!("host '{host}'")))?;
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;

        std::thread::Builder::new()
            .name("osc-sender".into())
            .spawn(move || {
                for message in rx.iter() {
                    let addr = message.addr.clone();
                    match rosc::encoder::encode(&OscPacket::Message(message)) {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, target) {
                                warn!(%addr, error = %e, "failed to send OSC message");
                            }
                        }
                        Err(e) => warn!(%addr, error = ?e, "failed to encode OSC message"),
                    }
                }
                debug!("outbound OSC sender finished");
            })?;

        info!(%target, "sending OSC");
        Ok(Self { target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

/// Receives OSC packets on a UDP port and hands each to a callback on the
/// listener's own thread. Closing releases the port so it can be bound again.
pub struct OscListener {
    port: u16,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OscListener {
    pub fn bind<F>(port: u16, on_packet: F) -> Result<Self>
    where
        F: Fn(OscPacket) + Send + 'static,
    {
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse | ErrorKind::PermissionDenied => {
                BridgeError::Resource(format!("UDP port {port}: {e}"))
            }
            _ => BridgeError::Io(e),
        })?;
        socket.set_read_timeout(Some(LISTEN_POLL))?;
        let port = socket.local_addr()?.port();

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let handle = std::thread::Builder::new()
            .name("osc-listener".into())
            .spawn(move || {
                let mut buf = [0u8; rosc::decoder::MTU];
                while thread_running.load(Ordering::Acquire) {
                    match socket.recv_from(&mut buf) {
                        Ok((size, from)) => match rosc::decoder::decode_udp(&buf[..size]) {
                            Ok((_, packet)) => on_packet(packet),
                            Err(e) => warn!(%from, error = ?e, "dropping malformed OSC packet"),
                        },
                        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        }
                        Err(e) => warn!(error = %e, "OSC receive failed"),
                    }
                }
            })?;

        info!(port, "listening for OSC");
        Ok(Self {
            port,
            running,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            // a callback may drop the last owner from the listener thread itself
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
            info!(port = self.port, "OSC listener closed");
        }
    }
}

impl Drop for OscListener {
    fn drop(&mut self) {
        self.close();
    }
}
