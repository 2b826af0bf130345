//! DZRP TCP server: accept loop, frame reassembly and the host tick handle

use crate::commands::{dispatch, Flow};
use crate::config::ServerConfig;
use crate::error::Error;
use crate::fmt_hex;
use crate::machine::Machine;
use crate::session::Session;
use dzrp_protocol::{ProtocolError, Request, HEADER_LEN};
use log::{debug, error, info, trace, warn};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type SessionSlot = Arc<Mutex<Option<Session>>>;

fn lock(slot: &SessionSlot) -> MutexGuard<'_, Option<Session>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Serves one DeZog client at a time on a loopback port
pub struct DzrpServer {
    config: ServerConfig,
    machine: Arc<dyn Machine>,
    listener: TcpListener,
    session: SessionSlot,
    shutdown: Arc<AtomicBool>,
}

/// Host side of a running server: the tick and the shutdown switch
#[derive(Clone)]
pub struct ServerHandle {
    session: SessionSlot,
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Called by the host every frame or so. Reports CPU stops the emulator
    /// made on its own; does nothing while no client is connected.
    pub fn tick(&self) {
        let mut slot = lock(&self.session);
        let Some(session) = slot.as_mut() else {
            return;
        };
        if let Err(e) = session.tick() {
            error!(target: "dzrp", "tick failed, dropping connection: {}", e);
            *slot = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// Ask the server loop to exit
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl DzrpServer {
    /// Bind the configured loopback port
    pub fn bind(config: ServerConfig, machine: Arc<dyn Machine>) -> Result<Self, Error> {
        let addr = format!("127.0.0.1:{}", config.port);
        let listener = TcpListener::bind(&addr).map_err(|source| Error::Bind {
            addr: addr.clone(),
            source,
        })?;
        // Set non-blocking so we can check shutdown flag
        listener.set_nonblocking(true)?;

        Ok(DzrpServer {
            config,
            machine,
            listener,
            session: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            session: self.session.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run the server main loop until [`ServerHandle::shutdown`]
    pub fn run(&mut self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(target: "dzrp", "listening on {} (DeZog remote debugger)", addr),
            Err(e) => warn!(target: "dzrp", "listening on unknown address: {}", e),
        }

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, client_addr)) => {
                    info!(target: "dzrp", "connection from {}", client_addr);
                    if let Err(e) = self.handle_connection(stream) {
                        error!(target: "dzrp", "connection setup failed: {}", e);
                    }
                    *lock(&self.session) = None;
                    info!(target: "dzrp", "connection closed");
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No connection pending, sleep briefly
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!(target: "dzrp", "accept error: {}", e);
                }
            }
        }

        info!(target: "dzrp", "server shutdown");
    }

    /// Handle a single client connection
    fn handle_connection(&mut self, mut stream: TcpStream) -> Result<(), Error> {
        stream.set_nonblocking(false)?;
        // Set read timeout so the shutdown flag is seen
        stream.set_read_timeout(Some(Duration::from_millis(50)))?;
        stream.set_write_timeout(Some(Duration::from_millis(1000)))?;
        stream.set_nodelay(true)?;

        let writer = stream.try_clone()?;
        let mut session = Session::new(
            self.machine.clone(),
            Box::new(writer),
            self.config.state_timeout,
        );
        session.reset();
        *lock(&self.session) = Some(session);

        match self.serve(&mut stream) {
            Ok(()) | Err(ProtocolError::ConnectionClosed) => {}
            Err(e) => error!(target: "dzrp", "dropping connection: {}", e),
        }
        Ok(())
    }

    fn serve(&self, stream: &mut TcpStream) -> Result<(), ProtocolError> {
        let mut buffer = vec![0u8; 65536];
        let mut pending_data = Vec::new();

        while !self.shutdown.load(Ordering::Relaxed) {
            match stream.read(&mut buffer) {
                Ok(0) => {
                    debug!(target: "dzrp", "peer closed the connection");
                    return Err(ProtocolError::ConnectionClosed);
                }
                Ok(n) => {
                    trace!(target: "dzrp", "<- {}", fmt_hex(&buffer[..n]));
                    pending_data.extend_from_slice(&buffer[..n]);
                    if self.process(&mut pending_data)? == Flow::Close {
                        return Ok(());
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // the tick may have given up on this client
                    if lock(&self.session).is_none() {
                        return Err(ProtocolError::ConnectionClosed);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Dispatch every complete frame at the front of `pending_data`.
    ///
    /// Handlers answer before returning, so a response still owed when the
    /// next header is looked at means a handler returned without replying;
    /// that and a request numbered 0 both end the connection.
    fn process(&self, pending_data: &mut Vec<u8>) -> Result<Flow, ProtocolError> {
        let mut slot = lock(&self.session);
        let Some(session) = slot.as_mut() else {
            return Err(ProtocolError::ConnectionClosed);
        };

        while pending_data.len() >= HEADER_LEN {
            if let Some(seq) = session.owes_response() {
                return Err(ProtocolError::ResponseOwed(seq));
            }
            let Some((request, consumed)) =
                Request::decode(pending_data, self.config.max_frame_len)?
            else {
                break;
            };
            pending_data.drain(..consumed);

            // seq 0 is reserved for notifications
            if request.seq_num == 0 {
                return Err(ProtocolError::InvalidFormat(
                    "request with sequence number 0".to_string(),
                ));
            }
            if dispatch(session, &request, &self.config)? == Flow::Close {
                return Ok(Flow::Close);
            }
        }
        Ok(Flow::Continue)
    }
}
