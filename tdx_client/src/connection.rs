//! TCP transport for one server connection.
//!
//! Opening a [`Connection`] dials the server, writes the handshake, and
//! starts two threads: a reader that deframes inbound envelopes and hands
//! them to the [`Dispatcher`] in arrival order, and a keepalive that writes a
//! heartbeat whenever nothing has been written for the configured idle
//! window. When the reader loses the socket every pending waiter is failed;
//! with redial enabled the reader then dials again and resumes.
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::{debug, error, info, warn};
use tdx_common::protocol::FrameReader;
use tdx_common::protocol::frame::hex;
use tdx_common::protocol::message::{Connect, Heartbeat};
use tdx_common::{Request, Result, TdxError};

use crate::config::ClientConfig;
use crate::correlator::{FrameSink, RESERVED_ID, frame_request};
use crate::dispatch::Dispatcher;

/// State shared by the caller-facing handle and the two threads.
struct Shared {
    addr: String,
    config: ClientConfig,
    writer: Mutex<Option<TcpStream>>,
    last_write: Mutex<Instant>,
    closed: AtomicBool,
    dispatcher: Dispatcher,
}

impl Shared {
    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TdxError::ConnectionClosed("client closed".to_string()));
        }
        let mut writer = self.writer.lock()?;
        let stream = writer
            .as_mut()
            .ok_or_else(|| TdxError::ConnectionClosed(format!("not connected to {}", self.addr)))?;
        stream.write_all(frame)?;
        *self.last_write.lock()? = Instant::now();
        Ok(())
    }

    fn write_request(&self, request: &Request) -> Result<()> {
        let frame = frame_request(RESERVED_ID, request)?;
        if self.config.debug {
            debug!("-> {} frame={}", request.msg_type, hex(&frame));
        }
        self.write_frame(&frame)
    }

    fn idle(&self) -> Duration {
        self.last_write
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_write.lock() {
            *last = Instant::now();
        }
    }

    /// Installs a freshly dialed stream and writes the handshake on it.
    /// Returns the read half.
    fn attach(&self, stream: TcpStream) -> Result<TcpStream> {
        let reader = stream.try_clone()?;
        {
            let mut writer = self.writer.lock()?;
            if self.closed.load(Ordering::SeqCst) {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(TdxError::ConnectionClosed("client closed".to_string()));
            }
            *writer = Some(stream);
        }
        self.write_request(&Connect::request())?;
        Ok(reader)
    }

    fn detach(&self) {
        let stream = match self.writer.lock() {
            Ok(mut writer) => writer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stream) = stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Live connection; dropping it closes the socket and stops its threads.
pub struct Connection {
    shared: Arc<Shared>,
    stopped: AtomicBool,
    shutdown: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Dials `addr`, performs the handshake and starts the reader and
    /// keepalive threads.
    pub fn open(addr: &str, config: ClientConfig, dispatcher: Dispatcher) -> Result<Self> {
        let stream = dial(addr, config.connect_timeout)?;
        let shared = Arc::new(Shared {
            addr: addr.to_string(),
            config,
            writer: Mutex::new(None),
            last_write: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            dispatcher,
        });
        let reader = shared.attach(stream)?;
        info!("Connected to {}", addr);

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let reader_thread = {
            let shared = shared.clone();
            let shutdown = shutdown_rx.clone();
            thread::Builder::new()
                .name(format!("tdx-reader-{}", addr))
                .spawn(move || read_loop(shared, reader, shutdown))?
        };
        let keepalive_thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("tdx-keepalive-{}", addr))
                .spawn(move || keepalive_loop(shared, shutdown_rx))?
        };

        Ok(Self {
            shared,
            stopped: AtomicBool::new(false),
            shutdown: Mutex::new(Some(shutdown_tx)),
            threads: Mutex::new(vec![reader_thread, keepalive_thread]),
        })
    }

    /// Address this connection dials.
    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    /// `true` once the client closed the connection, or once it was lost
    /// with redial disabled.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the socket, stops both threads and fails pending waiters.
    ///
    /// Still joins the threads when the reader already marked the
    /// connection closed after losing it.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!("Closing connection to {}", self.shared.addr);
        }
        if let Ok(mut shutdown) = self.shutdown.lock() {
            shutdown.take();
        }
        self.shared.detach();

        let threads = match self.threads.lock() {
            Ok(mut threads) => std::mem::take(&mut *threads),
            Err(_) => Vec::new(),
        };
        for handle in threads {
            if handle.join().is_err() {
                error!("Connection thread panicked");
            }
        }
        self.shared
            .dispatcher
            .pending()
            .fail_all("connection closed by client");
    }
}

impl FrameSink for Connection {
    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        self.shared.write_frame(frame)
    }

    fn close(&self) {
        self.shutdown();
    }

    fn is_closed(&self) -> bool {
        Connection::is_closed(self)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolves `addr` and connects to the first address that answers.
fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let mut last_err = None;
    for candidate in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Dial {} failed: {}", candidate, e);
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) => TdxError::Io(e),
        None => TdxError::ConnectionClosed(format!("{} resolved to no address", addr)),
    })
}

fn read_loop(shared: Arc<Shared>, mut stream: TcpStream, shutdown: Receiver<()>) {
    loop {
        let reason = pump(&shared, stream);
        shared.detach();
        let failed = shared.dispatcher.pending().fail_all(&reason);
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        if !shared.config.redial {
            warn!("Connection to {} lost: {} ({} requests failed)", shared.addr, reason, failed);
            shared.closed.store(true, Ordering::SeqCst);
            break;
        }
        warn!(
            "Connection to {} lost: {} ({} requests failed); redialing",
            shared.addr, reason, failed
        );
        match redial(&shared, &shutdown) {
            Some(next) => stream = next,
            None => break,
        }
    }
    debug!("Reader for {} stopped", shared.addr);
}

/// Feeds envelopes to the dispatcher until the stream fails. Returns why.
fn pump(shared: &Shared, stream: TcpStream) -> String {
    let mut reader = FrameReader::responses(stream);
    loop {
        match reader.read_frame() {
            Ok(envelope) => {
                shared.dispatcher.dispatch(envelope);
            }
            Err(TdxError::Decode(msg)) => error!("Dropping undecodable frame: {}", msg),
            Err(TdxError::ConnectionClosed(msg)) => return msg,
            Err(e) => return e.to_string(),
        }
    }
}

fn redial(shared: &Shared, shutdown: &Receiver<()>) -> Option<TcpStream> {
    loop {
        select! {
            recv(shutdown) -> _ => return None,
            default(shared.config.redial_interval) => {}
        }
        if shared.closed.load(Ordering::SeqCst) {
            return None;
        }
        match dial(&shared.addr, shared.config.connect_timeout).and_then(|s| shared.attach(s)) {
            Ok(reader) => {
                info!("Reconnected to {}", shared.addr);
                return Some(reader);
            }
            Err(e) => warn!("Redial to {} failed: {}", shared.addr, e),
        }
    }
}

fn keepalive_loop(shared: Arc<Shared>, shutdown: Receiver<()>) {
    let window = shared.config.keepalive;
    loop {
        let wait = window.saturating_sub(shared.idle());
        select! {
            recv(shutdown) -> _ => break,
            default(wait) => {}
        }
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        if shared.idle() < window {
            continue;
        }
        match shared.write_request(&Heartbeat::request()) {
            Ok(()) => debug!("Heartbeat sent to {}", shared.addr),
            Err(e) => {
                debug!("Heartbeat to {} skipped: {}", shared.addr, e);
                shared.touch();
            }
        }
    }
    debug!("Keepalive for {} stopped", shared.addr);
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;
    use crate::pending::PendingTable;

    fn wait_until(limit: Duration, check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn shutdown_after_loss_still_joins_both_threads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = ClientConfig::default().keepalive(Duration::from_millis(50));
        let dispatcher = Dispatcher::new(Arc::new(PendingTable::new()), false);

        let conn = Connection::open(&addr, config, dispatcher).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        drop(server_side);

        assert!(wait_until(Duration::from_secs(2), || conn.is_closed()));
        assert_eq!(conn.threads.lock().unwrap().len(), 2);

        conn.shutdown();
        assert!(conn.threads.lock().unwrap().is_empty());
        assert!(conn.shutdown.lock().unwrap().is_none());
        assert!(matches!(
            conn.write_frame(&[0x0C]),
            Err(TdxError::ConnectionClosed(_))
        ));
    }
}
