//! TCP listener accepting simulator clients.
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::{debug, error, info};
use tdx_common::Result;

use crate::config::SimConfig;
use crate::model::activity::ActivityMonitor;
use crate::model::generator::MarketGenerator;
use crate::session::serve_client;

/// Bound simulator, not yet accepting.
pub struct SimServer {
    listener: TcpListener,
    market: Arc<MarketGenerator>,
    monitor: Arc<Mutex<ActivityMonitor>>,
    stopping: Arc<AtomicBool>,
}

impl SimServer {
    /// Binds the listening socket, e.g. `127.0.0.1:0` for an ephemeral port.
    pub fn bind(addr: &str, config: SimConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let monitor = ActivityMonitor::new(config.idle_timeout);
        Ok(Self {
            listener,
            market: Arc::new(MarketGenerator::new(config)),
            monitor: Arc::new(Mutex::new(monitor)),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients until stopped, one thread per client.
    pub fn run(self) -> Result<()> {
        self.serve(None)
    }

    /// Runs the accept loop on a background thread.
    pub fn spawn(self) -> Result<SimHandle> {
        let addr = self.local_addr()?;
        let monitor = self.monitor.clone();
        let stopping = self.stopping.clone();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name(format!("tdx-sim-{}", addr))
            .spawn(move || {
                if let Err(e) = self.serve(Some(stop_rx)) {
                    error!("Simulator on {} failed: {}", addr, e);
                }
            })?;
        Ok(SimHandle {
            addr,
            monitor,
            stopping,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn serve(self, stop: Option<Receiver<()>>) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Simulator listening on {}", addr);
        let reaper = self.market.config().idle_timeout.map(|timeout| {
            let monitor = self.monitor.clone();
            let stop = stop.clone().unwrap_or_else(crossbeam_channel::never);
            thread::spawn(move || reap_idle(monitor, timeout, stop))
        });

        for stream in self.listener.incoming() {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => self.accept(stream),
                Err(e) => error!("Accept on {} failed: {}", addr, e),
            }
        }

        if let Some(reaper) = reaper {
            let _ = reaper.join();
        }
        info!("Simulator on {} stopped", addr);
        Ok(())
    }

    fn accept(&self, stream: TcpStream) {
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                error!("Client address unavailable: {}", e);
                return;
            }
        };
        info!("Client {} connected", peer);
        if let Err(e) = self.track(peer, &stream) {
            error!("Cannot track client {}: {}", peer, e);
            return;
        }

        let market = self.market.clone();
        let monitor = self.monitor.clone();
        thread::spawn(move || {
            if let Err(e) = serve_client(stream, peer, market, monitor.clone()) {
                debug!("Session with {} ended: {}", peer, e);
            }
            if let Ok(mut monitor) = monitor.lock() {
                monitor.remove(&peer);
            }
        });
    }

    fn track(&self, peer: SocketAddr, stream: &TcpStream) -> Result<()> {
        let handle = stream.try_clone()?;
        self.monitor.lock()?.register(peer, handle);
        Ok(())
    }
}

fn reap_idle(monitor: Arc<Mutex<ActivityMonitor>>, timeout: Duration, stop: Receiver<()>) {
    let interval = (timeout / 4).max(Duration::from_millis(10));
    loop {
        select! {
            recv(stop) -> _ => break,
            default(interval) => {}
        }
        if let Ok(mut monitor) = monitor.lock() {
            monitor.reap();
        }
    }
}

/// Handle to a simulator running in the background.
pub struct SimHandle {
    addr: SocketAddr,
    monitor: Arc<Mutex<ActivityMonitor>>,
    stopping: Arc<AtomicBool>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SimHandle {
    /// Address clients should dial.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connected clients.
    pub fn clients(&self) -> usize {
        self.monitor.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Drops every connected client, as a server restart would.
    pub fn disconnect_all(&self) -> usize {
        self.monitor.lock().map(|mut m| m.disconnect_all()).unwrap_or(0)
    }

    /// Stops accepting, disconnects every client and waits for the loop.
    pub fn stop(&mut self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.take();
        // wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        self.disconnect_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::io::Write;
    use tdx_common::protocol::frame::{decode_response, encode_request};
    use tdx_common::protocol::message::StockCountMsg;
    use tdx_common::protocol::{FrameReader, MessageType};
    use tdx_common::{Envelope, Exchange};

    fn send(stream: &mut TcpStream, id: u32, kind: MessageType, payload: &[u8]) {
        let mut buf = BytesMut::new();
        encode_request(&Envelope::new(id, kind.as_u16(), payload.to_vec()), &mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    }

    #[test]
    fn answers_echo_the_request_id() {
        let sim = SimServer::bind("127.0.0.1:0", SimConfig::default()).unwrap().spawn().unwrap();
        let mut stream = TcpStream::connect(sim.addr()).unwrap();
        let req = StockCountMsg::request(Exchange::Sh);
        send(&mut stream, 41, req.msg_type, &req.payload);

        let mut reader = FrameReader::responses(stream);
        let answer = reader.read_frame().unwrap();
        assert_eq!(answer.id, 41);
        assert_eq!(answer.kind(), Some(MessageType::StockCount));
        assert_eq!(&answer.payload[..], &1500u16.to_le_bytes());
    }

    #[test]
    fn silent_types_get_no_answer_but_the_session_continues() {
        let config = SimConfig::default().silent(MessageType::StockCount);
        let sim = SimServer::bind("127.0.0.1:0", config).unwrap().spawn().unwrap();
        let mut stream = TcpStream::connect(sim.addr()).unwrap();
        let req = StockCountMsg::request(Exchange::Sz);
        send(&mut stream, 1, req.msg_type, &req.payload);
        send(&mut stream, 2, MessageType::Heartbeat, &[]);

        let mut reader = FrameReader::responses(stream);
        let answer = reader.read_frame().unwrap();
        assert_eq!((answer.id, answer.kind()), (2, Some(MessageType::Heartbeat)));
    }

    #[test]
    fn large_answers_are_compressed() {
        let config = SimConfig::default().compress_over(64);
        let sim = SimServer::bind("127.0.0.1:0", config).unwrap().spawn().unwrap();
        let mut stream = TcpStream::connect(sim.addr()).unwrap();
        send(&mut stream, 3, MessageType::StockList, &[0, 0, 0, 0]);

        let mut raw = BytesMut::new();
        let mut chunk = [0u8; 4096];
        let envelope = loop {
            let n = std::io::Read::read(&mut stream, &mut chunk).unwrap();
            assert!(n > 0);
            raw.extend_from_slice(&chunk[..n]);
            if raw.len() >= 16 {
                let zip_len = u16::from_le_bytes([raw[12], raw[13]]);
                let len = u16::from_le_bytes([raw[14], raw[15]]);
                assert!(zip_len < len);
            }
            if let Some(envelope) = decode_response(&mut raw).unwrap() {
                break envelope;
            }
        };
        assert_eq!(envelope.payload.len(), 2 + 1000 * 29);
    }

    #[test]
    fn disconnect_all_drops_clients() {
        let sim = SimServer::bind("127.0.0.1:0", SimConfig::default()).unwrap().spawn().unwrap();
        let stream = TcpStream::connect(sim.addr()).unwrap();
        let mut reader = FrameReader::responses(stream.try_clone().unwrap());
        let mut writer = stream;
        send(&mut writer, 1, MessageType::Heartbeat, &[]);
        reader.read_frame().unwrap();

        assert_eq!(sim.disconnect_all(), 1);
        assert!(reader.read_frame().is_err());
    }
}
