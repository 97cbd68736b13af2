//! Last-activity tracker for connected clients.
//!
//! Every session registers its socket here and touches its entry on each
//! request. A reaper periodically asks for clients idle past the timeout;
//! their sockets are shut down, which ends their sessions the same way a
//! server dropping a silent client would. The tracker is not synchronized;
//! share it behind a `Mutex`.
use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use log::{debug, info};

struct ClientConnection {
    last_seen: Instant,
    stream: TcpStream,
}

/// Connected clients keyed by peer address.
pub struct ActivityMonitor {
    clients: HashMap<SocketAddr, ClientConnection>,
    timeout: Option<Duration>,
}

impl ActivityMonitor {
    /// `timeout` of `None` never reaps anybody.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            clients: HashMap::new(),
            timeout,
        }
    }

    /// Starts tracking `stream`, a handle to the client's socket.
    pub fn register(&mut self, addr: SocketAddr, stream: TcpStream) {
        self.clients.insert(
            addr,
            ClientConnection {
                last_seen: Instant::now(),
                stream,
            },
        );
    }

    /// Records activity from `addr`.
    pub fn touch(&mut self, addr: &SocketAddr) {
        if let Some(client) = self.clients.get_mut(addr) {
            client.last_seen = Instant::now();
        }
    }

    /// Forgets `addr`.
    pub fn remove(&mut self, addr: &SocketAddr) {
        self.clients.remove(addr);
    }

    /// Tracked clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` when no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Disconnects and forgets every client idle past the timeout.
    pub fn reap(&mut self) -> Vec<SocketAddr> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let idle: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, c)| c.last_seen.elapsed() > timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &idle {
            if let Some(client) = self.clients.remove(addr) {
                info!("Disconnecting {}: idle for more than {:?}", addr, timeout);
                let _ = client.stream.shutdown(Shutdown::Both);
            }
        }
        idle
    }

    /// Disconnects every client. Returns how many there were.
    pub fn disconnect_all(&mut self) -> usize {
        let count = self.clients.len();
        for (addr, client) in self.clients.drain() {
            debug!("Disconnecting {}", addr);
            let _ = client.stream.shutdown(Shutdown::Both);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn idle_clients_are_reaped_and_disconnected() {
        let (mut client, server) = pair();
        let addr = client.local_addr().unwrap();
        let mut monitor = ActivityMonitor::new(Some(Duration::from_millis(30)));
        monitor.register(addr, server);
        assert!(monitor.reap().is_empty());

        thread::sleep(Duration::from_millis(60));
        assert_eq!(monitor.reap(), vec![addr]);
        assert!(monitor.is_empty());
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn touching_keeps_a_client_alive() {
        let (client, server) = pair();
        let addr = client.local_addr().unwrap();
        let mut monitor = ActivityMonitor::new(Some(Duration::from_millis(80)));
        monitor.register(addr, server);
        for _ in 0..3 {
            thread::sleep(Duration::from_millis(40));
            monitor.touch(&addr);
            assert!(monitor.reap().is_empty());
        }
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn without_a_timeout_nobody_is_reaped() {
        let (client, server) = pair();
        let mut monitor = ActivityMonitor::new(None);
        monitor.register(client.local_addr().unwrap(), server);
        assert!(monitor.reap().is_empty());
        assert_eq!(monitor.disconnect_all(), 1);
        assert!(monitor.is_empty());
    }
}
