//! Shared networking constants and helpers used by client and simulator.
use std::time::Duration;

/// Default TCP port of a quotation server.
pub const DEFAULT_PORT: u16 = 7709;

/// How long a request waits for its response unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Idle window after which a heartbeat frame is written.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Pause between redial attempts after the connection drops.
pub const DEFAULT_REDIAL_INTERVAL: Duration = Duration::from_secs(3);

/// Helper to format an IPv4 address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}

/// Appends [`DEFAULT_PORT`] when `raw` carries no port.
///
/// Bracketed IPv6 literals (`[::1]`) are handled; bare IPv6 literals are
/// assumed to already contain a port only if they are bracketed.
pub fn with_default_port(raw: &str) -> String {
    let raw = raw.trim();
    let has_port = match raw.rfind(']') {
        Some(end) => raw[end..].contains(':'),
        None => raw.contains(':'),
    };
    if has_port {
        raw.to_string()
    } else {
        addr(raw, DEFAULT_PORT)
    }
}
