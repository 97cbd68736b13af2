//! One client connection: read a request, write its answer, repeat.
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use log::{debug, info, warn};
use tdx_common::protocol::FrameReader;
use tdx_common::protocol::frame::encode_response;
use tdx_common::{Envelope, Result, TdxError};

use crate::model::activity::ActivityMonitor;
use crate::model::generator::MarketGenerator;
use crate::model::responder::respond;

/// Serves `stream` until the client goes away.
///
/// A request the simulator cannot parse is logged and left unanswered, so
/// the client's waiter times out; the session itself carries on.
pub fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    market: Arc<MarketGenerator>,
    monitor: Arc<Mutex<ActivityMonitor>>,
) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = FrameReader::requests(stream);
    let mut out = BytesMut::new();

    loop {
        let envelope = match reader.read_frame() {
            Ok(envelope) => envelope,
            Err(TdxError::ConnectionClosed(_)) => {
                info!("Client {} disconnected", peer);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        monitor.lock()?.touch(&peer);

        let Some(kind) = envelope.kind() else {
            warn!("{} sent unknown message type 0x{:04X}", peer, envelope.msg_type);
            continue;
        };
        if market.config().silent.contains(&kind) {
            debug!("Not answering {} request {} from {}", kind, envelope.id, peer);
            continue;
        }

        let payload = match respond(kind, &envelope.payload, &market) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Bad {} request {} from {}: {}", kind, envelope.id, peer, e);
                continue;
            }
        };
        let compress = payload.len() > market.config().compress_over;
        let answer = Envelope::new(envelope.id, envelope.msg_type, payload);
        out.clear();
        encode_response(&answer, compress, &mut out)?;
        writer.write_all(&out)?;
        debug!(
            "Answered {} request {} from {} ({} bytes{})",
            kind,
            envelope.id,
            peer,
            out.len(),
            if compress { ", compressed" } else { "" }
        );
    }
}
