//! Routes each inbound envelope to the waiter that sent its request.
//!
//! Runs on the connection's single read flow, one envelope at a time. The
//! decoder call sits behind `catch_unwind` so that a decoder panic on one
//! malformed payload is logged and reported to that envelope's waiter while
//! the read flow carries on.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, warn};
use tdx_common::protocol::MessageType;
use tdx_common::protocol::frame::hex;
use tdx_common::{Envelope, Result, TdxError};

use crate::panic::panic_message;
use crate::pending::PendingTable;
use crate::response::{DecodeContext, Response, decode_payload};

/// Turns a payload of a known type into its typed value.
pub(crate) type Decoder =
    fn(MessageType, &[u8], Option<&DecodeContext>) -> Result<Option<Response>>;

/// What became of one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A waiter received a value or a decode error.
    Delivered,
    /// Handshake or heartbeat acknowledgement; nobody is waiting for it.
    Acknowledged,
    /// No waiter holds this id; the envelope was dropped.
    Unsolicited,
    /// The type tag is not one this client knows; the envelope was dropped.
    UnknownType,
}

/// Inbound side of the correlation engine.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pending: Arc<PendingTable>,
    decode: Decoder,
    debug: bool,
}

impl Dispatcher {
    /// Dispatcher completing waiters registered in `pending`.
    pub fn new(pending: Arc<PendingTable>, debug: bool) -> Self {
        Self {
            pending,
            decode: decode_payload,
            debug,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_decoder(mut self, decode: Decoder) -> Self {
        self.decode = decode;
        self
    }

    /// Table this dispatcher takes entries from.
    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// Handles one envelope.
    ///
    /// An unknown type tag leaves the pending entry in place: its waiter is
    /// not completed and will time out. Acknowledgements never touch the
    /// table.
    pub fn dispatch(&self, envelope: Envelope) -> Dispatched {
        if self.debug {
            debug!(
                "<- id={} type=0x{:04X} payload={}",
                envelope.id,
                envelope.msg_type,
                hex(&envelope.payload)
            );
        }

        let Some(kind) = envelope.kind() else {
            error!(
                "{} (id {}, {} byte payload)",
                TdxError::UnknownMessageType(envelope.msg_type),
                envelope.id,
                envelope.payload.len()
            );
            return Dispatched::UnknownType;
        };

        if matches!(kind, MessageType::Connect | MessageType::Heartbeat) {
            debug!("{} acknowledged (id {})", kind, envelope.id);
            return Dispatched::Acknowledged;
        }

        let inflight = match self.pending.take(envelope.id) {
            Ok(Some(inflight)) => inflight,
            Ok(None) => {
                warn!("Dropping unsolicited {} response with id {}", kind, envelope.id);
                return Dispatched::Unsolicited;
            }
            Err(e) => {
                error!("Pending table unavailable: {}", e);
                return Dispatched::Unsolicited;
            }
        };

        let payload = envelope.payload;
        let context = inflight.context.as_ref();
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.decode)(kind, &payload, context)
        }));

        let reply = match decoded {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(TdxError::decode(format!("{} carries no value", kind))),
            Ok(Err(e)) => {
                debug!("{} response {} failed to decode: {}", kind, envelope.id, e);
                Err(e)
            }
            Err(payload) => {
                let msg = panic_message(payload);
                error!("{} decoder panicked on id {}: {}", kind, envelope.id, msg);
                Err(TdxError::decode(format!("{} decoder panicked: {}", kind, msg)))
            }
        };
        inflight.complete(reply);
        Dispatched::Delivered
    }
}
