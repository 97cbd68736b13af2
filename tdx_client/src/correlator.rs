//! Request/response correlation.
//!
//! [`Correlator::send`] stamps a request with a fresh id, registers a
//! one-shot waiter for it in the [`PendingTable`], writes the frame through a
//! [`FrameSink`] and blocks until the [`Dispatcher`](crate::dispatch::Dispatcher)
//! completes the waiter, the per-request timeout elapses, or the caller's
//! [`Abort`] fires.
//!
//! Completion is exactly-once: the reply channel has room for one value and
//! only the party that removed the pending entry may send on it.
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam_channel::{Receiver, at, bounded, select};
use log::debug;
use tdx_common::protocol::frame::{encode_request, hex};
use tdx_common::{Envelope, Request, Result, TdxError};

use crate::cancel::Abort;
use crate::pending::{Inflight, PendingTable, Reply};
use crate::response::{DecodeContext, Response};

/// Id carried by the handshake and heartbeat, which nobody waits for.
pub const RESERVED_ID: u32 = 0;

/// Outbound half of a transport.
///
/// `write_frame` must write the whole frame or fail; concurrent calls must
/// not interleave.
pub trait FrameSink: Send + Sync {
    /// Writes one complete frame.
    fn write_frame(&self, frame: &[u8]) -> Result<()>;

    /// Tears the transport down. Default: nothing to do.
    fn close(&self) {}

    /// `true` once no further frame can be written.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Encodes `request` under `id` into a complete wire frame.
pub fn frame_request(id: u32, request: &Request) -> Result<BytesMut> {
    let envelope = Envelope::new(id, request.msg_type.as_u16(), request.payload.clone());
    let mut frame = BytesMut::with_capacity(request.payload.len() + 12);
    encode_request(&envelope, &mut frame)?;
    Ok(frame)
}

/// Outbound side of the correlation engine, scoped to one connection.
pub struct Correlator {
    sink: Arc<dyn FrameSink>,
    pending: Arc<PendingTable>,
    next_id: AtomicU32,
    timeout: Duration,
    debug: bool,
}

impl Correlator {
    /// Correlator writing through `sink` and registering waiters in
    /// `pending`. Each request waits at most `timeout`.
    pub fn new(sink: Arc<dyn FrameSink>, pending: Arc<PendingTable>, timeout: Duration) -> Self {
        Self {
            sink,
            pending,
            next_id: AtomicU32::new(RESERVED_ID + 1),
            timeout,
            debug: false,
        }
    }

    /// Hex-dumps outgoing frames at debug level.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Table shared with the dispatcher.
    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    /// Whether the underlying transport is gone for good.
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Sends `request` and waits for its decoded response.
    ///
    /// `context` is handed to the decoder of this request's response. The
    /// pending entry is gone by the time this returns, whatever the outcome.
    pub fn send(
        &self,
        request: Request,
        context: Option<DecodeContext>,
        abort: &Abort,
    ) -> Result<Response> {
        abort.check()?;
        let (reply, waiter) = bounded(1);
        let id = self.register(Inflight::new(context, reply))?;

        let written = frame_request(id, &request).and_then(|frame| {
            if self.debug {
                debug!("-> id={} type={} frame={}", id, request.msg_type, hex(&frame));
            }
            self.sink.write_frame(&frame)
        });
        if let Err(e) = written {
            self.pending.remove(id)?;
            return Err(e);
        }
        debug!("{} request {} written", request.msg_type, id);

        self.wait(id, &waiter, abort)
    }

    /// Allocates the next free id and registers `inflight` under it.
    fn register(&self, mut inflight: Inflight) -> Result<u32> {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == RESERVED_ID {
                continue;
            }
            match self.pending.insert(id, inflight)? {
                None => return Ok(id),
                // wrapped onto a request that is still waiting
                Some(rejected) => inflight = rejected,
            }
        }
    }

    fn wait(&self, id: u32, waiter: &Receiver<Reply>, abort: &Abort) -> Result<Response> {
        let timeout_at = Instant::now() + self.timeout;
        let (cutoff, by_caller) = match abort.deadline() {
            Some(deadline) if deadline < timeout_at => (deadline, true),
            _ => (timeout_at, false),
        };
        let cancelled = abort.signal();

        let failure = select! {
            recv(waiter) -> reply => {
                return reply.unwrap_or_else(|_| {
                    Err(TdxError::ConnectionClosed(format!("waiter {} abandoned", id)))
                });
            }
            recv(cancelled) -> _ => TdxError::Cancelled(format!("request {} cancelled", id)),
            recv(at(cutoff)) -> _ => {
                if by_caller {
                    TdxError::Cancelled(format!("deadline reached waiting for request {}", id))
                } else {
                    TdxError::Timeout { id, timeout: self.timeout }
                }
            }
        };

        if self.pending.remove(id)? {
            debug!("request {} given up: {}", id, failure);
            return Err(failure);
        }
        // Lost the race: whoever removed the entry is completing it now.
        match waiter.recv() {
            Ok(reply) => reply,
            Err(_) => Err(failure),
        }
    }

    /// Fails every waiter and closes the sink.
    pub fn close(&self, reason: &str) {
        self.sink.close();
        let failed = self.pending.fail_all(reason);
        if failed > 0 {
            debug!("{} pending requests failed on close", failed);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cancel::Cancel;
    use crate::dispatch::Dispatcher;
    use bytes::BufMut;
    use crossbeam_channel::Sender;
    use std::sync::Mutex;
    use std::thread;
    use tdx_common::protocol::MessageType;
    use tdx_common::protocol::frame::decode_request;
    use tdx_common::protocol::message::StockCountMsg;
    use tdx_common::Exchange;

    /// Hands every written frame, decoded, to a test-controlled channel.
    pub(crate) struct ChannelSink {
        frames: Sender<Envelope>,
        refuse: bool,
        closed: Mutex<bool>,
    }

    impl ChannelSink {
        pub(crate) fn new(frames: Sender<Envelope>) -> Self {
            Self { frames, refuse: false, closed: Mutex::new(false) }
        }

        fn refusing(frames: Sender<Envelope>) -> Self {
            Self { frames, refuse: true, closed: Mutex::new(false) }
        }
    }

    impl FrameSink for ChannelSink {
        fn write_frame(&self, frame: &[u8]) -> Result<()> {
            if self.refuse || *self.closed.lock()? {
                return Err(TdxError::ConnectionClosed("sink refused".to_string()));
            }
            let mut buf = BytesMut::from(frame);
            let envelope = decode_request(&mut buf)?
                .ok_or_else(|| TdxError::Framing("partial frame".to_string()))?;
            self.frames
                .send(envelope)
                .map_err(|e| TdxError::ChannelSend(e.to_string()))
        }

        fn close(&self) {
            if let Ok(mut closed) = self.closed.lock() {
                *closed = true;
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.lock().map(|closed| *closed).unwrap_or(true)
        }
    }

    pub(crate) fn count_payload(count: u16) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16_le(count);
        buf.to_vec()
    }

    fn correlator(timeout: Duration) -> (Arc<Correlator>, Dispatcher, Receiver<Envelope>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pending = Arc::new(PendingTable::new());
        let dispatcher = Dispatcher::new(pending.clone(), false);
        let correlator = Correlator::new(Arc::new(ChannelSink::new(tx)), pending, timeout);
        (Arc::new(correlator), dispatcher, rx)
    }

    #[test]
    fn concurrent_callers_each_get_their_own_response() {
        const CALLERS: u16 = 16;
        let (correlator, dispatcher, frames) = correlator(Duration::from_secs(5));

        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                let correlator = correlator.clone();
                thread::spawn(move || {
                    correlator.send(StockCountMsg::request(Exchange::Sz), None, &Abort::none())
                })
            })
            .collect();

        // Answer every request, newest first, echoing the id as the count.
        let mut requests: Vec<Envelope> = (0..CALLERS).map(|_| frames.recv().unwrap()).collect();
        requests.reverse();
        let mut expected = Vec::new();
        for request in requests {
            let count = request.id as u16;
            expected.push(count);
            dispatcher.dispatch(Envelope::new(
                request.id,
                MessageType::StockCount.as_u16(),
                count_payload(count),
            ));
        }

        let mut got: Vec<u16> = callers
            .into_iter()
            .map(|h| h.join().unwrap().unwrap().into_stock_count().unwrap().count)
            .collect();
        got.sort_unstable();
        expected.sort_unstable();
        assert_eq!(got, expected);
        assert!(correlator.pending().is_empty());
    }

    #[test]
    fn timeout_removes_the_pending_entry() {
        let (correlator, _dispatcher, frames) = correlator(Duration::from_millis(50));
        for _ in 0..3 {
            let err = correlator
                .send(StockCountMsg::request(Exchange::Sh), None, &Abort::none())
                .unwrap_err();
            assert!(matches!(err, TdxError::Timeout { .. }));
        }
        assert_eq!(frames.len(), 3);
        assert!(correlator.pending().is_empty());
    }

    #[test]
    fn ids_skip_the_reserved_value_and_never_repeat() {
        let (correlator, _dispatcher, frames) = correlator(Duration::from_millis(20));
        correlator.next_id.store(u32::MAX, Ordering::Relaxed);
        for _ in 0..2 {
            let _ = correlator.send(StockCountMsg::request(Exchange::Sz), None, &Abort::none());
        }
        let ids: Vec<u32> = frames.try_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![u32::MAX, 1]);
    }

    #[test]
    fn write_failure_leaves_no_entry_behind() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let pending = Arc::new(PendingTable::new());
        let correlator = Correlator::new(
            Arc::new(ChannelSink::refusing(tx)),
            pending.clone(),
            Duration::from_secs(5),
        );
        let err = correlator
            .send(StockCountMsg::request(Exchange::Sz), None, &Abort::none())
            .unwrap_err();
        assert!(matches!(err, TdxError::ConnectionClosed(_)));
        assert!(pending.is_empty());
    }

    #[test]
    fn cancel_interrupts_the_wait_and_cleans_up() {
        let (correlator, _dispatcher, frames) = correlator(Duration::from_secs(30));
        let cancel = Cancel::new();
        let abort = Abort::none().with_cancel(cancel.clone());

        let waiter = {
            let correlator = correlator.clone();
            thread::spawn(move || {
                correlator.send(StockCountMsg::request(Exchange::Sz), None, &abort)
            })
        };
        frames.recv().unwrap();
        cancel.cancel();

        assert!(waiter.join().unwrap().unwrap_err().is_cancelled());
        assert!(correlator.pending().is_empty());
    }

    #[test]
    fn close_fails_waiting_callers() {
        let (correlator, _dispatcher, frames) = correlator(Duration::from_secs(30));
        let waiter = {
            let correlator = correlator.clone();
            thread::spawn(move || {
                correlator.send(StockCountMsg::request(Exchange::Sz), None, &Abort::none())
            })
        };
        frames.recv().unwrap();
        assert!(!correlator.is_closed());
        correlator.close("shutting down");
        assert!(correlator.is_closed());
        assert!(matches!(
            waiter.join().unwrap().unwrap_err(),
            TdxError::ConnectionClosed(_)
        ));

        let after = correlator.send(StockCountMsg::request(Exchange::Sz), None, &Abort::none());
        assert!(matches!(after.unwrap_err(), TdxError::ConnectionClosed(_)));
    }
}
