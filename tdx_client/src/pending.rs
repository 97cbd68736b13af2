//! Table of requests that are waiting for their response.
//!
//! Each entry owns the sending half of a one-shot reply channel. Whoever
//! removes the entry (the dispatcher on arrival, the waiter on timeout or
//! cancellation, or the connection on loss) is the only party that may use
//! it, so every waiter is completed at most once.
use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam_channel::Sender;
use log::debug;
use tdx_common::{Result, TdxError};

use crate::response::{DecodeContext, Response};

/// Completion of one request.
pub type Reply = Result<Response>;

/// What a waiter left behind for the dispatcher.
#[derive(Debug)]
pub struct Inflight {
    /// Context for the decoder, when the response needs one.
    pub context: Option<DecodeContext>,
    /// One-shot reply channel.
    pub reply: Sender<Reply>,
}

impl Inflight {
    /// Entry answering on `reply`.
    pub fn new(context: Option<DecodeContext>, reply: Sender<Reply>) -> Self {
        Self { context, reply }
    }

    /// Completes the waiter. A waiter that already gave up is not an error.
    pub fn complete(self, reply: Reply) {
        if self.reply.send(reply).is_err() {
            debug!("waiter went away before its reply was delivered");
        }
    }
}

/// Id-keyed table of in-flight requests.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<u32, Inflight>>,
}

impl PendingTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `inflight` under `id`.
    ///
    /// An occupied id is left untouched and `inflight` is handed back.
    pub fn insert(&self, id: u32, inflight: Inflight) -> Result<Option<Inflight>> {
        let mut entries = self.entries.lock()?;
        if entries.contains_key(&id) {
            return Ok(Some(inflight));
        }
        entries.insert(id, inflight);
        Ok(None)
    }

    /// Removes and returns the entry for `id`.
    pub fn take(&self, id: u32) -> Result<Option<Inflight>> {
        Ok(self.entries.lock()?.remove(&id))
    }

    /// Removes the entry for `id`, reporting whether one was present.
    pub fn remove(&self, id: u32) -> Result<bool> {
        Ok(self.take(id)?.is_some())
    }

    /// Whether a waiter is registered under `id`.
    pub fn contains(&self, id: u32) -> Result<bool> {
        Ok(self.entries.lock()?.contains_key(&id))
    }

    /// Number of waiting requests.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// `true` when nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the table and fails every waiter with
    /// [`TdxError::ConnectionClosed`]. Returns how many were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(u32, Inflight)> = match self.entries.lock() {
            Ok(mut entries) => entries.drain().collect(),
            Err(poisoned) => poisoned.into_inner().drain().collect(),
        };
        let failed = drained.len();
        for (id, inflight) in drained {
            debug!("failing pending request {}: {}", id, reason);
            inflight.complete(Err(TdxError::ConnectionClosed(reason.to_string())));
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use tdx_common::model::StockCount;

    fn inflight() -> (Inflight, crossbeam_channel::Receiver<Reply>) {
        let (tx, rx) = bounded(1);
        (Inflight::new(None, tx), rx)
    }

    #[test]
    fn occupied_ids_are_rejected_without_disturbing_the_owner() {
        let table = PendingTable::new();
        let (first, first_rx) = inflight();
        let (second, _second_rx) = inflight();
        assert!(table.insert(7, first).unwrap().is_none());
        assert!(table.insert(7, second).unwrap().is_some());

        table
            .take(7)
            .unwrap()
            .unwrap()
            .complete(Ok(Response::StockCount(StockCount { count: 3 })));
        let got = first_rx.recv().unwrap().unwrap();
        assert_eq!(got.into_stock_count().unwrap().count, 3);
    }

    #[test]
    fn an_entry_is_taken_once() {
        let table = PendingTable::new();
        let (entry, _rx) = inflight();
        assert!(table.insert(1, entry).unwrap().is_none());
        assert!(table.contains(1).unwrap());
        assert!(table.take(1).unwrap().is_some());
        assert!(table.take(1).unwrap().is_none());
        assert!(!table.remove(1).unwrap());
        assert!(table.is_empty());
    }

    #[test]
    fn fail_all_completes_every_waiter_and_empties_the_table() {
        let table = PendingTable::new();
        let receivers: Vec<_> = (1..=5)
            .map(|id| {
                let (entry, rx) = inflight();
                assert!(table.insert(id, entry).unwrap().is_none());
                rx
            })
            .collect();

        assert_eq!(table.fail_all("peer reset"), 5);
        assert!(table.is_empty());
        for rx in receivers {
            assert!(matches!(rx.recv().unwrap(), Err(TdxError::ConnectionClosed(_))));
        }
    }

    #[test]
    fn completing_a_departed_waiter_is_silent() {
        let (entry, rx) = inflight();
        drop(rx);
        entry.complete(Ok(Response::StockCount(StockCount { count: 0 })));
    }
}
