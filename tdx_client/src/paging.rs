//! Multi-page "fetch all" aggregation.
//!
//! Pages are requested strictly one after another with a growing start
//! offset. The loop ends on the first page shorter than the page size; that
//! page is still kept. Any page error discards everything gathered so far.
//!
//! Tick-level aggregates are taken from a live source across several round
//! trips, so trades printed while the loop runs can be missed or repeated.
use log::{debug, warn};
use tdx_common::Result;

use crate::cancel::Abort;

/// How a newly fetched page joins the pages before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulate {
    /// After: the server pages forward.
    Append,
    /// Before: the server pages backward from the latest entry.
    Prepend,
}

/// Page loop for one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: u16,
    order: Accumulate,
}

impl Paginator {
    /// Loop requesting `page_size` items per page.
    pub fn new(page_size: u16, order: Accumulate) -> Self {
        Self { page_size, order }
    }

    /// Runs the loop.
    ///
    /// `fetch(start, count)` requests one page. After each page, `stitch`
    /// gets the previously fetched page and the one just fetched, so fields
    /// that straddle a page boundary can be filled in. `abort` is checked
    /// before every page.
    pub fn run<T, F, S>(&self, abort: &Abort, mut fetch: F, mut stitch: S) -> Result<Vec<T>>
    where
        F: FnMut(u16, u16) -> Result<Vec<T>>,
        S: FnMut(&mut [T], &[T]),
    {
        let mut pages: Vec<Vec<T>> = Vec::new();
        let mut start: u16 = 0;
        loop {
            abort.check()?;
            let page = fetch(start, self.page_size)?;
            let len = page.len();
            debug!("page at {} returned {} of {}", start, len, self.page_size);
            if let Some(previous) = pages.last_mut() {
                stitch(previous, &page);
            }
            pages.push(page);

            if len < self.page_size as usize {
                break;
            }
            start = match start.checked_add(self.page_size) {
                Some(next) => next,
                None => {
                    warn!("start offset would pass {}; stopping after {} pages", u16::MAX, pages.len());
                    break;
                }
            };
        }

        if self.order == Accumulate::Prepend {
            pages.reverse();
        }
        Ok(pages.into_iter().flatten().collect())
    }
}

/// Stitch step for endpoints with nothing to carry across pages.
pub fn no_stitch<T>(_: &mut [T], _: &[T]) {}

/// Aggregate count field: the item total, saturated to the wire width.
pub fn saturating_count(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}
