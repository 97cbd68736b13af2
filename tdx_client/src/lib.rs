//! Blocking client for the TDX quotation protocol.
//!
//! A [`Client`] owns one TCP connection. Any number of threads may issue
//! requests through it concurrently; each request gets its own id and
//! waiter, and responses are routed back by id whatever order they arrive
//! in.
//!
//! - `correlator`: id allocation, the per-request waiter and its timeout.
//! - `pending`: the id-keyed table of in-flight requests.
//! - `dispatch`: routes inbound envelopes to waiters and runs decoders.
//! - `connection`: TCP transport, handshake, idle heartbeat, redial.
//! - `paging`: the "fetch all" page loop.
//! - `cancel`: cancellation tokens and deadlines for long operations.
//!
//! ```no_run
//! use tdx_client::Client;
//! use tdx_common::Exchange;
//!
//! let client = Client::connect("119.147.212.81")?;
//! let bars = client.stock_kline_day_all(Exchange::Sz, "000001")?;
//! println!("{} daily bars", bars.count);
//! # Ok::<(), tdx_common::TdxError>(())
//! ```
#![warn(missing_docs)]
pub mod cancel;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatch;
pub mod paging;
mod panic;
pub mod pending;
pub mod response;

pub use cancel::{Abort, Cancel};
pub use client::Client;
pub use config::ClientConfig;
pub use correlator::FrameSink;
pub use response::{DecodeContext, Response};
