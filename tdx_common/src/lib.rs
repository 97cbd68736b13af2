//!
//! Common types and utilities shared by the quotation client and the simulator.
//!
//! This crate aggregates:
//! - `error`: unified error type `TdxError` used across the workspace.
//! - `result`: handy `Result<T, TdxError>` alias.
//! - `market`: exchanges, security codes and candlestick periods.
//! - `model`: typed values decoded from server responses.
//! - `protocol`: framing, payload primitives and per-type codecs.
//! - `net`: networking constants and small helpers.
#![warn(missing_docs)]
pub mod error;
pub mod result;
pub mod market;
#[allow(missing_docs)]
pub mod model;
pub mod net;
pub mod protocol;

pub use error::TdxError;
pub use result::Result;
pub use market::{Exchange, KlinePeriod, Security};
pub use protocol::{Envelope, MessageType, Request};
