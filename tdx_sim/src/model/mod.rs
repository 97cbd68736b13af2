//! Synthetic market and the wire encoding of its answers.
/// Last-seen bookkeeping for connected clients.
pub mod activity;
/// Response payload layouts.
pub mod encode;
/// Deterministic synthetic market data.
pub mod generator;
/// Request parsing and reply building.
pub mod responder;
