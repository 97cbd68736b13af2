//! In-process quotation server speaking the TDX wire protocol.
//!
//! The simulator answers every request type the client knows with
//! synthetic, deterministic random-walk data. It exists to exercise the
//! client end to end without a real quotation server:
//!
//! - `config`: data set sizes, compression threshold, silent types, idle timeout.
//! - `model`: the data generator, the activity tracker and the payload encoders.
//! - `session`: one thread per client, answering requests in order.
//! - `server`: the accept loop and a background handle for tests.
#![warn(missing_docs)]
pub mod config;
pub mod model;
pub mod server;
pub mod session;

pub use config::SimConfig;
pub use server::{SimHandle, SimServer};
