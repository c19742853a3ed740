//! Tether host
//!
//! Accepts shell connections on a TCP port and evaluates each command frame
//! with an embedded [`Evaluator`](tether::Evaluator).
//!
//! # Example Flow
//!
//! ```text
//! Shell                                     Host
//! │                                           │
//! │  \x06_ASM_\x06                            │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │       "/scripts/units.tsc;/scripts/vec.tsc"
//! │<───────────────────────────────────────── │
//! │                                           │
//! │  "x = 2;"                                 │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │       \x06_NONO_\x06                      │
//! │<───────────────────────────────────────── │
//! │                                           │
//! │  "x + 2;"                                 │
//! │ ─────────────────────────────────────────>│
//! │                                           │
//! │       "4"                                 │
//! │<───────────────────────────────────────── │
//! ```
//!
//! Each connection gets its own reader, writer and evaluation worker. Output
//! an evaluator emits while running a command goes back to the connection
//! that sent it, as separate frames.

mod connection;
mod server;

pub use connection::ConnectionContext;
pub use server::{ServerBridge, ServerHandle, preload_resources, shutdown_signal};
