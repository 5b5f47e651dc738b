// SPDX-License-Identifier: BSD-3-Clause

//! Ring protocol engine: frame codec, the bounded outbound queue, the token-ring state machine,
//! and the token watchdog. Configuration loading, the operator console, the datagram transport,
//! and log sinks live in sibling crates; this crate only models the protocol itself.

pub mod codec;
pub mod engine;
pub mod error;
pub mod queue;
pub mod watchdog;

pub use codec::{Control, DataFrame, Frame, BROADCAST};
pub use engine::{Emit, EngineState, RingEngine};
pub use error::Error;
pub use queue::OutboundQueue;
pub use watchdog::Watchdog;
