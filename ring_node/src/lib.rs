// SPDX-License-Identifier: BSD-3-Clause

//! The pieces `ring-node`'s binary wires together: the log sink and the threaded node runtime.
//! Exposed as a library, the way the teacher splits `nfs3` into `lib.rs` plus several `[[bin]]`
//! entries, so integration tests can drive [`node::Node`] directly instead of shelling out to the
//! binary.

pub mod log_sink;
pub mod node;

pub use log_sink::LogSink;
pub use node::Node;
