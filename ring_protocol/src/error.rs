// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

use crate::codec::DecodeError;

/// The error kinds the ring protocol engine and its collaborators can produce.
#[derive(Debug)]
pub enum Error {
    /// Malformed configuration: fatal, prevents node startup.
    Config(String),

    /// A send or receive failure at the transport boundary.
    Transport(std::io::Error),

    /// A malformed inbound datagram. Non-fatal: the caller logs and drops the frame.
    Decode(DecodeError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

/// Returned by [`crate::queue::OutboundQueue::enqueue`] when the queue is already at capacity.
#[derive(Debug)]
pub struct QueueFullError;

impl std::error::Error for QueueFullError {}

impl fmt::Display for QueueFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outbound queue is full")
    }
}

/// Returned by [`crate::engine::RingEngine::force_generate_token`] when the node already holds
/// the token.
#[derive(Debug)]
pub struct AlreadyHoldingError;

impl std::error::Error for AlreadyHoldingError {}

impl fmt::Display for AlreadyHoldingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node already holds the token")
    }
}
