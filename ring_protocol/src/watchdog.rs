// SPDX-License-Identifier: BSD-3-Clause

//! The token watchdog. Runs only on the generator node: tracks how long it has been since the
//! token was last seen there, and regenerates it if circulation appears to have stalled.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, trace};

use crate::engine::{Emit, RingEngine};

/// Computes the watchdog's tick period: a conservative upper bound on one full circulation of
/// the ring (`T_hold * 6 + 3s`).
pub fn period(hold_duration: Duration) -> Duration {
    hold_duration * 6 + Duration::from_secs(3)
}

/// Tracks `last_seen_token` for the generator and decides, on each tick, whether to regenerate.
pub struct Watchdog {
    engine: Arc<RingEngine>,
    period: Duration,
    last_seen_token: Mutex<Instant>,
}

impl Watchdog {
    pub fn new(engine: Arc<RingEngine>, hold_duration: Duration) -> Self {
        assert!(engine.is_generator(), "the watchdog only runs on the generator node");
        Self {
            engine,
            period: period(hold_duration),
            last_seen_token: Mutex::new(Instant::now()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Must be called whenever the caller observes the engine holding the token (e.g. after every
    /// inbound datagram), so `last_seen_token` stays current while the token is actually here.
    pub fn note_token_seen(&self) {
        if self.engine.has_token() {
            *self.last_seen_token.lock().expect("watchdog lock poisoned") = Instant::now();
        }
    }

    /// Runs one watchdog tick. If the token hasn't been seen within `period`, synthesises a fresh
    /// one by emitting it downstream. Never regenerates while the generator itself holds the
    /// token (that would duplicate the token on the ring).
    pub fn on_tick(&self) -> Option<Emit> {
        if self.engine.has_token() {
            trace!("{}: watchdog tick, token is at home, nothing to do", self.engine.name());
            self.note_token_seen();
            return None;
        }

        let elapsed = {
            let last = self.last_seen_token.lock().expect("watchdog lock poisoned");
            last.elapsed()
        };

        if elapsed <= self.period {
            trace!(
                "{}: watchdog tick, token last seen {:?} ago (within {:?})",
                self.engine.name(),
                elapsed,
                self.period
            );
            return None;
        }

        info!(
            "{}: watchdog detected token loss ({:?} since last seen, period {:?}); regenerating",
            self.engine.name(),
            elapsed,
            self.period
        );

        match self.engine.force_generate_token() {
            Ok(emit) => {
                *self.last_seen_token.lock().expect("watchdog lock poisoned") = Instant::now();
                Some(emit)
            }
            Err(_) => {
                // Raced with the token actually arriving right before this tick; nothing to do.
                self.note_token_seen();
                None
            }
        }
    }
}
