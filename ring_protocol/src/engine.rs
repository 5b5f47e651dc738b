// SPDX-License-Identifier: BSD-3-Clause

//! The ring engine: the state machine that owns token possession, the single-frame-in-flight
//! transmit/retransmit discipline, integrity verification with ACK/NAK piggyback, broadcast
//! handling, and recovery from token loss.
//!
//! Per the re-architecture notes this models state as an explicit tagged enum so that the illegal
//! combinations (awaiting without a frame, holding without the token) are unrepresentable, and
//! keeps the in-flight frame as an owned value inside `Awaiting` rather than a reference. All
//! mutation goes through one `Mutex`-guarded critical section per inbound event; the lock is
//! never held across a transport send.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::codec::{self, Control, DataFrame, Frame, BROADCAST};
use crate::error::AlreadyHoldingError;
use crate::queue::OutboundQueue;

/// Default cap on consecutive NAK-triggered retransmissions of the same head message before it
/// is dropped as exhausted. The protocol as specified has no hard ceiling; this resolves that
/// open question (see DESIGN.md) to avoid indefinite circulation of a stuck message.
pub const DEFAULT_RETRY_CAP: u32 = 2;

/// The engine's internal state. Only one of these is ever true at a time; that invariant is
/// enforced by construction rather than by separate booleans.
#[derive(Debug, Clone)]
pub enum EngineState {
    Idle,
    Holding { hold_deadline: Instant },
    Awaiting { frame: DataFrame },
}

impl EngineState {
    pub fn has_token(&self) -> bool {
        !matches!(self, EngineState::Idle)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineState::Idle => "IDLE",
            EngineState::Holding { .. } => "HOLDING",
            EngineState::Awaiting { .. } => "AWAITING",
        }
    }
}

/// What the engine wants the caller to put on the wire as a result of a transition. `None` means
/// nothing needs to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emit {
    Token,
    Data(DataFrame),
}

impl Emit {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Emit::Token => codec::encode_token(),
            Emit::Data(frame) => codec::encode(frame),
        }
    }
}

/// Plain-value snapshot of the engine's counters, safe to read from the console thread without
/// touching the state lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub tokens_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub integrity_errors: u64,
    pub tokens_generated: u64,
}

#[derive(Default)]
struct Counters {
    tokens_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    integrity_errors: AtomicU64,
    tokens_generated: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tokens_received: self.tokens_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            integrity_errors: self.integrity_errors.load(Ordering::Relaxed),
            tokens_generated: self.tokens_generated.load(Ordering::Relaxed),
        }
    }
}

/// A full, console-friendly snapshot of one node's engine.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub name: String,
    pub generator: bool,
    pub state: &'static str,
    pub has_token: bool,
    pub queue_size: usize,
    pub counters: CounterSnapshot,
}

/// One node's ring protocol engine. Owns the outbound queue; the node binary owns everything
/// else (transport, console, config).
pub struct RingEngine {
    name: String,
    generator: bool,
    hold_duration: Duration,
    retry_cap: u32,
    error_injection_probability: f64,

    state: Mutex<EngineState>,
    queue: OutboundQueue,
    counters: Counters,
    last_token_received_at: Mutex<Option<Instant>>,
}

impl RingEngine {
    pub fn new(name: impl Into<String>, generator: bool, hold_duration: Duration) -> Self {
        Self {
            name: name.into(),
            generator,
            hold_duration,
            retry_cap: DEFAULT_RETRY_CAP,
            error_injection_probability: 0.0,
            state: Mutex::new(EngineState::Idle),
            queue: OutboundQueue::new(),
            counters: Counters::default(),
            last_token_received_at: Mutex::new(None),
        }
    }

    pub fn with_retry_cap(mut self, cap: u32) -> Self {
        self.retry_cap = cap;
        self
    }

    pub fn with_error_injection_probability(mut self, p: f64) -> Self {
        self.error_injection_probability = p;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_generator(&self) -> bool {
        self.generator
    }

    pub fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn has_token(&self) -> bool {
        self.state.lock().expect("engine lock poisoned").has_token()
    }

    /// True exactly when the engine is HOLDING and its hold deadline has passed. Polled by the
    /// node's hold-timer thread; does not itself mutate state.
    pub fn hold_timer_due(&self) -> bool {
        match &*self.state.lock().expect("engine lock poisoned") {
            EngineState::Holding { hold_deadline } => Instant::now() >= *hold_deadline,
            _ => false,
        }
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock().expect("engine lock poisoned");
        EngineStatus {
            name: self.name.clone(),
            generator: self.generator,
            state: state.label(),
            has_token: state.has_token(),
            queue_size: self.queue.size(),
            counters: self.counters.snapshot(),
        }
    }

    /// The generator's one-time startup transition: IDLE -> HOLDING, by synthesising a token
    /// locally rather than receiving one from the ring. Nothing is emitted on the wire.
    pub fn start_as_generator(&self) {
        assert!(self.generator, "only the generator node synthesises its first token");
        let mut state = self.state.lock().expect("engine lock poisoned");
        *state = EngineState::Holding {
            hold_deadline: Instant::now() + self.hold_duration,
        };
        self.counters.tokens_generated.fetch_add(1, Ordering::Relaxed);
        debug!("{}: synthesised initial token, now HOLDING", self.name);
    }

    /// Operator-triggered one-shot token generation. Fails if the node already holds the token.
    /// On success, emits a fresh `Token` datagram downstream without changing local state — this
    /// is the same action the watchdog takes on a stall, just triggered manually.
    pub fn force_generate_token(&self) -> Result<Emit, AlreadyHoldingError> {
        let state = self.state.lock().expect("engine lock poisoned");
        if state.has_token() {
            return Err(AlreadyHoldingError);
        }
        drop(state);
        self.counters.tokens_generated.fetch_add(1, Ordering::Relaxed);
        debug!("{}: operator forced token generation", self.name);
        Ok(Emit::Token)
    }

    /// Dispatches a raw inbound datagram: decodes it, logging and dropping parse errors, then
    /// runs the relevant transition.
    pub fn on_datagram(&self, bytes: &[u8]) -> Option<Emit> {
        match codec::decode(bytes) {
            Ok(Frame::Token) => self.on_token_received(),
            Ok(Frame::Data(frame)) => self.on_data_frame_received(frame),
            Err(e) => {
                warn!("{}: dropping unparsable datagram: {e}", self.name);
                None
            }
        }
    }

    fn on_token_received(&self) -> Option<Emit> {
        self.counters.tokens_received.fetch_add(1, Ordering::Relaxed);

        if self.generator {
            let mut last = self.last_token_received_at.lock().expect("lock poisoned");
            if let Some(prev) = *last {
                if prev.elapsed() < self.hold_duration {
                    warn!(
                        "{}: two tokens observed in rapid succession, suspected duplication \
                         (watchdog race); absorbing extra token",
                        self.name
                    );
                }
            }
            *last = Some(Instant::now());
        }

        let mut state = self.state.lock().expect("engine lock poisoned");
        match &*state {
            EngineState::Idle => {
                *state = EngineState::Holding {
                    hold_deadline: Instant::now() + self.hold_duration,
                };
                debug!("{}: IDLE -> HOLDING (token received)", self.name);
                None
            }
            EngineState::Holding { .. } => {
                // Already holding: accept the extra token, simply re-arm the hold timer.
                *state = EngineState::Holding {
                    hold_deadline: Instant::now() + self.hold_duration,
                };
                debug!("{}: token received while already HOLDING, re-armed timer", self.name);
                None
            }
            EngineState::Awaiting { .. } => {
                warn!(
                    "{}: token received while AWAITING a returned frame; dropping (duplicate?)",
                    self.name
                );
                None
            }
        }
    }

    /// Drives the HOLDING -> (IDLE | AWAITING) transition when the hold timer fires. A no-op
    /// (stale timer) if the engine is not currently HOLDING.
    pub fn on_hold_timer_fire(&self) -> Option<Emit> {
        let mut state = self.state.lock().expect("engine lock poisoned");
        if !matches!(&*state, EngineState::Holding { .. }) {
            trace!("{}: stale hold-timer fire ignored (state is {})", self.name, state.label());
            return None;
        }

        let Some(head) = self.queue.peek_head() else {
            *state = EngineState::Idle;
            debug!("{}: hold timer fired, queue empty, passing token", self.name);
            return Some(Emit::Token);
        };

        let is_broadcast = head.destination == BROADCAST;
        let outgoing = codec::build_data_frame(
            &self.name,
            &head.destination,
            Control::NoRecipientYet,
            &head.payload,
        );

        if is_broadcast {
            // Broadcasts are exempt from fault injection so a single corruption doesn't cost
            // every recipient a redelivery.
            *state = EngineState::Awaiting { frame: outgoing.clone() };
            debug!("{}: hold timer fired, transmitting broadcast to {}", self.name, BROADCAST);
            Some(Emit::Data(outgoing))
        } else {
            let (outgoing, introduced) = codec::inject_error(&outgoing, self.error_injection_probability);
            if introduced {
                debug!("{}: fault injection corrupted outgoing frame to {}", self.name, outgoing.destination);
            }
            self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
            *state = EngineState::Awaiting { frame: outgoing.clone() };
            debug!("{}: hold timer fired, transmitting to {}", self.name, outgoing.destination);
            Some(Emit::Data(outgoing))
        }
    }

    fn on_data_frame_received(&self, frame: DataFrame) -> Option<Emit> {
        if frame.origin == self.name {
            return self.on_self_origin_return(frame);
        }

        if frame.destination == self.name {
            return self.on_addressed_to_us(frame);
        }

        if frame.is_broadcast() {
            self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
            trace!("{}: forwarding broadcast from {}", self.name, frame.origin);
            return Some(Emit::Data(frame));
        }

        trace!("{}: forwarding frame {} -> {} unchanged", self.name, frame.origin, frame.destination);
        Some(Emit::Data(frame))
    }

    fn on_self_origin_return(&self, frame: DataFrame) -> Option<Emit> {
        let mut state = self.state.lock().expect("engine lock poisoned");

        let EngineState::Awaiting { frame: in_flight } = &*state else {
            warn!("{}: unexpected return of our own frame while not AWAITING; discarding", self.name);
            return None;
        };

        if in_flight.destination != frame.destination {
            warn!(
                "{}: unexpected return (destination mismatch: in-flight was for {}, got {}); discarding",
                self.name, in_flight.destination, frame.destination
            );
            return None;
        }

        if frame.is_broadcast() {
            self.queue.drop_head();
            *state = EngineState::Idle;
            debug!("{}: broadcast cycle complete, passing token", self.name);
            return Some(Emit::Token);
        }

        match &frame.control {
            Control::Ack => {
                self.queue.drop_head();
                debug!("{}: ACK for {}, dropping head", self.name, frame.destination);
            }
            Control::Nak => {
                self.queue.bump_retry();
                let retries = self.queue.peek_head().map(|m| m.retries).unwrap_or(0);
                if retries > self.retry_cap {
                    warn!(
                        "{}: retry cap ({}) exceeded for {}, dropping exhausted message",
                        self.name, self.retry_cap, frame.destination
                    );
                    self.queue.drop_head();
                } else {
                    debug!("{}: NAK for {}, retry {}/{}", self.name, frame.destination, retries, self.retry_cap);
                }
            }
            Control::NoRecipientYet | Control::Unknown(_) => {
                if matches!(frame.control, Control::Unknown(_)) {
                    warn!("{}: unknown control value on returned frame, releasing token", self.name);
                }
                self.queue.drop_head();
                debug!("{}: no recipient found for {}, dropping head", self.name, frame.destination);
            }
        }

        *state = EngineState::Idle;
        Some(Emit::Token)
    }

    fn on_addressed_to_us(&self, frame: DataFrame) -> Option<Emit> {
        if codec::verify(&frame) {
            self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
            trace!("{}: valid frame from {}, sending ACK", self.name, frame.origin);
            Some(Emit::Data(codec::rewrite_control(&frame, Control::Ack)))
        } else {
            self.counters.integrity_errors.fetch_add(1, Ordering::Relaxed);
            warn!("{}: checksum mismatch on frame from {}, sending NAK", self.name, frame.origin);
            Some(Emit::Data(codec::rewrite_control(&frame, Control::Nak)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hold(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn idle_to_holding_on_token() {
        let engine = RingEngine::new("Alice", false, hold(50));
        assert_eq!(engine.status().state, "IDLE");
        let emit = engine.on_datagram(&codec::encode_token());
        assert!(emit.is_none());
        assert!(engine.has_token());
    }

    #[test]
    fn token_while_holding_is_accepted_and_rearms() {
        let engine = RingEngine::new("Alice", false, hold(50));
        engine.on_datagram(&codec::encode_token());
        let before = engine.status().counters.tokens_received;
        engine.on_datagram(&codec::encode_token());
        assert_eq!(engine.status().counters.tokens_received, before + 1);
        assert!(engine.has_token());
    }

    #[test]
    fn hold_timer_with_empty_queue_passes_token() {
        let engine = RingEngine::new("Alice", false, hold(50));
        engine.on_datagram(&codec::encode_token());
        let emit = engine.on_hold_timer_fire();
        assert_eq!(emit, Some(Emit::Token));
        assert!(!engine.has_token());
    }

    #[test]
    fn unicast_happy_path_drops_head_and_passes_token() {
        let engine = RingEngine::new("Alice", false, hold(50));
        engine.queue().enqueue("Bob".into(), "hi".into()).unwrap();
        engine.on_datagram(&codec::encode_token());

        let Some(Emit::Data(sent)) = engine.on_hold_timer_fire() else {
            panic!("expected a data emission");
        };
        assert_eq!(sent.control, Control::NoRecipientYet);
        assert!(codec::verify(&sent));

        // Bob ACKs it, it comes back to Alice:
        let acked = codec::rewrite_control(&sent, Control::Ack);
        let emit = engine.on_datagram(&codec::encode(&acked));
        assert_eq!(emit, Some(Emit::Token));
        assert_eq!(engine.queue().size(), 0);
    }

    #[test]
    fn nak_keeps_head_and_bumps_retry() {
        let engine = RingEngine::new("Alice", false, hold(50));
        engine.queue().enqueue("Bob".into(), "x".into()).unwrap();
        engine.on_datagram(&codec::encode_token());
        let Some(Emit::Data(sent)) = engine.on_hold_timer_fire() else {
            panic!("expected data emission");
        };

        let naked = codec::rewrite_control(&sent, Control::Nak);
        engine.on_datagram(&codec::encode(&naked));

        assert_eq!(engine.queue().size(), 1);
        assert_eq!(engine.queue().snapshot()[0].retries, 1);
    }

    #[test]
    fn retry_cap_drops_exhausted_message() {
        let engine = RingEngine::new("Alice", false, hold(50)).with_retry_cap(1);
        engine.queue().enqueue("Bob".into(), "x".into()).unwrap();

        for _ in 0..3 {
            engine.on_datagram(&codec::encode_token());
            let Some(Emit::Data(sent)) = engine.on_hold_timer_fire() else {
                break;
            };
            let naked = codec::rewrite_control(&sent, Control::Nak);
            engine.on_datagram(&codec::encode(&naked));
        }

        assert_eq!(engine.queue().size(), 0);
    }

    #[test]
    fn broadcast_cycle_completes_on_self_return() {
        let engine = RingEngine::new("Alice", false, hold(50));
        engine.queue().enqueue(BROADCAST.into(), "hello".into()).unwrap();
        engine.on_datagram(&codec::encode_token());

        let Some(Emit::Data(sent)) = engine.on_hold_timer_fire() else {
            panic!("expected data emission");
        };
        assert_eq!(sent.control, Control::NoRecipientYet, "broadcasts are never error-injected");

        let emit = engine.on_datagram(&codec::encode(&sent));
        assert_eq!(emit, Some(Emit::Token));
        assert_eq!(engine.queue().size(), 0);
    }

    #[test]
    fn unknown_destination_passes_through_unchanged() {
        let engine = RingEngine::new("Carol", false, hold(50));
        let bytes = codec::encode_data("Alice", "Dave", &Control::NoRecipientYet, "q");
        let emit = engine.on_datagram(&bytes);
        let Some(Emit::Data(forwarded)) = emit else {
            panic!("expected forward");
        };
        assert_eq!(forwarded.control, Control::NoRecipientYet);
    }

    #[test]
    fn addressed_frame_with_bad_checksum_gets_nak() {
        let engine = RingEngine::new("Bob", false, hold(50));
        let clean = codec::build_data_frame("Alice", "Bob", Control::NoRecipientYet, "hi");
        let (corrupted, introduced) = codec::inject_error(&clean, 1.0);
        assert!(introduced);

        let emit = engine.on_datagram(&codec::encode(&corrupted));
        let Some(Emit::Data(reply)) = emit else {
            panic!("expected reply");
        };
        assert_eq!(reply.control, Control::Nak);
    }

    #[test]
    fn unexpected_return_while_not_awaiting_is_logged_and_dropped() {
        let engine = RingEngine::new("Alice", false, hold(50));
        let bytes = codec::encode_data("Alice", "Bob", &Control::Ack, "stray");
        let emit = engine.on_datagram(&bytes);
        assert!(emit.is_none());
        assert_eq!(engine.status().state, "IDLE");
    }

    #[test]
    fn force_generate_token_fails_while_holding() {
        let engine = RingEngine::new("Alice", true, hold(50));
        engine.start_as_generator();
        assert!(engine.force_generate_token().is_err());
    }

    #[test]
    fn force_generate_token_succeeds_while_idle() {
        let engine = RingEngine::new("Alice", true, hold(50));
        assert_eq!(engine.force_generate_token().unwrap(), Emit::Token);
    }
}
