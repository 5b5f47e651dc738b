// SPDX-License-Identifier: BSD-3-Clause

//! Wires the engine, transport, watchdog, and console together into one running node. Each
//! concern gets its own thread; `stop()` clears a shared flag and every thread's blocking call
//! (transport `recv`, console `read_line`, the poll loops) is bounded so shutdown is observed
//! within one receive deadline, per the suspension-point contract in `spec.md` §5.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use ring_console::{parse_line, ConsoleCommand, BROADCAST_DESTINATION, HELP_TEXT};
use ring_protocol::{Emit, RingEngine, Watchdog};
use ring_transport::RingPort;

use crate::log_sink::LogSink;

const HOLD_POLL_INTERVAL: Duration = Duration::from_millis(20);
const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A running node: the engine plus the background threads that drive it. Dropping this does not
/// stop the threads; call `stop()` and `join()` explicitly.
pub struct Node {
    engine: Arc<RingEngine>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

fn emit_or_warn(port: &dyn RingPort, name: &str, emit: Emit) {
    if let Err(e) = port.send(&emit.encode()) {
        warn!("{name}: failed to send: {e}");
    }
}

impl Node {
    /// Starts the receive loop and hold-timer thread, and the watchdog thread if `engine` is the
    /// generator. Does not start the console; run that on the caller's own thread via
    /// `run_console`.
    pub fn spawn(engine: Arc<RingEngine>, port: Arc<dyn RingPort>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::new();

        let watchdog = if engine.is_generator() {
            engine.start_as_generator();
            Some(Arc::new(Watchdog::new(engine.clone(), engine.hold_duration())))
        } else {
            None
        };

        threads.push(Self::spawn_receive_loop(
            engine.clone(),
            port.clone(),
            running.clone(),
            watchdog.clone(),
        ));
        threads.push(Self::spawn_hold_timer(
            engine.clone(),
            port.clone(),
            running.clone(),
            watchdog.clone(),
        ));

        if let Some(watchdog) = watchdog {
            threads.push(Self::spawn_watchdog(watchdog, engine.clone(), port.clone(), running.clone()));
        }

        Self { engine, running, threads }
    }

    fn spawn_receive_loop(
        engine: Arc<RingEngine>,
        port: Arc<dyn RingPort>,
        running: Arc<AtomicBool>,
        watchdog: Option<Arc<Watchdog>>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut buf = [0u8; ring_transport::MAX_DATAGRAM_SIZE];
            while running.load(Ordering::Relaxed) {
                match port.recv(&mut buf) {
                    Ok(Some(n)) => {
                        if let Some(emit) = engine.on_datagram(&buf[..n]) {
                            emit_or_warn(port.as_ref(), engine.name(), emit);
                        }
                        if let Some(watchdog) = &watchdog {
                            watchdog.note_token_seen();
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}: receive error: {e}", engine.name()),
                }
            }
        })
    }

    fn spawn_hold_timer(
        engine: Arc<RingEngine>,
        port: Arc<dyn RingPort>,
        running: Arc<AtomicBool>,
        watchdog: Option<Arc<Watchdog>>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if engine.hold_timer_due() {
                    if let Some(emit) = engine.on_hold_timer_fire() {
                        emit_or_warn(port.as_ref(), engine.name(), emit);
                    }
                    if let Some(watchdog) = &watchdog {
                        watchdog.note_token_seen();
                    }
                }
                thread::sleep(HOLD_POLL_INTERVAL);
            }
        })
    }

    fn spawn_watchdog(
        watchdog: Arc<Watchdog>,
        engine: Arc<RingEngine>,
        port: Arc<dyn RingPort>,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if let Some(emit) = watchdog.on_tick() {
                    emit_or_warn(port.as_ref(), engine.name(), emit);
                }
                thread::sleep(WATCHDOG_POLL_INTERVAL);
            }
        })
    }

    /// Runs the operator console on the calling thread until `quit` is entered or stdin closes.
    /// Blocking, by design: the console is meant to own the process's foreground thread.
    pub fn run_console(&self, sink: &LogSink) {
        let stdin = io::stdin();
        print!("{} ready. Type 'help' for commands.\n> ", self.engine.name());
        let _ = io::stdout().flush();

        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_line(&line) {
                Ok(ConsoleCommand::Quit) => break,
                Ok(cmd) => self.handle_console_command(cmd, sink),
                Err(msg) => println!("{msg}"),
            }
            print!("> ");
            let _ = io::stdout().flush();
        }

        self.stop();
    }

    fn handle_console_command(&self, cmd: ConsoleCommand, sink: &LogSink) {
        match cmd {
            ConsoleCommand::Send { destination, payload } => {
                match self.engine.queue().enqueue(destination, payload) {
                    Ok(()) => println!("enqueued"),
                    Err(e) => println!("error: {e}"),
                }
            }
            ConsoleCommand::Broadcast { payload } => {
                match self.engine.queue().enqueue(BROADCAST_DESTINATION.to_string(), payload) {
                    Ok(()) => println!("enqueued broadcast"),
                    Err(e) => println!("error: {e}"),
                }
            }
            ConsoleCommand::Status => {
                let status = self.engine.status();
                println!(
                    "{} [{}] state={} has_token={} queue={} tokens_rx={} tokens_gen={} frames_sent={} frames_rx={} integrity_errors={}",
                    status.name,
                    if status.generator { "generator" } else { "relay" },
                    status.state,
                    status.has_token,
                    status.queue_size,
                    status.counters.tokens_received,
                    status.counters.tokens_generated,
                    status.counters.frames_sent,
                    status.counters.frames_received,
                    status.counters.integrity_errors,
                );
            }
            ConsoleCommand::Queue => {
                for (i, msg) in self.engine.queue().snapshot().iter().enumerate() {
                    println!("{i}: -> {} (retries {}) {:?}", msg.destination, msg.retries, msg.payload);
                }
            }
            ConsoleCommand::Token => match self.engine.force_generate_token() {
                Ok(_) => println!("token generated"),
                Err(e) => println!("error: {e}"),
            },
            ConsoleCommand::Logs => {
                for line in sink.tail(50) {
                    println!("{line}");
                }
            }
            ConsoleCommand::Help => println!("{HELP_TEXT}"),
            ConsoleCommand::Quit => unreachable!("handled by the caller"),
        }
    }

    /// Signals every background thread to exit at its next poll.
    pub fn stop(&self) {
        info!("{}: stopping", self.engine.name());
        self.running.store(false, Ordering::Relaxed);
    }

    /// Waits for every background thread to exit. Call after `stop()`.
    pub fn join(self) {
        for handle in self.threads {
            let _ = handle.join();
        }
    }
}
