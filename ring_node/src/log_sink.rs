// SPDX-License-Identifier: BSD-3-Clause

//! A `log::Log` implementation that forwards formatted lines to stderr while retaining the last
//! [`CAPACITY`] of them for the console's `logs` command. This is the node's only logger: the
//! console needs a way to read recent lines back, which a plain `env_logger` installation can't
//! offer, so this sink takes over that role entirely rather than layering on top of one.
//! `spec.md` §6 describes the log sink as purely informational with no external consumer, so a
//! line-oriented ring buffer is all the console needs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{Level, Log, Metadata, Record};

const CAPACITY: usize = 200;

#[derive(Clone)]
pub struct LogSink {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(CAPACITY))),
        }
    }

    /// Returns the last `n` retained log lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().expect("log sink lock poisoned");
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().expect("log sink lock poisoned");
        if lines.len() == CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs a logger that writes formatted lines both to stderr and into `sink`.
pub fn install(sink: LogSink, level: log::LevelFilter) {
    let logger = RingLogger { sink };
    log::set_max_level(level);
    let _ = log::set_boxed_logger(Box::new(logger));
}

struct RingLogger {
    sink: LogSink,
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{:<5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        eprintln!("{line}");
        self.sink.push(line);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_returns_most_recent_lines_in_order() {
        let sink = LogSink::new();
        for i in 0..5 {
            sink.push(format!("line {i}"));
        }
        assert_eq!(sink.tail(2), vec!["line 3".to_string(), "line 4".to_string()]);
    }

    #[test]
    fn tail_caps_retained_lines_at_capacity() {
        let sink = LogSink::new();
        for i in 0..(CAPACITY + 10) {
            sink.push(format!("line {i}"));
        }
        let all = sink.tail(CAPACITY + 10);
        assert_eq!(all.len(), CAPACITY);
        assert_eq!(all[0], format!("line {}", 10));
    }
}
