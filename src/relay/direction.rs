//! One direction of a relay link, as a pure state machine.
//!
//! [`RelayDirection::feed`] takes raw output bytes from the source session and
//! returns what the router should do with them. It does no I/O and takes the
//! clock as an argument, so every rule can be exercised without a runtime.

use std::time::{Duration, Instant};

use super::filter::{extract_command, is_prompt_echo, is_relay_message, strip_ansi};

/// Splits a byte stream into `\n`-terminated lines across arbitrary chunk
/// boundaries.
#[derive(Debug)]
pub struct LineScanner {
    pending: Vec<u8>,
    /// Unterminated bytes kept before the accumulator is discarded.
    max_pending: usize,
}

impl LineScanner {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_pending,
        }
    }

    /// Append `chunk` and return every line it completed, without the `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        if let Some(last) = self.pending.iter().rposition(|&b| b == b'\n') {
            let rest = self.pending.split_off(last + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            lines.extend(
                complete[..last]
                    .split(|&b| b == b'\n')
                    .map(|l| String::from_utf8_lossy(l).into_owned()),
            );
        }
        if self.pending.len() > self.max_pending {
            self.pending.clear();
        }
        lines
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// What to do with a command found in the source output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Write the command to the target.
    Forward(String),
    /// Too soon after the previous forward; warn the source instead.
    RateLimited(String),
}

#[derive(Debug)]
pub struct RelayDirection {
    tag: String,
    min_interval: Duration,
    scanner: LineScanner,
    last_forward: Option<Instant>,
}

impl RelayDirection {
    pub fn new(tag: impl Into<String>, min_interval: Duration, max_line_buffer: usize) -> Self {
        Self {
            tag: tag.into(),
            min_interval,
            scanner: LineScanner::new(max_line_buffer),
            last_forward: None,
        }
    }

    /// Scan one output chunk received at `now`.
    pub fn feed(&mut self, chunk: &[u8], now: Instant) -> Vec<RelayAction> {
        let mut actions = Vec::new();
        for raw in self.scanner.push(chunk) {
            let line = strip_ansi(&raw);
            if is_relay_message(&line) || is_prompt_echo(&line) {
                continue;
            }
            let Some(command) = extract_command(&line, &self.tag) else {
                continue;
            };
            let limited = self
                .last_forward
                .is_some_and(|last| now.saturating_duration_since(last) < self.min_interval);
            if limited {
                actions.push(RelayAction::RateLimited(command.to_string()));
            } else {
                self.last_forward = Some(now);
                actions.push(RelayAction::Forward(command.to_string()));
            }
        }
        actions
    }

    /// Drop any partial line, e.g. after missing part of the stream.
    pub fn reset(&mut self) {
        self.scanner.clear();
    }
}
