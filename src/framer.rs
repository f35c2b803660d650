//! The per-connection Command Framer (spec.md §4.4): splits an
//! incoming byte stream into discrete command strings.

use std::collections::HashSet;

/// Accumulates bytes for one connection until a command boundary is
/// reached, per the algorithm in spec.md §4.4.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds one byte in. Returns `Some(command)` the moment a command
    /// boundary is reached — either an exact match against an instant
    /// command (no `\n` required) or a `\n`-terminated line. `\r` is
    /// ignored outright (never even appended to the accumulator).
    pub fn push_byte(&mut self, byte: u8, instant_prefixes: &HashSet<String>) -> Option<String> {
        if byte == b'\r' {
            return None;
        }

        self.buffer.push(byte);

        if byte == b'\n' {
            let command = String::from_utf8_lossy(&self.buffer).trim().to_string();
            self.buffer.clear();
            return Some(command);
        }

        let candidate = String::from_utf8_lossy(&self.buffer);
        let trimmed = candidate.trim_end();
        if instant_prefixes.contains(trimmed) {
            let command = trimmed.to_string();
            self.buffer.clear();
            return Some(command);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instants() -> HashSet<String> {
        ["?".to_string(), "$I".to_string()].into_iter().collect()
    }

    #[test]
    fn newline_terminated_command_emits_on_lf() {
        let mut framer = Framer::new();
        let prefixes = instants();
        assert_eq!(framer.push_byte(b'l', &prefixes), None);
        assert_eq!(framer.push_byte(b's', &prefixes), None);
        assert_eq!(framer.push_byte(b'\n', &prefixes), Some("ls".to_string()));
    }

    #[test]
    fn carriage_return_is_ignored_before_newline() {
        let mut framer = Framer::new();
        let prefixes = instants();
        for byte in b"pwd\r\n" {
            if let Some(cmd) = framer.push_byte(*byte, &prefixes) {
                assert_eq!(cmd, "pwd");
                return;
            }
        }
        panic!("expected a command to be emitted");
    }

    #[test]
    fn instant_command_emits_without_newline() {
        let mut framer = Framer::new();
        let prefixes = instants();
        assert_eq!(framer.push_byte(b'?', &prefixes), Some("?".to_string()));
    }

    #[test]
    fn strict_prefix_of_instant_command_does_not_trigger() {
        let mut framer = Framer::new();
        let prefixes = instants();
        assert_eq!(framer.push_byte(b'$', &prefixes), None);
        assert_eq!(framer.push_byte(b'I', &prefixes), Some("$I".to_string()));
    }

    #[test]
    fn empty_line_emits_empty_command() {
        let mut framer = Framer::new();
        let prefixes = instants();
        assert_eq!(framer.push_byte(b'\n', &prefixes), Some(String::new()));
    }

    #[test]
    fn buffer_resets_after_each_emitted_command() {
        let mut framer = Framer::new();
        let prefixes = instants();
        framer.push_byte(b'a', &prefixes);
        framer.push_byte(b'\n', &prefixes);
        assert_eq!(framer.push_byte(b'\n', &prefixes), Some(String::new()));
    }
}
