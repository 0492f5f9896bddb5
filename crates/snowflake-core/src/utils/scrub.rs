//! Log scrubbing: redacts IP literals from log output.
//!
//! Unless unsafe logging is requested by the operator, anything in a log
//! line that parses as an IPv4/IPv6 address (optionally bracketed or with
//! a port) is replaced with `[scrubbed]` before it reaches the writer.
//! Candidate runs are found with a loose address-alphabet pattern, then
//! validated with the standard library's address parsers and a word
//! boundary check, so Rust paths like `broker::handlers` and version
//! numbers survive untouched.

use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing_subscriber::fmt::MakeWriter;

const REPLACEMENT: &str = "[scrubbed]";

/// Maximal runs over the characters an address (with port) can contain.
fn candidate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9a-fA-F:\[\].]+").expect("scrub pattern is valid"))
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn is_address(candidate: &str) -> bool {
    if !candidate.chars().any(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let unbracketed = candidate.trim_matches(|c| c == '[' || c == ']');
    let undotted = candidate.trim_end_matches('.');
    candidate.parse::<IpAddr>().is_ok()
        || candidate.parse::<SocketAddr>().is_ok()
        || unbracketed.parse::<IpAddr>().is_ok()
        || undotted.parse::<IpAddr>().is_ok()
}

/// Replace every address-shaped span in `line` with `[scrubbed]`.
pub fn scrub(line: &str) -> String {
    let bytes = line.as_bytes();
    candidate_pattern()
        .replace_all(line, |caps: &Captures<'_>| {
            let m = caps.get(0).expect("whole-match group always present");
            // An address embedded in a longer identifier is not an address.
            let standalone = (m.start() == 0 || !is_word_byte(bytes[m.start() - 1]))
                && (m.end() == bytes.len() || !is_word_byte(bytes[m.end()]));
            if standalone && is_address(m.as_str()) {
                REPLACEMENT.to_owned()
            } else {
                m.as_str().to_owned()
            }
        })
        .into_owned()
}

/// Writer adapter that scrubs each chunk before passing it through.
pub struct ScrubWriter<W: Write> {
    inner: W,
}

impl<W: Write> Write for ScrubWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(scrub(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` wiring the scrubber in front of stderr.
#[derive(Clone, Copy, Default)]
pub struct ScrubMakeWriter;

impl<'a> MakeWriter<'a> for ScrubMakeWriter {
    type Writer = ScrubWriter<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        ScrubWriter {
            inner: io::stderr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_ipv4_and_ports() {
        assert_eq!(scrub("peer 203.0.113.9 connected"), "peer [scrubbed] connected");
        assert_eq!(scrub("from 203.0.113.9:8443"), "from [scrubbed]");
        assert_eq!(scrub("dialed 203.0.113.9."), "dialed [scrubbed]");
    }

    #[test]
    fn scrubs_ipv6_forms() {
        assert_eq!(scrub("addr 2001:db8::1 seen"), "addr [scrubbed] seen");
        assert_eq!(scrub("bound [2001:db8::1]:443"), "bound [scrubbed]");
        assert_eq!(scrub("loopback ::1 up"), "loopback [scrubbed] up");
    }

    #[test]
    fn leaves_rust_paths_alone() {
        let line = "snowflake_core::broker::handlers: client denied";
        assert_eq!(scrub(line), line);
        assert_eq!(scrub("x::y and also ::"), "x::y and also ::");
    }

    #[test]
    fn leaves_versions_and_times_alone() {
        assert_eq!(scrub("release 1.2.3 ready"), "release 1.2.3 ready");
        assert_eq!(scrub("at 12:34:56 today"), "at 12:34:56 today");
    }

    #[test]
    fn writer_scrubs_chunks() {
        let mut out = Vec::new();
        {
            let mut writer = ScrubWriter { inner: &mut out };
            writer.write_all(b"hello 198.51.100.7\n").expect("write");
        }
        assert_eq!(out, b"hello [scrubbed]\n");
    }
}
