//! AT response collection.
//!
//! Modem replies arrive in arbitrary pieces. [`AtCollector`] splits them into
//! lines and decides when a command is answered: a final result code, the
//! `>` prompt, or a caller-chosen number of lines.

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{MuxError, Result};
use crate::response::{AwaitGuard, WaitError};

const FINAL_CODES: [&str; 6] = ["OK", "ERROR", "NO CARRIER", "BUSY", "NO ANSWER", "NO DIALTONE"];
const FINAL_PREFIXES: [&str; 2] = ["+CME ERROR:", "+CMS ERROR:"];

/// Prompt token for commands that expect a payload (e.g. SMS text).
pub const PROMPT: &str = ">";

/// How an AT exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AtOutcome {
    /// `OK`.
    Ok,
    /// `ERROR`, `+CME ERROR`, `NO CARRIER` and friends.
    Error,
    /// The `>` prompt.
    Prompt,
    /// The expected number of lines arrived without a final code.
    Lines,
}

/// Classify one response line.
pub fn final_outcome(line: &str) -> Option<AtOutcome> {
    if line == "OK" {
        Some(AtOutcome::Ok)
    } else if FINAL_CODES.contains(&line) || FINAL_PREFIXES.iter().any(|p| line.starts_with(p)) {
        Some(AtOutcome::Error)
    } else {
        None
    }
}

/// A complete AT reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtResponse {
    /// Non-empty lines in arrival order, final code included.
    pub lines: Vec<String>,
    pub outcome: AtOutcome,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.outcome == AtOutcome::Ok
    }

    /// True if any line contains `token` and, unless `expected_lines` is 0,
    /// the reply has exactly that many lines.
    pub fn search(&self, token: &str, expected_lines: usize) -> bool {
        self.lines.iter().any(|l| l.contains(token))
            && (expected_lines == 0 || self.lines.len() == expected_lines)
    }

    /// True if the modem is waiting for payload.
    pub fn check_prompt(&self) -> bool {
        self.outcome == AtOutcome::Prompt || self.search(PROMPT, 0)
    }

    /// Lines that are neither the command echo nor the final code.
    pub fn info_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|l| final_outcome(l).is_none() && !l.starts_with("AT"))
    }

    /// First line starting with `prefix`.
    pub fn find(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|l| l.starts_with(prefix))
    }

    /// Map a non-`OK` reply to [`MuxError::NegotiationFailure`].
    pub fn into_ok(self, command: &str) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(MuxError::NegotiationFailure {
                command: command.trim_end().to_string(),
                response: self.lines.join(" | "),
            })
        }
    }
}

/// Incremental line splitter for one AT exchange.
#[derive(Debug, Default)]
pub struct AtCollector {
    partial: Vec<u8>,
    lines: Vec<String>,
    expected: usize,
    outcome: Option<AtOutcome>,
}

impl AtCollector {
    /// `expected` of 0 waits for a final code or the prompt.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            ..Self::default()
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.outcome.is_some() {
                break;
            }
            if b == b'\r' || b == b'\n' {
                self.end_line();
            } else {
                self.partial.push(b);
                if self.partial.starts_with(PROMPT.as_bytes()) && self.partial.len() <= 2 {
                    self.lines.push(PROMPT.to_string());
                    self.partial.clear();
                    self.outcome = Some(AtOutcome::Prompt);
                }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some() || (self.expected > 0 && self.lines.len() >= self.expected)
    }

    /// Lines gathered so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn finish(mut self) -> AtResponse {
        self.end_line();
        AtResponse {
            outcome: self.outcome.unwrap_or(AtOutcome::Lines),
            lines: self.lines,
        }
    }

    fn end_line(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.partial).trim().to_string();
        self.partial.clear();
        if line.is_empty() {
            return;
        }
        if let Some(outcome) = final_outcome(&line) {
            self.outcome = Some(outcome);
        }
        self.lines.push(line);
    }
}

/// Feed chunks from an open wait into a collector until the reply completes.
pub(crate) fn await_reply(
    wait: &AwaitGuard<'_, Bytes>,
    expected_lines: usize,
    deadline: Instant,
) -> std::result::Result<AtResponse, WaitError> {
    let mut collector = AtCollector::new(expected_lines);
    while !collector.is_done() {
        let chunk = wait.next(deadline)?;
        collector.feed(&chunk);
    }
    Ok(collector.finish())
}

/// `+CSQ` reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalStrength {
    /// Raw 0-31 index, 99 when unknown.
    pub rssi: u8,
    /// Received power, `None` when unknown.
    pub dbm: Option<i32>,
}

impl SignalStrength {
    pub const UNKNOWN: u8 = 99;

    pub fn from_rssi(rssi: u8) -> Self {
        let dbm = (rssi <= 31).then(|| -113 + 2 * i32::from(rssi));
        Self { rssi, dbm }
    }

    pub fn is_valid(&self) -> bool {
        self.dbm.is_some()
    }

    /// Parse the first `+CSQ: <rssi>,<ber>` line of a reply.
    pub fn parse(response: &AtResponse) -> Option<Self> {
        let line = response.find("+CSQ:")?;
        let rssi = line["+CSQ:".len()..].split(',').next()?.trim().parse().ok()?;
        Some(Self::from_rssi(rssi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&[u8]], expected: usize) -> (bool, AtResponse) {
        let mut c = AtCollector::new(expected);
        for chunk in chunks {
            c.feed(chunk);
        }
        (c.is_done(), c.finish())
    }

    #[test]
    fn ok_ends_exchange_across_chunks() {
        let (done, resp) = collect(&[b"\r\n+CSQ: 2", b"0,99\r\n\r\nO", b"K\r\n"], 0);
        assert!(done);
        assert_eq!(resp.lines, vec!["+CSQ: 20,99", "OK"]);
        assert_eq!(resp.outcome, AtOutcome::Ok);
    }

    #[test]
    fn error_codes_are_final() {
        for text in ["ERROR", "+CME ERROR: 10", "+CMS ERROR: 500", "NO CARRIER"] {
            let (done, resp) = collect(&[format!("\r\n{text}\r\n").as_bytes()], 0);
            assert!(done, "{text}");
            assert_eq!(resp.outcome, AtOutcome::Error);
        }
    }

    #[test]
    fn prompt_without_line_end() {
        let (done, resp) = collect(&[b"\r\n> "], 0);
        assert!(done);
        assert!(resp.check_prompt());
        assert_eq!(resp.outcome, AtOutcome::Prompt);
    }

    #[test]
    fn expected_line_count_completes() {
        let (done, resp) = collect(&[b"AT\r\r\n"], 2);
        assert!(!done);
        assert_eq!(resp.outcome, AtOutcome::Lines);

        let (done, resp) = collect(&[b"ATI\r\r\nQuectel\r\n"], 2);
        assert!(done);
        assert_eq!(resp.lines, vec!["ATI", "Quectel"]);
    }

    #[test]
    fn search_and_info_lines() {
        let (_, resp) = collect(&[b"ATI\r\r\nQuectel\r\nEC25\r\nRevision: EC25EFAR06A06M4G\r\n\r\nOK\r\n"], 0);
        assert!(resp.search("OK", 0));
        assert!(resp.search("OK", 5));
        assert!(!resp.search("OK", 4));
        assert!(!resp.search("ERROR", 0));
        let info: Vec<&str> = resp.info_lines().collect();
        assert_eq!(info, vec!["Quectel", "EC25", "Revision: EC25EFAR06A06M4G"]);
    }

    #[test]
    fn into_ok_reports_rejection() {
        let (_, resp) = collect(&[b"\r\nERROR\r\n"], 0);
        let err = resp.into_ok("AT+QSCLK=1\r").unwrap_err();
        match err {
            MuxError::NegotiationFailure { command, response } => {
                assert_eq!(command, "AT+QSCLK=1");
                assert_eq!(response, "ERROR");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn signal_strength_from_csq() {
        let (_, resp) = collect(&[b"\r\n+CSQ: 20,99\r\n\r\nOK\r\n"], 0);
        let s = SignalStrength::parse(&resp).unwrap();
        assert_eq!(s.rssi, 20);
        assert_eq!(s.dbm, Some(-73));

        let unknown = SignalStrength::from_rssi(99);
        assert!(!unknown.is_valid());
        assert_eq!(SignalStrength::from_rssi(0).dbm, Some(-113));
        assert_eq!(SignalStrength::from_rssi(31).dbm, Some(-51));
    }
}
