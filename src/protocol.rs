// src/protocol.rs - Wire format for the time request/response exchange
//!
//! Request: one ASCII line whose trimmed content is `GET_TIME`.
//! Response: 15 ASCII bytes, `S` followed by `YYYYMMDDHHMMSS`, no terminator.

use crate::clock::TimeSource;
use crate::error::ProtocolError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

/// The only request the device sends.
pub const TRIGGER_COMMAND: &str = "GET_TIME";

/// Type tag marking a time payload.
pub const RESPONSE_TAG: char = 'S';

pub const RESPONSE_LEN: usize = 15;

/// Timestamp carried by a response, encoded as `S` + `YYYYMMDDHHMMSS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeResponse {
    timestamp: NaiveDateTime,
}

impl TimeResponse {
    /// Wraps a local time. Years outside `0..=9999` cannot be represented in 14 digits.
    pub fn new(timestamp: NaiveDateTime) -> Result<Self, ProtocolError> {
        let year = timestamp.year();
        if !(0..=9999).contains(&year) {
            return Err(ProtocolError::YearOutOfRange(year));
        }
        Ok(Self { timestamp })
    }

    /// Samples the clock now; the response represents the instant it was generated.
    pub fn now(clock: &dyn TimeSource) -> Result<Self, ProtocolError> {
        Self::new(clock.now())
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn encode(&self) -> String {
        let t = self.timestamp;
        format!(
            "{}{:04}{:02}{:02}{:02}{:02}{:02}",
            RESPONSE_TAG,
            t.year(),
            t.month(),
            t.day(),
            t.hour(),
            t.minute(),
            t.second()
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Parses an encoded response back into its timestamp.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::Malformed(text.to_string());

        if text.len() != RESPONSE_LEN {
            return Err(malformed());
        }
        let digits = text.strip_prefix(RESPONSE_TAG).ok_or_else(malformed)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        let field = |range: std::ops::Range<usize>| -> u32 {
            // All-ASCII-digit slices of at most four characters always parse.
            digits[range].parse().unwrap_or_default()
        };
        let date = NaiveDate::from_ymd_opt(field(0..4) as i32, field(4..6), field(6..8))
            .ok_or_else(malformed)?;
        let timestamp = date
            .and_hms_opt(field(8..10), field(10..12), field(12..14))
            .ok_or_else(malformed)?;
        Ok(Self { timestamp })
    }
}

impl fmt::Display for TimeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Requests understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetTime,
}

impl Command {
    pub fn execute(&self, clock: &dyn TimeSource) -> Result<TimeResponse, ProtocolError> {
        match self {
            Command::GetTime => TimeResponse::now(clock),
        }
    }
}

/// Mapping from request text to command.
#[derive(Debug, Clone)]
pub struct CommandTable {
    entries: Vec<(&'static str, Command)>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// The table the device speaks: `GET_TIME` only.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(TRIGGER_COMMAND, Command::GetTime);
        table
    }

    /// Adds or replaces the command bound to `text`.
    pub fn register(&mut self, text: &'static str, command: Command) {
        match self.entries.iter_mut().find(|(name, _)| *name == text) {
            Some(entry) => entry.1 = command,
            None => self.entries.push((text, command)),
        }
    }

    /// Exact, case-sensitive match against an already trimmed line.
    pub fn lookup(&self, line: &str) -> Option<Command> {
        self.entries
            .iter()
            .find(|(name, _)| *name == line)
            .map(|(_, command)| *command)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Decodes one received line as UTF-8 and strips surrounding whitespace and terminators.
pub fn decode_line(raw: &[u8]) -> Result<&str, ProtocolError> {
    Ok(std::str::from_utf8(raw)?.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_encode_reference_example() {
        let response = TimeResponse::new(at(2025, 1, 1, 12, 0, 0)).unwrap();
        assert_eq!(response.encode(), "S20250101120000");
        assert_eq!(response.to_bytes(), b"S20250101120000".to_vec());
        assert_eq!(response.to_string(), "S20250101120000");
    }

    #[test]
    fn test_encode_pads_every_field() {
        let response = TimeResponse::new(at(987, 2, 3, 4, 5, 6)).unwrap();
        assert_eq!(response.encode(), "S09870203040506");
        let response = TimeResponse::new(at(2024, 12, 31, 23, 59, 59)).unwrap();
        assert_eq!(response.encode(), "S20241231235959");
    }

    #[test]
    fn test_encoded_fields_recover_timestamp() {
        let samples = [
            at(2025, 1, 1, 12, 0, 0),
            at(2024, 2, 29, 0, 0, 0),
            at(1999, 12, 31, 23, 59, 59),
            at(2038, 1, 19, 3, 14, 7),
            at(0, 1, 1, 0, 0, 0),
            at(9999, 12, 31, 23, 59, 59),
        ];
        for t in samples {
            let encoded = TimeResponse::new(t).unwrap().encode();
            assert_eq!(encoded.len(), RESPONSE_LEN);
            assert!(encoded.starts_with('S'));
            assert!(encoded.is_ascii());
            let parsed = TimeResponse::parse(&encoded).unwrap();
            assert_eq!(parsed.timestamp(), t);
        }
    }

    #[test]
    fn test_subsecond_precision_is_dropped() {
        let t = at(2025, 6, 15, 8, 30, 45)
            + chrono::Duration::milliseconds(999);
        let encoded = TimeResponse::new(t).unwrap().encode();
        assert_eq!(encoded, "S20250615083045");
    }

    #[test]
    fn test_year_out_of_range() {
        let far = at(10000, 1, 1, 0, 0, 0);
        assert!(matches!(
            TimeResponse::new(far),
            Err(ProtocolError::YearOutOfRange(10000))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "S2025010112000",
            "S202501011200000",
            "T20250101120000",
            "S2025010112000x",
            "S20251301120000",
            "S20250230120000",
            "S20250101250000",
        ] {
            assert!(
                matches!(TimeResponse::parse(bad), Err(ProtocolError::Malformed(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_standard_table_knows_only_get_time() {
        let table = CommandTable::standard();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("GET_TIME"), Some(Command::GetTime));
        assert_eq!(table.lookup("get_time"), None);
        assert_eq!(table.lookup("GET_TIME "), None);
        assert_eq!(table.lookup("PING"), None);
        assert_eq!(table.lookup(""), None);
    }

    #[test]
    fn test_register_replaces_existing_entry() {
        let mut table = CommandTable::new();
        assert!(table.is_empty());
        table.register("GET_TIME", Command::GetTime);
        table.register("GET_TIME", Command::GetTime);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_execute_get_time_uses_clock() {
        let clock = FixedClock(at(2025, 1, 1, 12, 0, 0));
        let response = Command::GetTime.execute(&clock).unwrap();
        assert_eq!(response.encode(), "S20250101120000");
    }

    #[test]
    fn test_decode_line_trims_terminators() {
        assert_eq!(decode_line(b"GET_TIME\r\n").unwrap(), "GET_TIME");
        assert_eq!(decode_line(b"  GET_TIME\t").unwrap(), "GET_TIME");
        assert_eq!(decode_line(b"\r").unwrap(), "");
        assert_eq!(decode_line(b"GET_").unwrap(), "GET_");
    }

    #[test]
    fn test_decode_line_rejects_invalid_utf8() {
        assert!(matches!(
            decode_line(&[0x47, 0xff, 0xfe, b'\n']),
            Err(ProtocolError::Decode(_))
        ));
    }
}
