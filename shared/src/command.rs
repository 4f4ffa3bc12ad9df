//! Outbound command grammar
//!
//! Validates a candidate command string and normalizes it to the canonical
//! text published on the device command topic. Grammar, first match wins:
//!
//! ```text
//! RELAY:ON | RELAY:OFF | AUTO:ON | AUTO:OFF
//! LCD:CLEAR | LCD:STANDBY:ON | LCD:STANDBY:OFF
//! LCD:STANDBY:<line2>|<line3>      payload cut to 120 chars, lines to 20
//! LCD:STABLESEC:<n>                n finite, floored, clamped to [2, 60]
//! ```

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::limits;

const STANDBY_PREFIX: &str = "LCD:STANDBY:";
const STABLE_SEC_PREFIX: &str = "LCD:STABLESEC:";

const ALLOWED_EXACT: [&str; 7] = [
    "RELAY:ON",
    "RELAY:OFF",
    "AUTO:ON",
    "AUTO:OFF",
    "LCD:CLEAR",
    "LCD:STANDBY:ON",
    "LCD:STANDBY:OFF",
];

/// Reasons a candidate command is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty cmd")]
    Empty,

    #[error("cmd must be a string")]
    NotAString,

    #[error("not finite")]
    NotFinite,

    #[error("unrecognized command")]
    Unrecognized,
}

/// Standby text derived from an `LCD:STANDBY:<line2>|<line3>` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandbyMessage {
    pub line2: String,
    pub line3: String,
}

/// A validated, canonical command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub command: String,
    /// Set for standby-text commands; the caller persists and retains it
    pub standby: Option<StandbyMessage>,
}

impl CommandSpec {
    fn plain(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            standby: None,
        }
    }
}

/// Validate and normalize a candidate command
pub fn validate(candidate: &str) -> Result<CommandSpec, ValidationError> {
    let cmd = candidate.trim();
    if cmd.is_empty() {
        return Err(ValidationError::Empty);
    }

    if ALLOWED_EXACT.contains(&cmd) {
        return Ok(CommandSpec::plain(cmd));
    }

    if let Some(payload) = cmd.strip_prefix(STANDBY_PREFIX) {
        let clipped = truncate_chars(payload, limits::STANDBY_PAYLOAD_MAX_CHARS);
        return Ok(CommandSpec {
            command: format!("{}{}", STANDBY_PREFIX, clipped),
            standby: Some(split_standby(clipped)),
        });
    }

    if let Some(arg) = cmd.strip_prefix(STABLE_SEC_PREFIX) {
        let seconds = parse_finite(arg).ok_or(ValidationError::NotFinite)?;
        let seconds = (seconds.floor() as i64).clamp(limits::STABLE_SEC_MIN, limits::STABLE_SEC_MAX);
        return Ok(CommandSpec::plain(format!("{}{}", STABLE_SEC_PREFIX, seconds)));
    }

    Err(ValidationError::Unrecognized)
}

/// Validate a command taken from a JSON request body
pub fn validate_json(candidate: &Value) -> Result<CommandSpec, ValidationError> {
    match candidate {
        Value::String(cmd) => validate(cmd),
        _ => Err(ValidationError::NotAString),
    }
}

/// Split a standby payload into its two display lines
fn split_standby(payload: &str) -> StandbyMessage {
    let (line2, line3) = payload.split_once('|').unwrap_or((payload, ""));
    StandbyMessage {
        line2: truncate_chars(line2.trim(), limits::LCD_LINE_MAX_CHARS).to_string(),
        line3: truncate_chars(line3.trim(), limits::LCD_LINE_MAX_CHARS).to_string(),
    }
}

/// Blank reads as zero
fn parse_finite(arg: &str) -> Option<f64> {
    let arg = arg.trim();
    let n = if arg.is_empty() { 0.0 } else { arg.parse::<f64>().ok()? };
    n.is_finite().then_some(n)
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_commands_pass_through() {
        for cmd in ALLOWED_EXACT {
            let spec = validate(cmd).unwrap();
            assert_eq!(spec.command, cmd);
            assert_eq!(spec.standby, None);
        }
        assert_eq!(validate("  RELAY:ON \n").unwrap().command, "RELAY:ON");
    }

    #[test]
    fn test_case_sensitive() {
        assert_eq!(validate("relay:on"), Err(ValidationError::Unrecognized));
    }

    #[test]
    fn test_empty_and_non_string() {
        assert_eq!(validate(""), Err(ValidationError::Empty));
        assert_eq!(validate("   \t"), Err(ValidationError::Empty));
        assert_eq!(validate_json(&Value::from(5)), Err(ValidationError::NotAString));
        assert_eq!(validate_json(&Value::Null), Err(ValidationError::NotAString));
        assert_eq!(validate_json(&Value::from("AUTO:OFF")).unwrap().command, "AUTO:OFF");
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(validate("REBOOT"), Err(ValidationError::Unrecognized));
        assert_eq!(validate("RELAY:TOGGLE"), Err(ValidationError::Unrecognized));
        assert_eq!(ValidationError::Unrecognized.to_string(), "unrecognized command");
    }

    #[test]
    fn test_stable_sec_clamped() {
        assert_eq!(validate("LCD:STABLESEC:1000").unwrap().command, "LCD:STABLESEC:60");
        assert_eq!(validate("LCD:STABLESEC:1").unwrap().command, "LCD:STABLESEC:2");
        assert_eq!(validate("LCD:STABLESEC:-40").unwrap().command, "LCD:STABLESEC:2");
        assert_eq!(validate("LCD:STABLESEC:7.9").unwrap().command, "LCD:STABLESEC:7");
        assert_eq!(validate("LCD:STABLESEC:").unwrap().command, "LCD:STABLESEC:2");
    }

    #[test]
    fn test_stable_sec_not_finite() {
        assert_eq!(validate("LCD:STABLESEC:abc"), Err(ValidationError::NotFinite));
        assert_eq!(validate("LCD:STABLESEC:inf"), Err(ValidationError::NotFinite));
        assert_eq!(validate("LCD:STABLESEC:NaN"), Err(ValidationError::NotFinite));
        assert_eq!(ValidationError::NotFinite.to_string(), "not finite");
    }

    #[test]
    fn test_standby_lines_truncated() {
        let cmd = format!("LCD:STANDBY:{}|{}", "x".repeat(50), "y".repeat(50));
        let spec = validate(&cmd).unwrap();
        // 101-char payload is under the cap and kept whole
        assert_eq!(spec.command, cmd);

        let standby = spec.standby.unwrap();
        assert_eq!(standby.line2, "x".repeat(20));
        assert_eq!(standby.line3, "y".repeat(20));
    }

    #[test]
    fn test_standby_payload_capped() {
        let cmd = format!("LCD:STANDBY:{}", "z".repeat(200));
        let spec = validate(&cmd).unwrap();
        assert_eq!(spec.command.len(), "LCD:STANDBY:".len() + 120);

        // The separator past the cap is cut off with the payload
        let cmd = format!("LCD:STANDBY:{}|tail", "a".repeat(130));
        let standby = validate(&cmd).unwrap().standby.unwrap();
        assert_eq!(standby.line2, "a".repeat(20));
        assert_eq!(standby.line3, "");
    }

    #[test]
    fn test_standby_split_variants() {
        let standby = validate("LCD:STANDBY: Hello | World ").unwrap().standby.unwrap();
        // Each line is trimmed on its own
        assert_eq!(standby.line2, "Hello");
        assert_eq!(standby.line3, "World");

        let standby = validate("LCD:STANDBY:|only three").unwrap().standby.unwrap();
        assert_eq!(standby.line2, "");
        assert_eq!(standby.line3, "only three");

        let standby = validate("LCD:STANDBY:no pipe").unwrap().standby.unwrap();
        assert_eq!(standby.line2, "no pipe");
        assert_eq!(standby.line3, "");

        let standby = validate("LCD:STANDBY:a|b|c").unwrap().standby.unwrap();
        assert_eq!(standby.line3, "b|c");
    }

    #[test]
    fn test_standby_counts_characters_not_bytes() {
        let cmd = format!("LCD:STANDBY:{}", "é".repeat(25));
        let standby = validate(&cmd).unwrap().standby.unwrap();
        assert_eq!(standby.line2.chars().count(), 20);
    }

    #[test]
    fn test_standby_on_off_are_exact() {
        assert_eq!(validate("LCD:STANDBY:ON").unwrap().standby, None);
        assert_eq!(validate("LCD:STANDBY:OFF").unwrap().standby, None);
    }

    #[test]
    fn test_idempotent() {
        for cmd in ["RELAY:OFF", "LCD:STABLESEC:60", "LCD:STANDBY:hi|there"] {
            let first = validate(cmd).unwrap();
            let second = validate(cmd).unwrap();
            assert_eq!(first, second);
            assert_eq!(validate(&first.command).unwrap(), first);
        }
    }
}
