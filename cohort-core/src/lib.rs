//! Fundamental types shared across the Cohort allocator crates.

use std::borrow::Borrow;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of digits carried by the counter suffix of a patient identifier.
pub const SUFFIX_WIDTH: usize = 4;

/// Attempts made before a persistent counter bootstrap conflict is escalated.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Identifier of a clinical form. Each form owns an independent counter sequence.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(String);

impl FormId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FormId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for FormId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl AsRef<str> for FormId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FormId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Extract the counter embedded at the end of a patient identifier.
///
/// Matches identifiers ending in a hyphen followed by exactly [`SUFFIX_WIDTH`]
/// ASCII digits (`S-0001-0007` yields `7`). Anything else yields `None`,
/// including longer digit runs such as `S-12345`.
pub fn legacy_suffix(identifier: &str) -> Option<u64> {
    let bytes = identifier.as_bytes();
    if bytes.len() < SUFFIX_WIDTH + 1 {
        return None;
    }
    let split = bytes.len() - SUFFIX_WIDTH;
    if bytes[split - 1] != b'-' {
        return None;
    }
    let digits = &bytes[split..];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // The tail is pure ASCII at this point, so the slice lands on a char boundary.
    identifier[split..].parse::<u64>().ok()
}

/// Render a counter value the way it appears at the end of a patient identifier.
pub fn format_suffix(value: u64) -> String {
    format!("{value:0width$}", width = SUFFIX_WIDTH)
}

/// Returns true for names safe to splice into SQL unquoted (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trailing_four_digit_suffix() {
        assert_eq!(legacy_suffix("S-0001-0007"), Some(7));
        assert_eq!(legacy_suffix("S-0001-0001"), Some(1));
        assert_eq!(legacy_suffix("-9999"), Some(9999));
        assert_eq!(legacy_suffix("ABC-0000"), Some(0));
    }

    #[test]
    fn rejects_identifiers_outside_the_convention() {
        assert_eq!(legacy_suffix("S-0001-XXXX"), None);
        assert_eq!(legacy_suffix("S-12345"), None);
        assert_eq!(legacy_suffix("S-123"), None);
        assert_eq!(legacy_suffix("S0001"), None);
        assert_eq!(legacy_suffix("0001"), None);
        assert_eq!(legacy_suffix(""), None);
        assert_eq!(legacy_suffix("S-0001 "), None);
        assert_eq!(legacy_suffix("S-00é1"), None);
        assert_eq!(legacy_suffix("S-٠٠٠١"), None);
    }

    #[test]
    fn pads_to_suffix_width() {
        assert_eq!(format_suffix(8), "0008");
        assert_eq!(format_suffix(1234), "1234");
        assert_eq!(format_suffix(12345), "12345");
    }

    #[test]
    fn recognizes_plain_sql_identifiers() {
        assert!(is_sql_identifier("patients"));
        assert!(is_sql_identifier("_patient_rows2"));
        assert!(!is_sql_identifier("2patients"));
        assert!(!is_sql_identifier("patients;"));
        assert!(!is_sql_identifier("pat ients"));
        assert!(!is_sql_identifier(""));
    }

    #[test]
    fn form_id_serializes_as_plain_string() {
        let form = FormId::from("F1");
        assert_eq!(serde_json::to_string(&form).unwrap(), "\"F1\"");
        let parsed: FormId = serde_json::from_str("\"F2\"").unwrap();
        assert_eq!(parsed.as_str(), "F2");
        assert_eq!(parsed.to_string(), "F2");
    }
}
