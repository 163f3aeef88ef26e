//! Plate grammar.
//!
//! A plate is two digits, one to three uppercase letters and two to four
//! digits, separated by exactly one space each (`34 AB 1234`). The same check
//! gates OCR output and manual entry.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

const PLATE_GRAMMAR: &str = r"^[0-9]{2} [A-Z]{1,3} [0-9]{2,4}$";

static PLATE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn pattern() -> &'static Regex {
    PLATE_PATTERN
        .get_or_init(|| Regex::new(PLATE_GRAMMAR).expect("plate grammar is a valid regex"))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlateError {
    #[error("not a valid plate: {0:?} (expected e.g. \"34 AB 1234\")")]
    Invalid(String),
}

/// Trim surrounding whitespace and uppercase. Inner spacing is left alone, so
/// irregular spacing still fails [`is_valid`].
pub fn normalize(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Strict grammar check on the trimmed input. Lowercase is rejected.
pub fn is_valid(text: &str) -> bool {
    pattern().is_match(text.trim())
}

/// A plate string known to satisfy the grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlateNumber(String);

impl PlateNumber {
    /// Normalize, then validate.
    pub fn parse(raw: &str) -> Result<Self, PlateError> {
        let normalized = normalize(raw);
        if is_valid(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(PlateError::Invalid(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PlateNumber {
    type Err = PlateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PlateNumber {
    type Error = PlateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PlateNumber> for String {
    fn from(value: PlateNumber) -> Self {
        value.0
    }
}

impl fmt::Display for PlateNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
