use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::classify::CURRENCY_GLYPHS;
use crate::model::{CellScalar, FormatCategory};

/// Non-empty text that should have parsed as a number under the declared
/// category but did not. Whether this skips the cell or aborts the run is
/// the caller's policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoerceError {
    pub raw: String,
}

impl fmt::Display for CoerceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot coerce '{}' to a number", self.raw)
    }
}

impl std::error::Error for CoerceError {}

/// Normalize a raw cell value under the template's format category.
///
/// Returns `Ok(None)` for values that simply do not participate (blanks,
/// booleans, dates), `Ok(Some(v))` for a normalized decimal, and
/// `Err(CoerceError)` for non-empty text that failed to parse.
///
/// Percentage values are percent points throughout: `"82.5%"` and `0.825`
/// both normalize to `82.5`.
pub fn coerce(value: &CellScalar, hint: FormatCategory) -> Result<Option<Decimal>, CoerceError> {
    match value {
        CellScalar::Empty | CellScalar::Bool(_) => Ok(None),
        CellScalar::Number(n) => {
            if !n.is_finite() {
                return Ok(None);
            }
            // Through the string form, so 0.1 arrives as exactly 0.1
            let Some(d) = decimal_from_f64(*n) else {
                return Ok(None);
            };
            Ok(Some(match hint {
                FormatCategory::Percentage => normalize_percent_points(d),
                _ => d,
            }))
        }
        CellScalar::Text(s) => coerce_text(s, hint),
    }
}

fn coerce_text(s: &str, hint: FormatCategory) -> Result<Option<Decimal>, CoerceError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let fail = || CoerceError { raw: s.to_string() };

    match hint {
        FormatCategory::Percentage => {
            if let Some(prefix) = trimmed.strip_suffix('%') {
                // "82.5%" is literal percent points; no normalization
                parse_plain(prefix).map(Some).ok_or_else(fail)
            } else {
                parse_plain(trimmed)
                    .map(|d| Some(normalize_percent_points(d)))
                    .ok_or_else(fail)
            }
        }
        FormatCategory::Currency => {
            let stripped: String = trimmed
                .chars()
                .filter(|c| !CURRENCY_GLYPHS.contains(c))
                .collect();
            parse_plain(&stripped).map(Some).ok_or_else(fail)
        }
        FormatCategory::Number | FormatCategory::Date => {
            parse_plain(trimmed).map(Some).ok_or_else(fail)
        }
        FormatCategory::Other => {
            if let Some(d) = parse_plain(trimmed) {
                return Ok(Some(d));
            }
            if let Some(prefix) = trimmed.strip_suffix('%') {
                if let Some(d) = parse_plain(prefix) {
                    return Ok(Some(d));
                }
            }
            Err(fail())
        }
    }
}

/// Parse text after removing thousands separators and spaces.
fn parse_plain(s: &str) -> Option<Decimal> {
    let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .ok()
        .or_else(|| Decimal::from_scientific(&cleaned).ok())
}

fn decimal_from_f64(n: f64) -> Option<Decimal> {
    let repr = n.to_string();
    Decimal::from_str(&repr)
        .ok()
        .or_else(|| Decimal::from_scientific(&repr).ok())
}

/// Numeric percentage inputs between 0 and 1 are decimal encodings
/// (`0.825` means 82.5%); anything else is already percent points.
fn normalize_percent_points(d: Decimal) -> Decimal {
    if d >= Decimal::ZERO && d <= Decimal::ONE {
        d * Decimal::ONE_HUNDRED
    } else {
        d
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
