use crate::model::FormatCategory;

/// Currency glyphs recognized in number-format strings and cell text.
pub const CURRENCY_GLYPHS: [char; 13] = [
    '$', '€', '£', '¥', '₽', '₹', '₩', '₪', '₦', '₡', '₨', '₫', '₱',
];

const CURRENCY_WORDS: [&str; 6] = ["currency", "money", "dollar", "euro", "pound", "yen"];
const NUMBER_WORDS: [&str; 5] = ["general", "number", "numeric", "decimal", "standard"];
const DATE_WORDS: [&str; 3] = ["date", "time", "timestamp"];

/// Classify a number-format string into an aggregation category.
///
/// Rules are applied in order, first match wins:
/// percent sign → Percentage; currency glyph or keyword → Currency;
/// numeric pattern or keyword → Number; date/time pattern → Date;
/// anything else → Other.
pub fn classify(format: &str) -> FormatCategory {
    let trimmed = format.trim();
    if trimmed.is_empty() {
        return FormatCategory::Other;
    }
    let lower = trimmed.to_lowercase();

    if trimmed.contains('%') {
        return FormatCategory::Percentage;
    }
    if trimmed.chars().any(|c| CURRENCY_GLYPHS.contains(&c))
        || CURRENCY_WORDS.iter().any(|w| lower.contains(w))
    {
        return FormatCategory::Currency;
    }
    if is_numeric_pattern(&lower) {
        return FormatCategory::Number;
    }
    if is_date_pattern(&lower) {
        return FormatCategory::Date;
    }
    FormatCategory::Other
}

fn is_numeric_pattern(lower: &str) -> bool {
    if NUMBER_WORDS.iter().any(|w| lower.contains(w)) {
        return true;
    }
    // "0", "0.0", "0.00" and longer-decimal variants, "#,##0", "#,##0.00"
    lower == "0" || lower.contains("#,##0") || lower.contains("0.0") || lower.contains("0.00e")
}

fn is_date_pattern(lower: &str) -> bool {
    if DATE_WORDS.iter().any(|w| lower.contains(w)) {
        return true;
    }
    // mm/dd/yyyy, m/d/yy, ISO dates, and time-only patterns like h:mm
    lower.contains("yy") || lower.contains("m/d") || lower.contains("d/m") || lower.contains("h:mm")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
