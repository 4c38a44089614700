use rust_decimal::Decimal;

use crate::aggregate::Accumulator;
use crate::model::{AggregationMethod, Coordinate, FormatCategory};

/// Hard cap for a cell comment; longer text is cut with a marker.
pub const MAX_COMMENT_LEN: usize = 32_000;

const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Render a decimal with comma thousands separators and a fixed number of
/// decimal places: `1234567.5` → `"1,234,567.50"`.
pub fn comma_format(value: Decimal, decimals: u32) -> String {
    let rounded = value.round_dp(decimals);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let plain = rounded.abs().to_string();
    let (int_part, frac_part) = match plain.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (plain, String::new()),
    };

    let mut grouped = String::new();
    let digits: Vec<char> = int_part.chars().collect();
    for (i, ch) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*ch);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if decimals > 0 {
        out.push('.');
        out.push_str(&frac_part);
        for _ in frac_part.len()..decimals as usize {
            out.push('0');
        }
    }
    out
}

/// One contributor line value, rendered per the cell's category.
fn render_value(value: Decimal, category: FormatCategory) -> String {
    match category {
        FormatCategory::Percentage => format!("{}%", comma_format(value, 2)),
        FormatCategory::Currency => format!("${}", comma_format(value, 2)),
        _ => comma_format(value, 2),
    }
}

/// Build the audit comment for a consolidated cell: a summary header and
/// a padded contributor table.
pub fn build_comment(
    coord: Coordinate,
    acc: &Accumulator,
    category: FormatCategory,
    exclude_zero_percent: bool,
) -> String {
    let items = acc.sorted_contributors();
    let max_name = items.iter().map(|(label, _)| label.chars().count()).max().unwrap_or(4);

    let mut text = String::from("Consolidation Summary\n");
    text.push_str(&format!("Cell: {coord}\n"));

    match acc.method {
        AggregationMethod::Mean => {
            let count = acc.mean_denominator();
            let nonzero = acc.nonzero_contributors();
            let avg = comma_format(acc.average(), 2);
            if exclude_zero_percent {
                text.push_str(&format!("Average: {avg}% (from {count} files with values"));
                if nonzero != count {
                    text.push_str(&format!(", {nonzero} non-zero"));
                }
                text.push_str(", zero values excluded)\n\n");
            } else {
                // Zero-valued submissions count as empty, not as reporters
                let with_values = nonzero;
                text.push_str(&format!("Average: {avg}% (from {count} files"));
                if with_values < count {
                    text.push_str(&format!(
                        ", {with_values} with values, {} empty",
                        count - with_values
                    ));
                }
                text.push_str(")\n\n");
            }
        }
        AggregationMethod::Sum => {
            text.push_str(&format!("Total: {}\n\n", render_value(acc.total, category)));
        }
    }

    text.push_str("Contributors (file  |  value)\n");
    text.push_str(&"-".repeat(26usize.max(max_name + 10)));
    text.push('\n');

    let lines: Vec<String> = items
        .iter()
        .map(|(label, value)| {
            let pad = " ".repeat(max_name - label.chars().count());
            format!("{label}{pad}  |  {}", render_value(*value, category))
        })
        .collect();
    text.push_str(&lines.join("\n"));

    truncate_comment(text)
}

fn truncate_comment(text: String) -> String {
    if text.chars().count() <= MAX_COMMENT_LEN {
        return text;
    }
    let mut out: String = text.chars().take(MAX_COMMENT_LEN - 21).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Comment box size in pixels, grown with the label width and the number
/// of contributor lines.
pub fn comment_geometry(max_label_len: usize, contributor_count: usize) -> (u32, u32) {
    let width = 520.min(200 + max_label_len as u32 * 7);
    let height = 600.min(140 + contributor_count as u32 * 14);
    (width, height)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn comma_format_groups_thousands() {
        assert_eq!(comma_format(dec("1234567.5"), 2), "1,234,567.50");
        assert_eq!(comma_format(dec("100"), 2), "100.00");
        assert_eq!(comma_format(dec("0"), 2), "0.00");
        assert_eq!(comma_format(dec("-2000"), 2), "-2,000.00");
        assert_eq!(comma_format(dec("999"), 0), "999");
        assert_eq!(comma_format(dec("1234.567"), 2), "1,234.57");
    }

    #[test]
    fn sum_comment_lists_contributors_sorted_and_padded() {
        let coord = Coordinate::parse("B2").unwrap();
        let mut agg = Aggregator::new(3, false);
        agg.record(coord, AggregationMethod::Sum, "s2", dec("250.5"));
        agg.record(coord, AggregationMethod::Sum, "s1", dec("100"));

        let text = build_comment(coord, agg.get(coord).unwrap(), FormatCategory::Number, false);
        assert!(text.starts_with("Consolidation Summary\nCell: B2\nTotal: 350.50\n\n"));
        assert!(text.contains("Contributors (file  |  value)\n"));
        let s1_line = text.lines().find(|l| l.starts_with("s1")).unwrap();
        assert_eq!(s1_line, "s1  |  100.00");
        let s2_line = text.lines().find(|l| l.starts_with("s2")).unwrap();
        assert_eq!(s2_line, "s2  |  250.50");
        // Sorted: s1 before s2
        assert!(text.find("s1").unwrap() < text.find("s2").unwrap());
    }

    #[test]
    fn currency_comment_renders_dollar_totals() {
        let coord = Coordinate::parse("D4").unwrap();
        let mut agg = Aggregator::new(2, false);
        agg.record(coord, AggregationMethod::Sum, "a", dec("1234.5"));
        agg.record(coord, AggregationMethod::Sum, "b", dec("765.5"));

        let text = build_comment(coord, agg.get(coord).unwrap(), FormatCategory::Currency, false);
        assert!(text.contains("Total: $2,000.00"));
        assert!(text.contains("a  |  $1,234.50"));
    }

    #[test]
    fn mean_comment_include_zeros_reports_empty_files() {
        let coord = Coordinate::parse("C3").unwrap();
        let mut agg = Aggregator::new(4, false);
        agg.record(coord, AggregationMethod::Mean, "a", dec("100"));
        agg.record(coord, AggregationMethod::Mean, "b", dec("50"));
        agg.record(coord, AggregationMethod::Mean, "c", dec("0"));

        let text = build_comment(coord, agg.get(coord).unwrap(), FormatCategory::Percentage, false);
        // The 0% reporter counts as empty alongside the missing file
        assert!(
            text.contains("Average: 37.50% (from 4 files, 2 with values, 2 empty)"),
            "unexpected header: {text}"
        );
        assert!(text.contains("a  |  100.00%"));
    }

    #[test]
    fn mean_comment_exclude_zeros_notes_policy() {
        let coord = Coordinate::parse("C3").unwrap();
        let mut agg = Aggregator::new(4, true);
        agg.record(coord, AggregationMethod::Mean, "a", dec("100"));
        agg.record(coord, AggregationMethod::Mean, "b", dec("50"));
        agg.record(coord, AggregationMethod::Mean, "c", dec("0"));

        let text = build_comment(coord, agg.get(coord).unwrap(), FormatCategory::Percentage, true);
        assert!(
            text.contains("Average: 75.00% (from 2 files with values, zero values excluded)"),
            "unexpected header: {text}"
        );
    }

    #[test]
    fn oversized_comment_is_truncated_with_marker() {
        let coord = Coordinate::parse("A1").unwrap();
        let mut agg = Aggregator::new(4000, false);
        for i in 0..4000 {
            agg.record(
                coord,
                AggregationMethod::Sum,
                &format!("source-file-with-a-long-name-{i:05}"),
                dec("1"),
            );
        }

        let text = build_comment(coord, agg.get(coord).unwrap(), FormatCategory::Number, false);
        assert!(text.chars().count() <= MAX_COMMENT_LEN);
        assert!(text.ends_with("... (truncated)"));
    }

    #[test]
    fn geometry_is_clamped() {
        assert_eq!(comment_geometry(4, 2), (228, 168));
        assert_eq!(comment_geometry(100, 50), (520, 600));
    }
}
