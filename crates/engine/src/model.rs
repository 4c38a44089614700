use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::SkippedFile;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A cell address. Column and row are 1-based: `B2` is `col 2, row 2`.
///
/// Field order is load-bearing: the derived `Ord` compares column first,
/// which is the Excel-natural ordering (column letters as base-26, then
/// row) used everywhere a coordinate sequence is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub col: u32,
    pub row: u32,
}

impl Coordinate {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    /// Build from 0-based (row, col) indices as used by workbook readers
    /// and writers.
    pub fn from_zero_based(row: usize, col: usize) -> Self {
        Self {
            col: col as u32 + 1,
            row: row as u32 + 1,
        }
    }

    /// 0-based (row, col) pair for workbook writers.
    pub fn zero_based(&self) -> (u32, u16) {
        (self.row - 1, (self.col - 1) as u16)
    }

    /// Parse an A1-style reference like `"B2"` or `"AA17"`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut col: u32 = 0;
        let mut row: u32 = 0;
        let mut saw_letter = false;
        let mut saw_digit = false;

        for ch in s.trim().chars() {
            if ch.is_ascii_alphabetic() {
                if saw_digit {
                    return None; // letters after digits: not a plain A1 ref
                }
                saw_letter = true;
                col = col
                    .checked_mul(26)?
                    .checked_add(ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
            } else if ch.is_ascii_digit() {
                saw_digit = true;
                row = row.checked_mul(10)?.checked_add(ch as u32 - '0' as u32)?;
            } else if ch == '$' {
                continue;
            } else {
                return None;
            }
        }

        if !saw_letter || !saw_digit || row == 0 || col == 0 {
            return None;
        }
        Some(Self { col, row })
    }

    /// The column part as letters (`1 → "A"`, `27 → "AA"`).
    pub fn column_letters(&self) -> String {
        let mut n = self.col;
        let mut letters = Vec::new();
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        letters.iter().rev().collect()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column_letters(), self.row)
    }
}

// ---------------------------------------------------------------------------
// Rectangles
// ---------------------------------------------------------------------------

/// An inclusive rectangle of cells, used for merged ranges and the
/// template's used range. `start` is the top-left (master) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub start: Coordinate,
    pub end: Coordinate,
}

impl CellRect {
    pub fn new(start: Coordinate, end: Coordinate) -> Self {
        Self { start, end }
    }

    pub fn master(&self) -> Coordinate {
        self.start
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        coord.col >= self.start.col
            && coord.col <= self.end.col
            && coord.row >= self.start.row
            && coord.row <= self.end.row
    }

    /// True for members other than the top-left cell.
    pub fn is_non_master_member(&self, coord: Coordinate) -> bool {
        self.contains(coord) && coord != self.start
    }

    /// Iterate every member coordinate, column-major.
    pub fn cells(&self) -> impl Iterator<Item = Coordinate> + '_ {
        let rows = self.start.row..=self.end.row;
        (self.start.col..=self.end.col)
            .flat_map(move |col| rows.clone().map(move |row| Coordinate::new(col, row)))
    }

    /// Grow to cover `coord`.
    pub fn expand_to(&mut self, coord: Coordinate) {
        self.start.col = self.start.col.min(coord.col);
        self.start.row = self.start.row.min(coord.row);
        self.end.col = self.end.col.max(coord.col);
        self.end.row = self.end.row.max(coord.row);
    }

    pub fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    pub fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }
}

// ---------------------------------------------------------------------------
// Format classification
// ---------------------------------------------------------------------------

/// Category derived once per template cell from its number-format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatCategory {
    Percentage,
    Currency,
    Number,
    Date,
    Other,
}

impl FormatCategory {
    /// Percentage cells average; everything else sums, `Date` included.
    pub fn method(&self) -> AggregationMethod {
        match self {
            Self::Percentage => AggregationMethod::Mean,
            _ => AggregationMethod::Sum,
        }
    }
}

impl fmt::Display for FormatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentage => write!(f, "percentage"),
            Self::Currency => write!(f, "currency"),
            Self::Number => write!(f, "number"),
            Self::Date => write!(f, "date"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMethod {
    Sum,
    Mean,
}

/// Per-coordinate template metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    pub category: FormatCategory,
    /// The literal number-format pattern from the template (e.g. `"0.00%"`).
    /// Empty for General.
    pub number_format: String,
    pub has_formula: bool,
}

impl FormatInfo {
    pub fn other() -> Self {
        Self {
            category: FormatCategory::Other,
            number_format: String::new(),
            has_formula: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Template model
// ---------------------------------------------------------------------------

/// The authoritative description of the template's consolidated sheet:
/// which coordinates exist, what format governs each, and which rectangles
/// are merged.
///
/// Every coordinate inside `used_range` is part of the model regardless of
/// whether it carries a value or a custom format; the range is the filter
/// applied to source files. `formats` holds entries only for cells with a
/// value, a non-default number format, or a formula.
#[derive(Debug, Clone, Default)]
pub struct TemplateModel {
    pub sheet_name: String,
    pub used_range: Option<CellRect>,
    pub formats: HashMap<Coordinate, FormatInfo>,
    pub merges: Vec<CellRect>,
}

impl TemplateModel {
    /// Whether `coord` belongs to the template's used range.
    pub fn contains(&self, coord: Coordinate) -> bool {
        self.used_range.map(|r| r.contains(coord)).unwrap_or(false)
    }

    pub fn format_of(&self, coord: Coordinate) -> Option<&FormatInfo> {
        self.formats.get(&coord)
    }

    /// Category for a coordinate, defaulting to `Other` for cells the
    /// template left unformatted.
    pub fn category_of(&self, coord: Coordinate) -> FormatCategory {
        self.formats
            .get(&coord)
            .map(|f| f.category)
            .unwrap_or(FormatCategory::Other)
    }

    /// True when `coord` sits inside a merged range but is not its master.
    /// Writers must never target such cells.
    pub fn is_merged_non_master(&self, coord: Coordinate) -> bool {
        self.merges.iter().any(|m| m.is_non_master_member(coord))
    }

    /// Replicate each merged range's master-cell format to every member,
    /// so source values landing anywhere inside the rectangle classify
    /// like the master.
    pub fn propagate_merged_formats(&mut self) {
        for merge in &self.merges {
            let Some(master) = self.formats.get(&merge.master()).cloned() else {
                continue;
            };
            for cell in merge.cells() {
                if cell != merge.master() {
                    self.formats.entry(cell).or_insert_with(|| master.clone());
                }
            }
        }
    }

    /// Number of coordinates in the used range.
    pub fn coord_count(&self) -> u64 {
        self.used_range
            .map(|r| r.width() as u64 * r.height() as u64)
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Source values
// ---------------------------------------------------------------------------

/// A raw cell value as handed over by the reading layer, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum CellScalar {
    Number(f64),
    Text(String),
    Bool(bool),
    Empty,
}

/// One normalized contribution: a coordinate, its coerced value, and the
/// label of the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub coord: Coordinate,
    pub value: Decimal,
    pub source: String,
}

// ---------------------------------------------------------------------------
// Run result
// ---------------------------------------------------------------------------

/// Outcome of a successful consolidation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub output_path: PathBuf,
    /// The template sheet that was consolidated (the workbook's active
    /// sheet), surfaced for auditability.
    pub sheet_name: String,
    pub files_processed: usize,
    pub files_skipped: Vec<SkippedFile>,
    /// Cells dropped because their text could not be coerced (lenient mode).
    pub cells_skipped: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_parse_and_display() {
        let c = Coordinate::parse("B2").unwrap();
        assert_eq!(c, Coordinate::new(2, 2));
        assert_eq!(c.to_string(), "B2");

        let aa = Coordinate::parse("AA17").unwrap();
        assert_eq!(aa.col, 27);
        assert_eq!(aa.row, 17);
        assert_eq!(aa.to_string(), "AA17");

        assert_eq!(Coordinate::parse("$C$3"), Some(Coordinate::new(3, 3)));
        assert_eq!(Coordinate::parse(""), None);
        assert_eq!(Coordinate::parse("17"), None);
        assert_eq!(Coordinate::parse("AB"), None);
        assert_eq!(Coordinate::parse("A0"), None);
        assert_eq!(Coordinate::parse("1A"), None);
    }

    #[test]
    fn coordinate_zero_based_round_trip() {
        let c = Coordinate::from_zero_based(0, 0);
        assert_eq!(c.to_string(), "A1");
        assert_eq!(c.zero_based(), (0, 0));

        let c = Coordinate::from_zero_based(9, 3);
        assert_eq!(c.to_string(), "D10");
        assert_eq!(c.zero_based(), (9, 3));
    }

    #[test]
    fn excel_natural_ordering_is_column_major() {
        let mut coords = vec![
            Coordinate::parse("B1").unwrap(),
            Coordinate::parse("A2").unwrap(),
            Coordinate::parse("AA1").unwrap(),
            Coordinate::parse("A1").unwrap(),
            Coordinate::parse("Z5").unwrap(),
        ];
        coords.sort();
        let rendered: Vec<String> = coords.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, ["A1", "A2", "B1", "Z5", "AA1"]);
    }

    #[test]
    fn rect_membership_and_master() {
        let rect = CellRect::new(
            Coordinate::parse("B10").unwrap(),
            Coordinate::parse("D10").unwrap(),
        );
        assert_eq!(rect.master().to_string(), "B10");
        assert!(rect.contains(Coordinate::parse("C10").unwrap()));
        assert!(!rect.contains(Coordinate::parse("B11").unwrap()));
        assert!(rect.is_non_master_member(Coordinate::parse("D10").unwrap()));
        assert!(!rect.is_non_master_member(Coordinate::parse("B10").unwrap()));
        assert_eq!(rect.cells().count(), 3);
    }

    #[test]
    fn merged_format_propagation() {
        let mut model = TemplateModel {
            sheet_name: "Sheet1".into(),
            used_range: Some(CellRect::new(
                Coordinate::new(1, 1),
                Coordinate::new(4, 10),
            )),
            formats: HashMap::new(),
            merges: vec![CellRect::new(
                Coordinate::parse("B10").unwrap(),
                Coordinate::parse("D10").unwrap(),
            )],
        };
        model.formats.insert(
            Coordinate::parse("B10").unwrap(),
            FormatInfo {
                category: FormatCategory::Percentage,
                number_format: "0.00%".into(),
                has_formula: false,
            },
        );

        model.propagate_merged_formats();

        assert_eq!(
            model.category_of(Coordinate::parse("C10").unwrap()),
            FormatCategory::Percentage
        );
        assert_eq!(
            model.format_of(Coordinate::parse("D10").unwrap()).unwrap().number_format,
            "0.00%"
        );
        assert!(model.is_merged_non_master(Coordinate::parse("C10").unwrap()));
        assert!(!model.is_merged_non_master(Coordinate::parse("B10").unwrap()));
    }

    #[test]
    fn category_defaults_to_other() {
        let model = TemplateModel {
            sheet_name: "Sheet1".into(),
            used_range: Some(CellRect::new(Coordinate::new(1, 1), Coordinate::new(2, 2))),
            ..Default::default()
        };
        assert_eq!(model.category_of(Coordinate::new(1, 1)), FormatCategory::Other);
        assert!(model.contains(Coordinate::new(2, 2)));
        assert!(!model.contains(Coordinate::new(3, 1)));
    }
}
