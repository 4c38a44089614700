//! Source reading: one workbook in, a batch of normalized contributions
//! out. Sources are opened read-only, iterated over used cells only, and
//! closed before the worker picks up the next file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader as CalamineReader};
use log::{debug, warn};

use sheetfold_engine::coerce::coerce;
use sheetfold_engine::error::SkipReason;
use sheetfold_engine::model::{CellScalar, Coordinate, SourceRecord, TemplateModel};
use sheetfold_engine::progress::CancelToken;

use crate::discover::source_label;

/// Everything read from one source file.
#[derive(Debug)]
pub struct SourceBatch {
    pub label: String,
    pub path: PathBuf,
    pub records: Vec<SourceRecord>,
    /// Cells whose text refused to parse, with the offending value.
    pub coerce_failures: Vec<(Coordinate, String)>,
}

/// Why a source produced no batch.
#[derive(Debug)]
pub enum ReadError {
    /// Recoverable in lenient mode; recorded against the file.
    Skip(SkipReason),
    /// Strict structural validation failed (only raised when enabled).
    Structure {
        template_size: (u32, u32),
        source_size: (u32, u32),
    },
}

/// Read one source against the template filter. Returns `Ok(None)` when
/// cancellation was observed mid-read.
pub fn read_source(
    path: &Path,
    model: &TemplateModel,
    strict_structure: bool,
    cancel: &CancelToken,
) -> Result<Option<SourceBatch>, ReadError> {
    let label = source_label(path);

    let mut workbook =
        open_workbook_auto(path).map_err(|e| ReadError::Skip(classify_open_error(&e)))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet_name) = sheet_names.first().cloned() else {
        return Err(ReadError::Skip(SkipReason::Corrupt));
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|_| ReadError::Skip(SkipReason::Corrupt))?;

    if strict_structure {
        let (rows, cols) = range.get_size();
        let template_size = model
            .used_range
            .map(|r| (r.height(), r.width()))
            .unwrap_or((0, 0));
        let source_size = (rows as u32, cols as u32);
        if source_size != template_size {
            return Err(ReadError::Structure {
                template_size,
                source_size,
            });
        }
    }

    // Formula cells are skipped wholesale: they usually reference cells
    // that are themselves being consolidated and would double-count.
    let mut formula_coords: HashSet<Coordinate> = HashSet::new();
    if let Ok(formulas) = workbook.worksheet_formula(&sheet_name) {
        let (start_row, start_col) = formulas.start().unwrap_or((0, 0));
        for (row, col, text) in formulas.used_cells() {
            if !text.is_empty() {
                formula_coords.insert(Coordinate::from_zero_based(
                    start_row as usize + row,
                    start_col as usize + col,
                ));
            }
        }
    }

    let mut records = Vec::new();
    let mut coerce_failures = Vec::new();

    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let mut current_row = usize::MAX;
    for (row, col, data) in range.used_cells() {
        if row != current_row {
            current_row = row;
            if cancel.is_cancelled() {
                return Ok(None);
            }
        }

        let coord = Coordinate::from_zero_based(start_row as usize + row, start_col as usize + col);
        if !model.contains(coord) {
            continue;
        }
        if formula_coords.contains(&coord) {
            continue;
        }

        let scalar = match data {
            Data::Empty => continue,
            Data::String(s) => CellScalar::Text(s.clone()),
            Data::Float(f) => CellScalar::Number(*f),
            Data::Int(i) => CellScalar::Number(*i as f64),
            Data::Bool(b) => CellScalar::Bool(*b),
            // Dates, durations and error values have no meaningful sum
            Data::DateTime(_) | Data::DateTimeIso(_) | Data::DurationIso(_) | Data::Error(_) => {
                continue
            }
        };

        match coerce(&scalar, model.category_of(coord)) {
            Ok(Some(value)) => records.push(SourceRecord {
                coord,
                value,
                source: label.clone(),
            }),
            Ok(None) => {}
            Err(err) => {
                warn!("{label}: cell {coord}: {err}");
                coerce_failures.push((coord, err.raw));
            }
        }
    }

    debug!(
        "{label}: {} contributions, {} coercion failures",
        records.len(),
        coerce_failures.len()
    );

    Ok(Some(SourceBatch {
        label,
        path: path.to_path_buf(),
        records,
        coerce_failures,
    }))
}

fn classify_open_error(err: &calamine::Error) -> SkipReason {
    match err {
        calamine::Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            SkipReason::AccessDenied
        }
        calamine::Error::Io(_) => SkipReason::Io,
        calamine::Error::Xlsx(calamine::XlsxError::Password) => SkipReason::Password,
        calamine::Error::Xls(calamine::XlsError::Password) => SkipReason::Password,
        _ => SkipReason::Corrupt,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_xlsxwriter::{Format, Formula, Workbook};
    use sheetfold_engine::model::{CellRect, FormatCategory, FormatInfo};
    use std::collections::HashMap;
    use std::str::FromStr;

    fn model_with(formats: &[(&str, FormatCategory)], last: &str) -> TemplateModel {
        let mut map = HashMap::new();
        for (coord, category) in formats {
            map.insert(
                Coordinate::parse(coord).unwrap(),
                FormatInfo {
                    category: *category,
                    number_format: String::new(),
                    has_formula: false,
                },
            );
        }
        TemplateModel {
            sheet_name: "Sheet1".into(),
            used_range: Some(CellRect::new(
                Coordinate::new(1, 1),
                Coordinate::parse(last).unwrap(),
            )),
            formats: map,
            merges: vec![],
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn reads_values_inside_template_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_number(1, 1, 100.0).unwrap(); // B2, inside
        ws.write_number(9, 9, 5.0).unwrap(); // J10, outside
        wb.save(&path).unwrap();

        let model = model_with(&[("B2", FormatCategory::Number)], "C3");
        let batch = read_source(&path, &model, false, &CancelToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(batch.label, "s1");
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].coord.to_string(), "B2");
        assert_eq!(batch.records[0].value, dec("100"));
        assert!(batch.coerce_failures.is_empty());
    }

    #[test]
    fn formula_cells_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subtotals.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_formula(0, 0, Formula::new("=SUM(A2:A3)").set_result("50"))
            .unwrap(); // A1
        ws.write_number(1, 0, 20.0).unwrap(); // A2
        ws.write_number(2, 0, 30.0).unwrap(); // A3
        wb.save(&path).unwrap();

        let model = model_with(
            &[
                ("A1", FormatCategory::Number),
                ("A2", FormatCategory::Number),
                ("A3", FormatCategory::Number),
            ],
            "C5",
        );
        let batch = read_source(&path, &model, false, &CancelToken::new())
            .unwrap()
            .unwrap();

        let coords: Vec<String> = batch.records.iter().map(|r| r.coord.to_string()).collect();
        assert_eq!(coords, ["A2", "A3"]);
    }

    #[test]
    fn percent_text_normalizes_through_template_category() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pct.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_string(2, 2, "82.5%").unwrap(); // C3
        ws.write_number_with_format(3, 2, 0.5, &Format::new().set_num_format("0.00%"))
            .unwrap(); // C4
        wb.save(&path).unwrap();

        let model = model_with(
            &[
                ("C3", FormatCategory::Percentage),
                ("C4", FormatCategory::Percentage),
            ],
            "E5",
        );
        let batch = read_source(&path, &model, false, &CancelToken::new())
            .unwrap()
            .unwrap();

        let by_coord: HashMap<String, Decimal> = batch
            .records
            .iter()
            .map(|r| (r.coord.to_string(), r.value))
            .collect();
        assert_eq!(by_coord["C3"], dec("82.5"));
        assert_eq!(by_coord["C4"], dec("50"));
    }

    #[test]
    fn unparseable_text_is_a_coerce_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_string(0, 0, "pending").unwrap(); // A1
        wb.save(&path).unwrap();

        let model = model_with(&[("A1", FormatCategory::Number)], "B2");
        let batch = read_source(&path, &model, false, &CancelToken::new())
            .unwrap()
            .unwrap();

        assert!(batch.records.is_empty());
        assert_eq!(batch.coerce_failures.len(), 1);
        assert_eq!(batch.coerce_failures[0].0.to_string(), "A1");
        assert_eq!(batch.coerce_failures[0].1, "pending");
    }

    #[test]
    fn strict_structure_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_number(0, 0, 1.0).unwrap();
        ws.write_number(7, 7, 1.0).unwrap(); // 8x8 used range
        wb.save(&path).unwrap();

        let model = model_with(&[("A1", FormatCategory::Number)], "C3"); // 3x3
        let err = read_source(&path, &model, true, &CancelToken::new()).unwrap_err();
        match err {
            ReadError::Structure {
                template_size,
                source_size,
            } => {
                assert_eq!(template_size, (3, 3));
                assert_eq!(source_size, (8, 8));
            }
            other => panic!("expected structure mismatch, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_stops_the_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_number(0, 0, 1.0).unwrap();
        wb.save(&path).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let model = model_with(&[("A1", FormatCategory::Number)], "B2");
        let outcome = read_source(&path, &model, false, &cancel).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn unreadable_file_maps_to_skip_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.xlsx");
        std::fs::write(&path, b"not a workbook at all").unwrap();

        let model = model_with(&[("A1", FormatCategory::Number)], "B2");
        let err = read_source(&path, &model, false, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, ReadError::Skip(SkipReason::Corrupt)));
    }
}
