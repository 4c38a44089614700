//! Template introspection: one pass over the template workbook producing
//! both the cloneable visual model (`TemplateBook`) and the engine's
//! authoritative `TemplateModel`.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader as CalamineReader, Xlsx};
use log::{debug, info};

use sheetfold_engine::classify::classify;
use sheetfold_engine::error::ConsolidateError;
use sheetfold_engine::model::{CellRect, Coordinate, FormatInfo, TemplateModel};

use crate::styles::{
    parse_sheet_layout, parse_styles_xml, read_package_layout, read_zip_file, SheetLayout,
    StyleTable,
};

// ---------------------------------------------------------------------------
// Cloneable template representation
// ---------------------------------------------------------------------------

/// What a template cell holds.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Number(f64),
    Text(String),
    Bool(bool),
    Formula { text: String, cached: Option<f64> },
    /// Style-only cell: no value, but formatting worth cloning.
    Blank,
}

#[derive(Debug, Clone)]
pub struct TemplateCell {
    pub coord: Coordinate,
    pub content: CellContent,
    pub style: Option<usize>,
}

#[derive(Debug)]
pub struct TemplateSheet {
    pub name: String,
    /// Cells in ascending coordinate order.
    pub cells: Vec<TemplateCell>,
    pub layout: SheetLayout,
    pub used_range: Option<CellRect>,
}

impl TemplateSheet {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// The template workbook as read once at startup: every sheet's contents
/// and layout, the style table, and the VBA payload if macro-enabled.
/// Read-only after construction.
#[derive(Debug)]
pub struct TemplateBook {
    pub path: PathBuf,
    pub sheets: Vec<TemplateSheet>,
    pub active: usize,
    pub styles: StyleTable,
    pub vba_project: Option<Vec<u8>>,
}

impl TemplateBook {
    pub fn active_sheet(&self) -> &TemplateSheet {
        &self.sheets[self.active]
    }

    /// Whether the output should be macro-enabled (`.xlsm`).
    pub fn macro_enabled(&self) -> bool {
        self.vba_project.is_some()
            || self
                .path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("xlsm"))
                .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the template workbook and derive the consolidation model from its
/// active sheet.
pub fn load_template(path: &Path) -> Result<(TemplateBook, TemplateModel), ConsolidateError> {
    if !path.is_file() {
        return Err(ConsolidateError::TemplateMissing(path.to_path_buf()));
    }

    let load_err = |reason: String| ConsolidateError::TemplateLoad {
        path: path.to_path_buf(),
        reason,
    };

    // Package layer: sheet topology, styles, layout, VBA. An encrypted
    // workbook is a CFB container, so the ZIP open itself fails for those.
    let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| load_err(format!("not a workbook package (corrupt or encrypted): {e}")))?;

    let package = read_package_layout(&mut archive).map_err(load_err)?;
    let styles = match read_zip_file(&mut archive, "xl/styles.xml") {
        Ok(xml) => parse_styles_xml(&xml),
        Err(_) => StyleTable::default(),
    };

    let mut layouts = Vec::with_capacity(package.sheets.len());
    for entry in &package.sheets {
        let layout = match read_zip_file(&mut archive, &entry.part) {
            Ok(xml) => parse_sheet_layout(&xml),
            Err(_) => SheetLayout::default(),
        };
        layouts.push(layout);
    }
    drop(archive);

    // Value layer: cell contents and formulas via calamine.
    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e: calamine::XlsxError| load_err(e.to_string()))?;

    let mut sheets = Vec::with_capacity(package.sheets.len());
    for (entry, layout) in package.sheets.iter().zip(layouts) {
        let sheet = read_template_sheet(&mut workbook, &entry.name, layout);
        sheets.push(sheet);
    }

    let book = TemplateBook {
        path: path.to_path_buf(),
        sheets,
        active: package.active,
        styles,
        vba_project: package.vba_project,
    };

    let model = build_model(&book);
    info!(
        "template '{}': sheet '{}', {} coordinates, {} formatted cells, {} merges",
        path.display(),
        model.sheet_name,
        model.coord_count(),
        model.formats.len(),
        model.merges.len()
    );

    Ok((book, model))
}

fn read_template_sheet(
    workbook: &mut Xlsx<BufReader<File>>,
    name: &str,
    layout: SheetLayout,
) -> TemplateSheet {
    let mut contents: HashMap<Coordinate, CellContent> = HashMap::new();
    let mut used_range: Option<CellRect> = None;
    let touch = |range: &mut Option<CellRect>, coord: Coordinate| match range {
        Some(rect) => rect.expand_to(coord),
        None => *range = Some(CellRect::new(coord, coord)),
    };

    if let Ok(range) = workbook.worksheet_range(name) {
        let (start_row, start_col) = range.start().unwrap_or((0, 0));
        for (row, col, data) in range.used_cells() {
            let coord = Coordinate::from_zero_based(
                start_row as usize + row,
                start_col as usize + col,
            );
            let content = match data {
                Data::Empty => continue,
                Data::String(s) => CellContent::Text(s.clone()),
                Data::Float(f) => CellContent::Number(*f),
                Data::Int(i) => CellContent::Number(*i as f64),
                Data::Bool(b) => CellContent::Bool(*b),
                Data::DateTime(dt) => CellContent::Number(dt.as_f64()),
                Data::DateTimeIso(s) | Data::DurationIso(s) => CellContent::Text(s.clone()),
                Data::Error(_) => continue,
            };
            touch(&mut used_range, coord);
            contents.insert(coord, content);
        }
    }

    if let Ok(formulas) = workbook.worksheet_formula(name) {
        let (start_row, start_col) = formulas.start().unwrap_or((0, 0));
        for (row, col, text) in formulas.used_cells() {
            if text.is_empty() {
                continue;
            }
            let coord = Coordinate::from_zero_based(
                start_row as usize + row,
                start_col as usize + col,
            );
            let cached = match contents.get(&coord) {
                Some(CellContent::Number(n)) => Some(*n),
                _ => None,
            };
            touch(&mut used_range, coord);
            contents.insert(
                coord,
                CellContent::Formula {
                    text: text.clone(),
                    cached,
                },
            );
        }
    }

    // Style-only cells participate in the clone and extend the used range.
    for coord in layout.cell_styles.keys() {
        touch(&mut used_range, *coord);
        contents.entry(*coord).or_insert(CellContent::Blank);
    }

    let mut cells: Vec<TemplateCell> = contents
        .into_iter()
        .map(|(coord, content)| TemplateCell {
            coord,
            content,
            style: layout.cell_styles.get(&coord).copied(),
        })
        .collect();
    cells.sort_by_key(|c| c.coord);

    debug!("template sheet '{name}': {} cells", cells.len());

    TemplateSheet {
        name: name.to_string(),
        cells,
        layout,
        used_range,
    }
}

/// Derive the engine model from the active sheet: the used-range filter,
/// per-coordinate format info, and merged ranges with inherited formats.
fn build_model(book: &TemplateBook) -> TemplateModel {
    let sheet = book.active_sheet();

    let mut model = TemplateModel {
        sheet_name: sheet.name.clone(),
        used_range: sheet.used_range,
        formats: HashMap::new(),
        merges: sheet.layout.merges.clone(),
    };

    for cell in &sheet.cells {
        let number_format = cell
            .style
            .and_then(|id| book.styles.number_format_of(id))
            .unwrap_or("");
        let has_formula = matches!(cell.content, CellContent::Formula { .. });
        let has_value = !matches!(cell.content, CellContent::Blank);

        // Only cells with a value, a non-default number format, or a
        // formula carry format info; the rest default to Other downstream.
        if !has_value && number_format.is_empty() && !has_formula {
            continue;
        }

        model.formats.insert(
            cell.coord,
            FormatInfo {
                category: classify(number_format),
                number_format: number_format.to_string(),
                has_formula,
            },
        );
    }

    model.propagate_merged_formats();
    model
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::{Format, Workbook};
    use sheetfold_engine::model::FormatCategory;

    fn write_basic_template(path: &Path) {
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name("Report").unwrap();
        let percent = Format::new().set_num_format("0.00%");
        let money = Format::new().set_num_format("$#,##0.00");
        ws.write_string(0, 0, "Metric").unwrap();
        ws.write_number_with_format(2, 2, 0.0, &percent).unwrap(); // C3
        ws.write_number_with_format(3, 3, 0.0, &money).unwrap(); // D4
        ws.write_number(4, 1, 7.0).unwrap(); // B5, General
        wb.save(path).unwrap();
    }

    #[test]
    fn template_model_classifies_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        write_basic_template(&path);

        let (book, model) = load_template(&path).unwrap();
        assert_eq!(model.sheet_name, "Report");
        assert!(book.sheets.len() == 1);
        assert!(!book.macro_enabled());

        assert_eq!(
            model.category_of(Coordinate::parse("C3").unwrap()),
            FormatCategory::Percentage
        );
        assert_eq!(
            model.category_of(Coordinate::parse("D4").unwrap()),
            FormatCategory::Currency
        );
        // Value with General format: registered, category Other
        let b5 = model.format_of(Coordinate::parse("B5").unwrap()).unwrap();
        assert_eq!(b5.category, FormatCategory::Other);
        assert!(!b5.has_formula);

        // The whole used rectangle is the filter, including valueless cells
        assert!(model.contains(Coordinate::parse("B3").unwrap()));
        assert!(!model.contains(Coordinate::parse("Z99").unwrap()));
    }

    #[test]
    fn template_formulas_are_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_number(1, 0, 10.0).unwrap(); // A2
        ws.write_number(2, 0, 20.0).unwrap(); // A3
        ws.write_formula_with_format(
            0,
            0,
            rust_xlsxwriter::Formula::new("=SUM(A2:A3)").set_result("30"),
            &Format::new().set_num_format("#,##0.00"),
        )
        .unwrap();
        wb.save(&path).unwrap();

        let (_, model) = load_template(&path).unwrap();
        let a1 = model.format_of(Coordinate::parse("A1").unwrap()).unwrap();
        assert!(a1.has_formula);
        assert_eq!(a1.category, FormatCategory::Number);
        assert!(!model
            .format_of(Coordinate::parse("A2").unwrap())
            .unwrap()
            .has_formula);
    }

    #[test]
    fn merged_ranges_inherit_master_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        let percent = Format::new().set_num_format("0.00%");
        ws.merge_range(9, 1, 9, 3, "", &percent).unwrap(); // B10:D10
        wb.save(&path).unwrap();

        let (_, model) = load_template(&path).unwrap();
        assert_eq!(model.merges.len(), 1);
        assert_eq!(
            model.category_of(Coordinate::parse("C10").unwrap()),
            FormatCategory::Percentage
        );
        assert!(model.is_merged_non_master(Coordinate::parse("D10").unwrap()));
        assert!(!model.is_merged_non_master(Coordinate::parse("B10").unwrap()));
    }

    #[test]
    fn missing_template_is_reported() {
        let err = load_template(Path::new("/nonexistent/t.xlsx")).unwrap_err();
        assert!(matches!(err, ConsolidateError::TemplateMissing(_)));
    }

    #[test]
    fn garbage_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xlsx");
        std::fs::write(&path, b"this is not a workbook").unwrap();
        let err = load_template(&path).unwrap_err();
        assert!(matches!(err, ConsolidateError::TemplateLoad { .. }));
    }
}
