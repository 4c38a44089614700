//! Output authoring: replay the template's look into a new workbook,
//! overlay the aggregated values with their audit trail, and append the
//! Contributions index sheet.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{
    Color, Format, FormatAlign, FormatBorder, Formula, Note, Workbook, Worksheet, XlsxError,
};

use sheetfold_engine::aggregate::Aggregator;
use sheetfold_engine::comment::{build_comment, comment_geometry};
use sheetfold_engine::error::ConsolidateError;
use sheetfold_engine::model::{
    AggregationMethod, CellRect, Coordinate, FormatCategory, FormatInfo, TemplateModel,
};
use sheetfold_engine::settings::ConsolidateSettings;

use crate::styles::{BorderEdge, BorderLine, CellStyle, HorizontalAlign, StyleTable, VerticalAlign};
use crate::template::{CellContent, TemplateBook, TemplateSheet};

/// Thin dark-orange audit border on every consolidated cell.
const AUDIT_ORANGE: u32 = 0xFF8C00;
const CONTRIB_SHEET: &str = "Contributions";
/// 0-based header row (Excel row 5); data starts on the next row.
const CONTRIB_HEADER_ROW: u32 = 4;
const CONTRIB_FIRST_DATA_ROW: u32 = 5;
const COMMENT_AUTHOR: &str = "Sheetfold";
const PERCENT_FALLBACK_FORMAT: &str = "0.00%";

/// Author the output workbook and save it as
/// `Consolidated - <Mon DD YYYY>.<ext>` in `output_folder`.
pub fn write_output(
    book: &TemplateBook,
    model: &TemplateModel,
    aggregator: &Aggregator,
    labels: &[String],
    output_folder: &Path,
    settings: &ConsolidateSettings,
) -> Result<PathBuf, ConsolidateError> {
    let extension = if book.macro_enabled() { "xlsm" } else { "xlsx" };
    let stamp = Local::now().format("%b %d %Y");
    let out_path = output_folder.join(format!("Consolidated - {stamp}.{extension}"));

    fs::create_dir_all(output_folder).map_err(|e| ConsolidateError::OutputInUse {
        path: out_path.clone(),
        reason: e.to_string(),
    })?;

    let werr = |e: XlsxError| ConsolidateError::OutputInUse {
        path: out_path.clone(),
        reason: e.to_string(),
    };

    let mut workbook = Workbook::new();
    let mut style_cache: HashMap<usize, Format> = HashMap::new();

    // Coordinates the value overlay owns; template content there is
    // superseded. Merged non-masters and preserved formulas drop out.
    let mut overlay_coords: HashSet<Coordinate> = HashSet::new();
    for (coord, _) in aggregator.iter() {
        if model.is_merged_non_master(coord) {
            continue;
        }
        if let Some(info) = model.format_of(coord) {
            if info.has_formula && !settings.overwrite_output_formulas {
                continue;
            }
        }
        overlay_coords.insert(coord);
    }

    let first_rows = contributions_first_rows(aggregator, labels);
    let no_coords: HashSet<Coordinate> = HashSet::new();

    for (index, sheet) in book.sheets.iter().enumerate() {
        // Default empty sheet inherited from template cloning
        if sheet.name == "Sheet 2" && sheet.is_empty() {
            continue;
        }

        let ws = workbook.add_worksheet();
        ws.set_name(&sheet.name).map_err(werr)?;

        clone_layout(ws, sheet, &book.styles, &mut style_cache).map_err(werr)?;

        let skip = if index == book.active {
            &overlay_coords
        } else {
            // Nothing is overlaid on non-active sheets
            &no_coords
        };
        clone_cells(ws, sheet, &book.styles, &mut style_cache, skip).map_err(werr)?;

        if index == book.active {
            write_overlay(
                ws,
                sheet,
                book,
                model,
                aggregator,
                &overlay_coords,
                &first_rows,
                settings,
            )
            .map_err(werr)?;
        }
    }

    write_contributions_sheet(&mut workbook, model, aggregator, labels).map_err(werr)?;

    // Macro payload must be staged as a file for the writer
    let mut vba_stage: Option<tempfile::NamedTempFile> = None;
    if let Some(payload) = &book.vba_project {
        let mut tmp = tempfile::NamedTempFile::new().map_err(|e| ConsolidateError::OutputInUse {
            path: out_path.clone(),
            reason: e.to_string(),
        })?;
        tmp.write_all(payload)
            .map_err(|e| ConsolidateError::OutputInUse {
                path: out_path.clone(),
                reason: e.to_string(),
            })?;
        workbook.add_vba_project(tmp.path()).map_err(werr)?;
        vba_stage = Some(tmp);
    }

    workbook.save(&out_path).map_err(werr)?;
    drop(vba_stage);

    info!("saved {}", out_path.display());
    Ok(out_path)
}

/// Excel row number of the first Contributions row for each consolidated
/// coordinate (each group spans one row per label plus a separator).
pub(crate) fn contributions_first_rows(
    aggregator: &Aggregator,
    labels: &[String],
) -> HashMap<Coordinate, u32> {
    let group_len = labels.len() as u32 + 1;
    aggregator
        .iter()
        .enumerate()
        .map(|(i, (coord, _))| (coord, CONTRIB_FIRST_DATA_ROW + 1 + i as u32 * group_len))
        .collect()
}

// ---------------------------------------------------------------------------
// Template cloning
// ---------------------------------------------------------------------------

fn clone_layout(
    ws: &mut Worksheet,
    sheet: &TemplateSheet,
    styles: &StyleTable,
    cache: &mut HashMap<usize, Format>,
) -> Result<(), XlsxError> {
    for (col, width) in &sheet.layout.col_widths {
        ws.set_column_width(*col, *width)?;
    }
    for (row, height) in &sheet.layout.row_heights {
        ws.set_row_height(*row, *height)?;
    }

    let default = Format::default();
    for merge in &sheet.layout.merges {
        let (r1, c1) = merge.start.zero_based();
        let (r2, c2) = merge.end.zero_based();
        let master_style = sheet.layout.cell_styles.get(&merge.start).copied();
        let format = master_style
            .and_then(|id| cached_format(styles, cache, id))
            .unwrap_or(&default);
        ws.merge_range(r1, c1, r2, c2, "", format)?;
    }
    Ok(())
}

fn clone_cells(
    ws: &mut Worksheet,
    sheet: &TemplateSheet,
    styles: &StyleTable,
    cache: &mut HashMap<usize, Format>,
    skip: &HashSet<Coordinate>,
) -> Result<(), XlsxError> {
    for cell in &sheet.cells {
        if skip.contains(&cell.coord) {
            continue;
        }
        if in_merge_non_master(&sheet.layout.merges, cell.coord) {
            continue;
        }
        let (row, col) = cell.coord.zero_based();
        let format = cell.style.and_then(|id| cached_format(styles, cache, id));

        match &cell.content {
            CellContent::Blank => {
                // merge_range already styled merged masters
                if sheet.layout.merges.iter().any(|m| m.master() == cell.coord) {
                    continue;
                }
                if let Some(format) = format {
                    ws.write_blank(row, col, format)?;
                }
            }
            CellContent::Number(n) => match format {
                Some(format) => {
                    ws.write_number_with_format(row, col, *n, format)?;
                }
                None => {
                    ws.write_number(row, col, *n)?;
                }
            },
            CellContent::Text(s) => match format {
                Some(format) => {
                    ws.write_string_with_format(row, col, s, format)?;
                }
                None => {
                    ws.write_string(row, col, s)?;
                }
            },
            CellContent::Bool(b) => match format {
                Some(format) => {
                    ws.write_boolean_with_format(row, col, *b, format)?;
                }
                None => {
                    ws.write_boolean(row, col, *b)?;
                }
            },
            CellContent::Formula { text, cached } => {
                let mut formula = Formula::new(text.as_str());
                if let Some(result) = cached {
                    formula = formula.set_result(result.to_string());
                }
                match format {
                    Some(format) => {
                        ws.write_formula_with_format(row, col, formula, format)?;
                    }
                    None => {
                        ws.write_formula(row, col, formula)?;
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Aggregated overlay
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn write_overlay(
    ws: &mut Worksheet,
    sheet: &TemplateSheet,
    book: &TemplateBook,
    model: &TemplateModel,
    aggregator: &Aggregator,
    overlay_coords: &HashSet<Coordinate>,
    first_rows: &HashMap<Coordinate, u32>,
    settings: &ConsolidateSettings,
) -> Result<(), XlsxError> {
    for (coord, acc) in aggregator.iter() {
        if !overlay_coords.contains(&coord) {
            continue;
        }

        let info = model
            .format_of(coord)
            .cloned()
            .unwrap_or_else(FormatInfo::other);

        let (value, number_format) = match acc.method {
            AggregationMethod::Mean => {
                // Percent points internally; the workbook wants a decimal
                let decimal = acc.average() / Decimal::ONE_HUNDRED;
                let nf = if info.number_format.is_empty() {
                    PERCENT_FALLBACK_FORMAT.to_string()
                } else {
                    info.number_format.clone()
                };
                (decimal.to_f64().unwrap_or(0.0), Some(nf))
            }
            AggregationMethod::Sum => {
                // Only currency and number sums carry the template's
                // format string; Date and Other get no override
                let nf = if sum_format_applies(info.category) && !info.number_format.is_empty() {
                    Some(info.number_format.clone())
                } else {
                    None
                };
                (acc.total.to_f64().unwrap_or(0.0), nf)
            }
        };

        // Keep the template's visual style, override the number format,
        // and frame the cell with the audit border.
        let mut style = sheet
            .layout
            .cell_styles
            .get(&coord)
            .and_then(|id| book.styles.get(*id))
            .cloned()
            .unwrap_or_default();
        if let Some(nf) = number_format {
            style.number_format = Some(nf);
        }
        let audit_edge = BorderEdge {
            line: BorderLine::Thin,
            color: Some(AUDIT_ORANGE),
        };
        style.border_left = audit_edge;
        style.border_right = audit_edge;
        style.border_top = audit_edge;
        style.border_bottom = audit_edge;
        let format = style_to_format(&style);

        let (row, col) = coord.zero_based();
        let link_row = settings
            .link_contributions
            .then(|| first_rows.get(&coord))
            .flatten();
        match link_row {
            Some(excel_row) => {
                let link =
                    format!("HYPERLINK(\"#'{CONTRIB_SHEET}'!A{excel_row}\",{value})");
                ws.write_formula_with_format(
                    row,
                    col,
                    Formula::new(link).set_result(value.to_string()),
                    &format,
                )?;
            }
            None => {
                ws.write_number_with_format(row, col, value, &format)?;
            }
        }

        let text = build_comment(coord, acc, info.category, aggregator.exclude_zero_percent());
        let max_label = acc
            .sorted_contributors()
            .iter()
            .map(|(label, _)| label.chars().count())
            .max()
            .unwrap_or(4);
        let (width, height) = comment_geometry(max_label, acc.contributor_count());
        let note = Note::new(text)
            .set_author(COMMENT_AUTHOR)
            .add_author_prefix(false)
            .set_width(width)
            .set_height(height);
        ws.insert_note(row, col, &note)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Contributions sheet
// ---------------------------------------------------------------------------

fn write_contributions_sheet(
    workbook: &mut Workbook,
    model: &TemplateModel,
    aggregator: &Aggregator,
    labels: &[String],
) -> Result<(), XlsxError> {
    let ws = workbook.add_worksheet();
    ws.set_name(CONTRIB_SHEET)?;

    let title = Format::new()
        .set_bold()
        .set_font_size(14)
        .set_font_color(Color::RGB(0x2F5597));
    ws.merge_range(0, 0, 0, 3, "CONTRIBUTIONS INDEX", &title)?;
    ws.write_string(2, 0, "Search (use column filters):")?;

    let header = Format::new().set_bold();
    ws.write_string_with_format(CONTRIB_HEADER_ROW, 0, "Cell", &header)?;
    ws.write_string_with_format(CONTRIB_HEADER_ROW, 1, "File Name", &header)?;
    ws.write_string_with_format(CONTRIB_HEADER_ROW, 2, "Contribution", &header)?;

    let mut row = CONTRIB_FIRST_DATA_ROW;
    for (coord, acc) in aggregator.iter() {
        let info = model
            .format_of(coord)
            .cloned()
            .unwrap_or_else(FormatInfo::other);
        let is_percent = acc.method == AggregationMethod::Mean;
        let value_format = contribution_format(&info, is_percent);
        let cell_ref = coord.to_string();

        for label in labels {
            let value = acc.contribution_of(label).unwrap_or(Decimal::ZERO);
            let value = if is_percent {
                value / Decimal::ONE_HUNDRED
            } else {
                value
            };
            ws.write_string(row, 0, &cell_ref)?;
            ws.write_string(row, 1, label)?;
            let number = value.to_f64().unwrap_or(0.0);
            match &value_format {
                Some(format) => {
                    ws.write_number_with_format(row, 2, number, format)?;
                }
                None => {
                    ws.write_number(row, 2, number)?;
                }
            }
            row += 1;
        }
        // Blank separator between coordinate groups
        row += 1;
    }

    if row > CONTRIB_FIRST_DATA_ROW {
        ws.autofilter(CONTRIB_HEADER_ROW, 0, row - 1, 2)?;
    }
    ws.set_column_width(0, 12)?;
    ws.set_column_width(1, 40)?;
    ws.set_column_width(2, 16)?;
    Ok(())
}

/// Contribution values inherit the template's number format for percent,
/// currency and number groups; percentage groups fall back to a standard
/// percent pattern. Date and Other groups stay unformatted.
fn contribution_format(info: &FormatInfo, is_percent: bool) -> Option<Format> {
    if is_percent {
        let nf = if info.number_format.is_empty() {
            PERCENT_FALLBACK_FORMAT
        } else {
            info.number_format.as_str()
        };
        return Some(Format::new().set_num_format(nf));
    }
    if sum_format_applies(info.category) && !info.number_format.is_empty() {
        Some(Format::new().set_num_format(info.number_format.as_str()))
    } else {
        None
    }
}

/// Sum cells keep the template's format string only for currency and
/// number categories.
fn sum_format_applies(category: FormatCategory) -> bool {
    matches!(category, FormatCategory::Currency | FormatCategory::Number)
}

// ---------------------------------------------------------------------------
// Style replay
// ---------------------------------------------------------------------------

fn cached_format<'a>(
    styles: &StyleTable,
    cache: &'a mut HashMap<usize, Format>,
    id: usize,
) -> Option<&'a Format> {
    if !cache.contains_key(&id) {
        let style = styles.get(id)?;
        cache.insert(id, style_to_format(style));
    }
    cache.get(&id)
}

fn style_to_format(style: &CellStyle) -> Format {
    let mut format = Format::new();

    if let Some(nf) = &style.number_format {
        format = format.set_num_format(nf);
    }
    if style.bold {
        format = format.set_bold();
    }
    if style.italic {
        format = format.set_italic();
    }
    if style.underline {
        format = format.set_underline(rust_xlsxwriter::FormatUnderline::Single);
    }
    if let Some(size) = style.font_size {
        format = format.set_font_size(size);
    }
    if let Some(name) = &style.font_name {
        format = format.set_font_name(name);
    }
    if let Some(color) = style.font_color {
        format = format.set_font_color(Color::RGB(color));
    }
    if let Some(color) = style.fill {
        format = format.set_background_color(Color::RGB(color));
    }

    format = apply_edge(format, style.border_left, Edge::Left);
    format = apply_edge(format, style.border_right, Edge::Right);
    format = apply_edge(format, style.border_top, Edge::Top);
    format = apply_edge(format, style.border_bottom, Edge::Bottom);

    if let Some(align) = style.h_align {
        format = format.set_align(match align {
            HorizontalAlign::Left => FormatAlign::Left,
            HorizontalAlign::Center => FormatAlign::Center,
            HorizontalAlign::Right => FormatAlign::Right,
        });
    }
    if let Some(align) = style.v_align {
        format = format.set_align(match align {
            VerticalAlign::Top => FormatAlign::Top,
            VerticalAlign::Middle => FormatAlign::VerticalCenter,
            VerticalAlign::Bottom => FormatAlign::Bottom,
        });
    }
    if style.wrap_text {
        format = format.set_text_wrap();
    }

    format
}

enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

fn apply_edge(format: Format, edge: BorderEdge, which: Edge) -> Format {
    let line = match edge.line {
        BorderLine::None => return format,
        BorderLine::Thin => FormatBorder::Thin,
        BorderLine::Medium => FormatBorder::Medium,
        BorderLine::Thick => FormatBorder::Thick,
    };
    let mut format = match which {
        Edge::Left => format.set_border_left(line),
        Edge::Right => format.set_border_right(line),
        Edge::Top => format.set_border_top(line),
        Edge::Bottom => format.set_border_bottom(line),
    };
    if let Some(color) = edge.color {
        let color = Color::RGB(color);
        format = match which {
            Edge::Left => format.set_border_left_color(color),
            Edge::Right => format.set_border_right_color(color),
            Edge::Top => format.set_border_top_color(color),
            Edge::Bottom => format.set_border_bottom_color(color),
        };
    }
    format
}

fn in_merge_non_master(merges: &[CellRect], coord: Coordinate) -> bool {
    merges.iter().any(|m| m.is_non_master_member(coord))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
