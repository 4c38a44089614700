//! XLSX package introspection: number formats and visual styling from
//! `styles.xml`, per-cell style ids and layout from worksheet XML, sheet
//! topology and the active tab from `workbook.xml`.
//!
//! The parsed styles are writer-oriented: everything resolves to what the
//! output workbook needs to replay the template's look (format-code
//! strings, RGB colors, border lines), not to a display model.

use std::collections::HashMap;
use std::io::{Read, Seek};

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use sheetfold_engine::model::{CellRect, Coordinate};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BorderLine {
    #[default]
    None,
    Thin,
    Medium,
    Thick,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorderEdge {
    pub line: BorderLine,
    pub color: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalAlign {
    Top,
    Middle,
    Bottom,
}

/// One resolved `cellXfs` entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStyle {
    /// Resolved number-format code. `None` means General.
    pub number_format: Option<String>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub font_size: Option<f64>,
    pub font_name: Option<String>,
    pub font_color: Option<u32>,
    /// Solid fill color (RGB).
    pub fill: Option<u32>,
    pub border_left: BorderEdge,
    pub border_right: BorderEdge,
    pub border_top: BorderEdge,
    pub border_bottom: BorderEdge,
    pub h_align: Option<HorizontalAlign>,
    pub v_align: Option<VerticalAlign>,
    pub wrap_text: bool,
}

/// Style table from styles.xml — index is the worksheet's `s` attribute.
#[derive(Debug, Default)]
pub struct StyleTable {
    pub styles: Vec<CellStyle>,
}

impl StyleTable {
    pub fn get(&self, id: usize) -> Option<&CellStyle> {
        self.styles.get(id)
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    /// The number-format code string for a style id, if any.
    pub fn number_format_of(&self, id: usize) -> Option<&str> {
        self.styles.get(id).and_then(|s| s.number_format.as_deref())
    }
}

/// Layout extracted from one worksheet XML.
#[derive(Debug, Default)]
pub struct SheetLayout {
    /// Style id per cell, for cells carrying a non-default style.
    pub cell_styles: HashMap<Coordinate, usize>,
    /// Custom column widths in Excel character units, 0-based column.
    pub col_widths: HashMap<u16, f64>,
    /// Custom row heights in points, 0-based row.
    pub row_heights: HashMap<u32, f64>,
    pub merges: Vec<CellRect>,
}

/// One sheet from workbook.xml, in workbook order.
#[derive(Debug, Clone)]
pub struct SheetEntry {
    pub name: String,
    /// Path of the worksheet part inside the package.
    pub part: String,
}

/// Package-level topology of a template workbook.
#[derive(Debug)]
pub struct PackageLayout {
    pub sheets: Vec<SheetEntry>,
    /// Index of the active sheet (workbookView activeTab, default 0).
    pub active: usize,
    /// Raw vbaProject.bin payload for macro-enabled templates.
    pub vba_project: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// XML entity unescaping
// ---------------------------------------------------------------------------

/// Unescape the predefined XML entities; format codes carry quotes as
/// `&quot;` (e.g. `"$"#,##0`).
fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Built-in number formats
// ---------------------------------------------------------------------------

/// Format codes for the implied builtin numFmt ids. Id 0 (General) maps to
/// `None`; unknown ids fall back to General as Excel does.
fn builtin_format_code(id: u16) -> Option<&'static str> {
    let code = match id {
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        5 | 6 => "$#,##0",
        7 | 8 => "$#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "m/d/yyyy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yyyy h:mm",
        37 => "#,##0;(#,##0)",
        38 => "#,##0;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        41 | 42 => "$#,##0",
        43 | 44 => "$#,##0.00",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mm:ss.0",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    };
    Some(code)
}

// ---------------------------------------------------------------------------
// Color parsing
// ---------------------------------------------------------------------------

/// Subset of Excel's indexed palette that templates in the wild actually
/// use; the rest resolves to None and inherits the default.
fn indexed_color(idx: u8) -> Option<u32> {
    let rgb = match idx {
        0 | 8 => 0x000000,
        1 | 9 => 0xFFFFFF,
        2 | 10 => 0xFF0000,
        3 | 11 => 0x00FF00,
        4 | 12 => 0x0000FF,
        5 | 13 => 0xFFFF00,
        6 | 14 => 0xFF00FF,
        7 | 15 => 0x00FFFF,
        16 => 0x800000,
        17 => 0x008000,
        18 => 0x000080,
        19 => 0x808000,
        20 => 0x800080,
        21 => 0x008080,
        22 => 0xC0C0C0,
        23 => 0x808080,
        52 => 0xFF9900,
        53 => 0xFF6600,
        64 => 0x000000,
        65 => 0xFFFFFF,
        _ => return None,
    };
    Some(rgb)
}

/// Parse a color from `rgb`/`indexed` attributes. Theme colors are not
/// resolved; they inherit the default.
fn parse_color_attrs(e: &quick_xml::events::BytesStart) -> Option<u32> {
    let mut rgb_val: Option<u32> = None;
    let mut indexed_val: Option<u8> = None;

    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"rgb" => {
                rgb_val = parse_argb_hex(std::str::from_utf8(&attr.value).ok()?);
            }
            b"indexed" => {
                indexed_val = std::str::from_utf8(&attr.value)
                    .ok()
                    .and_then(|s| s.parse().ok());
            }
            _ => {}
        }
    }

    rgb_val.or_else(|| indexed_val.and_then(indexed_color))
}

/// Parse AARRGGBB or RRGGBB hex into RGB (alpha dropped).
fn parse_argb_hex(s: &str) -> Option<u32> {
    let s = s.trim_start_matches('#');
    match s.len() {
        8 => u32::from_str_radix(&s[2..], 16).ok(),
        6 => u32::from_str_radix(s, 16).ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// styles.xml parser
// ---------------------------------------------------------------------------

/// Parsed font entry from `<fonts>`.
#[derive(Debug, Clone, Default)]
struct ParsedFont {
    bold: bool,
    italic: bool,
    underline: bool,
    size: Option<f64>,
    color: Option<u32>,
    name: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ParsedFill {
    color: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct ParsedBorder {
    left: BorderEdge,
    right: BorderEdge,
    top: BorderEdge,
    bottom: BorderEdge,
}

/// Parse styles.xml into a StyleTable.
pub fn parse_styles_xml(xml: &str) -> StyleTable {
    let custom_num_fmts = parse_num_fmts(xml);
    let fonts = parse_fonts(xml);
    let fills = parse_fills(xml);
    let borders = parse_borders(xml);
    let styles = parse_cell_xfs(xml, &custom_num_fmts, &fonts, &fills, &borders);
    StyleTable { styles }
}

/// `<numFmts>` → formatId → formatCode.
fn parse_num_fmts(xml: &str) -> HashMap<u16, String> {
    let mut map = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_num_fmts = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"numFmts" => {
                in_num_fmts = true;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"numFmts" => break,
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if in_num_fmts && e.name().as_ref() == b"numFmt" =>
            {
                let mut id: Option<u16> = None;
                let mut code: Option<String> = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"numFmtId" => {
                            id = std::str::from_utf8(&attr.value)
                                .ok()
                                .and_then(|s| s.parse().ok());
                        }
                        b"formatCode" => {
                            let raw = String::from_utf8_lossy(&attr.value).to_string();
                            code = Some(unescape_xml(&raw));
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(code)) = (id, code) {
                    map.insert(id, code);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    map
}

fn parse_fonts(xml: &str) -> Vec<ParsedFont> {
    let mut fonts = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0; // 0 = outside, 1 = inside <fonts>, 2 = inside <font>
    let mut current = ParsedFont::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"fonts" if depth == 0 => depth = 1,
                b"font" if depth == 1 => {
                    depth = 2;
                    current = ParsedFont::default();
                }
                b"color" if depth == 2 => current.color = parse_color_attrs(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if depth == 2 => match e.name().as_ref() {
                b"b" => current.bold = true,
                b"i" => current.italic = true,
                b"u" => current.underline = true,
                b"sz" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"val" {
                            current.size = std::str::from_utf8(&attr.value)
                                .ok()
                                .and_then(|s| s.parse().ok());
                        }
                    }
                }
                b"color" => current.color = parse_color_attrs(e),
                b"name" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"val" {
                            current.name = Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"font" if depth == 2 => {
                    fonts.push(current.clone());
                    depth = 1;
                }
                b"fonts" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    fonts
}

fn parse_fills(xml: &str) -> Vec<ParsedFill> {
    let mut fills = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0; // 0 = outside, 1 = inside <fills>, 2 = inside <fill>
    let mut in_pattern = false;
    let mut solid = false;
    let mut current = ParsedFill::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"fills" if depth == 0 => depth = 1,
                b"fill" if depth == 1 => {
                    depth = 2;
                    current = ParsedFill::default();
                    solid = false;
                }
                b"patternFill" if depth == 2 => {
                    in_pattern = true;
                    solid = pattern_is_solid(e);
                }
                b"fgColor" if in_pattern && solid => current.color = parse_color_attrs(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"patternFill" if depth == 2 => {
                    // Self-closing pattern: no fgColor to pick up
                }
                b"fgColor" if in_pattern && solid => current.color = parse_color_attrs(e),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"patternFill" => in_pattern = false,
                b"fill" if depth == 2 => {
                    fills.push(current.clone());
                    depth = 1;
                    in_pattern = false;
                }
                b"fills" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    fills
}

fn pattern_is_solid(e: &quick_xml::events::BytesStart) -> bool {
    e.attributes()
        .flatten()
        .any(|a| a.key.as_ref() == b"patternType" && a.value.as_ref() == b"solid")
}

fn parse_borders(xml: &str) -> Vec<ParsedBorder> {
    let mut borders = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0; // 0 = outside, 1 = inside <borders>, 2 = inside <border>
    let mut current = ParsedBorder::default();
    let mut side: Option<&'static str> = None;
    let mut side_line = BorderLine::None;
    let mut side_color: Option<u32> = None;

    fn side_name(name: &[u8]) -> &'static str {
        match name {
            b"left" => "left",
            b"right" => "right",
            b"top" => "top",
            b"bottom" => "bottom",
            _ => unreachable!(),
        }
    }

    fn set_side(border: &mut ParsedBorder, name: &str, edge: BorderEdge) {
        match name {
            "left" => border.left = edge,
            "right" => border.right = edge,
            "top" => border.top = edge,
            "bottom" => border.bottom = edge,
            _ => {}
        }
    }

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"borders" if depth == 0 => depth = 1,
                b"border" if depth == 1 => {
                    depth = 2;
                    current = ParsedBorder::default();
                }
                name @ (b"left" | b"right" | b"top" | b"bottom") if depth == 2 => {
                    side = Some(side_name(name));
                    side_line = border_line_attr(e);
                    side_color = None;
                }
                b"color" if side.is_some() => side_color = parse_color_attrs(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                name @ (b"left" | b"right" | b"top" | b"bottom") if depth == 2 => {
                    let line = border_line_attr(e);
                    if line != BorderLine::None {
                        set_side(&mut current, side_name(name), BorderEdge { line, color: None });
                    }
                }
                b"color" if side.is_some() => side_color = parse_color_attrs(e),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                name @ (b"left" | b"right" | b"top" | b"bottom") if depth == 2 => {
                    if side == Some(side_name(name)) {
                        set_side(
                            &mut current,
                            side_name(name),
                            BorderEdge {
                                line: side_line,
                                color: side_color,
                            },
                        );
                        side = None;
                        side_line = BorderLine::None;
                        side_color = None;
                    }
                }
                b"border" if depth == 2 => {
                    borders.push(current.clone());
                    depth = 1;
                }
                b"borders" if depth == 1 => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    borders
}

fn border_line_attr(e: &quick_xml::events::BytesStart) -> BorderLine {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"style" {
            return match attr.value.as_ref() {
                b"thin" | b"hair" => BorderLine::Thin,
                b"medium" | b"mediumDashed" | b"mediumDashDot" | b"mediumDashDotDot" => {
                    BorderLine::Medium
                }
                b"thick" | b"double" => BorderLine::Thick,
                _ => BorderLine::None,
            };
        }
    }
    BorderLine::None
}

/// `<cellXfs>`: resolve each `<xf>` against the component tables.
fn parse_cell_xfs(
    xml: &str,
    custom_num_fmts: &HashMap<u16, String>,
    fonts: &[ParsedFont],
    fills: &[ParsedFill],
    borders: &[ParsedBorder],
) -> Vec<CellStyle> {
    let mut styles = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_cell_xfs = false;
    let mut in_xf = false;
    let mut current = XfEntry::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    in_xf = true;
                    current = XfEntry::from_attrs(e);
                }
                b"alignment" if in_xf => current.read_alignment(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"xf" if in_cell_xfs => {
                    let xf = XfEntry::from_attrs(e);
                    styles.push(xf.resolve(custom_num_fmts, fonts, fills, borders));
                }
                b"alignment" if in_xf => current.read_alignment(e),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"xf" if in_xf => {
                    styles.push(current.resolve(custom_num_fmts, fonts, fills, borders));
                    in_xf = false;
                }
                b"cellXfs" => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    styles
}

#[derive(Debug, Default)]
struct XfEntry {
    num_fmt_id: Option<u16>,
    font_id: Option<usize>,
    fill_id: Option<usize>,
    border_id: Option<usize>,
    h_align: Option<HorizontalAlign>,
    v_align: Option<VerticalAlign>,
    wrap_text: bool,
}

impl XfEntry {
    fn from_attrs(e: &quick_xml::events::BytesStart) -> Self {
        let mut xf = Self::default();
        fn parse_num<T: std::str::FromStr>(v: &[u8]) -> Option<T> {
            std::str::from_utf8(v).ok().and_then(|s| s.parse().ok())
        }
        for attr in e.attributes().flatten() {
            match attr.key.as_ref() {
                b"numFmtId" => xf.num_fmt_id = parse_num(&attr.value),
                b"fontId" => xf.font_id = parse_num(&attr.value),
                b"fillId" => xf.fill_id = parse_num(&attr.value),
                b"borderId" => xf.border_id = parse_num(&attr.value),
                _ => {}
            }
        }
        xf
    }

    fn read_alignment(&mut self, e: &quick_xml::events::BytesStart) {
        for attr in e.attributes().flatten() {
            match attr.key.as_ref() {
                b"horizontal" => {
                    self.h_align = match attr.value.as_ref() {
                        b"left" => Some(HorizontalAlign::Left),
                        b"center" | b"centerContinuous" => Some(HorizontalAlign::Center),
                        b"right" => Some(HorizontalAlign::Right),
                        _ => None,
                    };
                }
                b"vertical" => {
                    self.v_align = match attr.value.as_ref() {
                        b"top" => Some(VerticalAlign::Top),
                        b"center" => Some(VerticalAlign::Middle),
                        b"bottom" => Some(VerticalAlign::Bottom),
                        _ => None,
                    };
                }
                b"wrapText" => {
                    self.wrap_text =
                        attr.value.as_ref() == b"1" || attr.value.as_ref() == b"true";
                }
                _ => {}
            }
        }
    }

    fn resolve(
        &self,
        custom_num_fmts: &HashMap<u16, String>,
        fonts: &[ParsedFont],
        fills: &[ParsedFill],
        borders: &[ParsedBorder],
    ) -> CellStyle {
        let mut style = CellStyle::default();

        if let Some(font) = self.font_id.and_then(|id| fonts.get(id)) {
            style.bold = font.bold;
            style.italic = font.italic;
            style.underline = font.underline;
            style.font_size = font.size;
            style.font_color = font.color;
            style.font_name = font.name.clone();
        }

        if let Some(fill) = self.fill_id.and_then(|id| fills.get(id)) {
            style.fill = fill.color;
        }

        if let Some(border) = self.border_id.and_then(|id| borders.get(id)) {
            style.border_left = border.left;
            style.border_right = border.right;
            style.border_top = border.top;
            style.border_bottom = border.bottom;
        }

        if let Some(id) = self.num_fmt_id {
            style.number_format = custom_num_fmts
                .get(&id)
                .cloned()
                .or_else(|| builtin_format_code(id).map(str::to_string));
        }

        style.h_align = self.h_align;
        style.v_align = self.v_align;
        style.wrap_text = self.wrap_text;
        style
    }
}

// ---------------------------------------------------------------------------
// Worksheet XML parser
// ---------------------------------------------------------------------------

/// Extract per-cell style ids, layout dimensions and merged ranges from a
/// worksheet part.
pub fn parse_sheet_layout(xml: &str) -> SheetLayout {
    let mut layout = SheetLayout::default();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"row" => {
                    let mut row: Option<u32> = None;
                    let mut height: Option<f64> = None;
                    let mut custom = false;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                row = std::str::from_utf8(&attr.value)
                                    .ok()
                                    .and_then(|s| s.parse::<u32>().ok())
                                    .map(|r| r.saturating_sub(1));
                            }
                            b"ht" => {
                                height = std::str::from_utf8(&attr.value)
                                    .ok()
                                    .and_then(|s| s.parse().ok());
                            }
                            b"customHeight" => {
                                custom = attr.value.as_ref() == b"1"
                                    || attr.value.as_ref() == b"true";
                            }
                            _ => {}
                        }
                    }
                    if custom {
                        if let (Some(row), Some(height)) = (row, height) {
                            layout.row_heights.insert(row, height);
                        }
                    }
                }
                b"c" => {
                    let mut style_id: Option<usize> = None;
                    let mut coord: Option<Coordinate> = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"s" => {
                                style_id = std::str::from_utf8(&attr.value)
                                    .ok()
                                    .and_then(|s| s.parse().ok());
                            }
                            b"r" => {
                                coord = std::str::from_utf8(&attr.value)
                                    .ok()
                                    .and_then(Coordinate::parse);
                            }
                            _ => {}
                        }
                    }
                    // Style id 0 is the default style; not worth carrying
                    if let (Some(id), Some(coord)) = (style_id, coord) {
                        if id > 0 {
                            layout.cell_styles.insert(coord, id);
                        }
                    }
                }
                b"col" => {
                    let mut min_col: Option<u16> = None;
                    let mut max_col: Option<u16> = None;
                    let mut width: Option<f64> = None;
                    let mut custom = false;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"min" => {
                                min_col = std::str::from_utf8(&attr.value)
                                    .ok()
                                    .and_then(|s| s.parse::<u16>().ok())
                                    .map(|c| c.saturating_sub(1));
                            }
                            b"max" => {
                                max_col = std::str::from_utf8(&attr.value)
                                    .ok()
                                    .and_then(|s| s.parse::<u16>().ok())
                                    .map(|c| c.saturating_sub(1));
                            }
                            b"width" => {
                                width = std::str::from_utf8(&attr.value)
                                    .ok()
                                    .and_then(|s| s.parse().ok());
                            }
                            b"customWidth" => {
                                custom = attr.value.as_ref() == b"1"
                                    || attr.value.as_ref() == b"true";
                            }
                            _ => {}
                        }
                    }
                    if custom {
                        if let (Some(min), Some(max), Some(w)) = (min_col, max_col, width) {
                            for col in min..=max {
                                layout.col_widths.insert(col, w);
                            }
                        }
                    }
                }
                b"mergeCell" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"ref" {
                            let r = String::from_utf8_lossy(&attr.value);
                            if let Some(rect) = parse_range_ref(&r) {
                                layout.merges.push(rect);
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    layout
}

/// Parse a range reference like `"B10:D10"`.
pub fn parse_range_ref(r: &str) -> Option<CellRect> {
    let (start, end) = r.split_once(':')?;
    Some(CellRect::new(
        Coordinate::parse(start)?,
        Coordinate::parse(end)?,
    ))
}

// ---------------------------------------------------------------------------
// workbook.xml + package topology
// ---------------------------------------------------------------------------

/// Read sheet order, worksheet part paths, the active tab and any VBA
/// payload from an open package.
pub fn read_package_layout<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<PackageLayout, String> {
    let workbook_xml = read_zip_file(archive, "xl/workbook.xml")?;
    let rels_xml = read_zip_file(archive, "xl/_rels/workbook.xml.rels").unwrap_or_default();

    let (sheet_refs, active) = parse_workbook_xml(&workbook_xml);
    let rid_to_target = parse_rels_xml(&rels_xml);

    let mut sheets = Vec::new();
    for (index, (name, rid)) in sheet_refs.into_iter().enumerate() {
        let part = rid
            .and_then(|rid| rid_to_target.get(&rid).cloned())
            .map(normalize_part_path)
            // Fallback for packages without usable rels
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));
        sheets.push(SheetEntry { name, part });
    }

    if sheets.is_empty() {
        return Err("workbook has no sheets".to_string());
    }

    let active = active.min(sheets.len() - 1);

    let vba_project = read_zip_bytes(archive, "xl/vbaProject.bin").ok();

    Ok(PackageLayout {
        sheets,
        active,
        vba_project,
    })
}

/// Parse workbook.xml into ordered (name, rId) pairs plus the activeTab.
fn parse_workbook_xml(xml: &str) -> (Vec<(String, Option<String>)>, usize) {
    let mut sheets = Vec::new();
    let mut active = 0usize;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"sheet" => {
                    let mut name = None;
                    let mut rid = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"name" => {
                                name = Some(String::from_utf8_lossy(&attr.value).to_string());
                            }
                            b"r:id" => {
                                rid = Some(String::from_utf8_lossy(&attr.value).to_string());
                            }
                            _ => {}
                        }
                    }
                    if let Some(name) = name {
                        sheets.push((name, rid));
                    }
                }
                b"workbookView" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"activeTab" {
                            active = std::str::from_utf8(&attr.value)
                                .ok()
                                .and_then(|s| s.parse().ok())
                                .unwrap_or(0);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (sheets, active)
}

/// Parse workbook.xml.rels into rId → target.
fn parse_rels_xml(xml: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        b"Target" => {
                            target = Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    map.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    map
}

/// Relationship targets are relative to `xl/` unless absolute.
fn normalize_part_path(target: String) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        stripped.to_string()
    } else if target.starts_with("xl/") {
        target
    } else {
        format!("xl/{target}")
    }
}

// ---------------------------------------------------------------------------
// ZIP helpers
// ---------------------------------------------------------------------------

pub fn read_zip_file<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<String, String> {
    let mut file = archive
        .by_name(path)
        .map_err(|e| format!("part '{path}' not found: {e}"))?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| format!("cannot read part '{path}': {e}"))?;
    Ok(content)
}

fn read_zip_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>, String> {
    let mut file = archive
        .by_name(path)
        .map_err(|e| format!("part '{path}' not found: {e}"))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| format!("cannot read part '{path}': {e}"))?;
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_numfmt_entities_are_unescaped() {
        let xml = r##"<?xml version="1.0"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <numFmts count="1">
    <numFmt numFmtId="164" formatCode="&quot;$&quot;#,##0.00"/>
  </numFmts>
  <fonts count="1"><font><sz val="11"/></font></fonts>
  <fills count="1"><fill><patternFill patternType="none"/></fill></fills>
  <borders count="1"><border><left/><right/><top/><bottom/></border></borders>
  <cellXfs count="1">
    <xf numFmtId="164" fontId="0" fillId="0" borderId="0" applyNumberFormat="1"/>
  </cellXfs>
</styleSheet>"##;

        let table = parse_styles_xml(xml);
        assert_eq!(table.len(), 1);
        assert_eq!(table.number_format_of(0), Some(r##""$"#,##0.00"##));
    }

    #[test]
    fn builtin_percent_format_resolves() {
        let xml = r#"<?xml version="1.0"?>
<styleSheet>
  <fonts count="1"><font><sz val="11"/></font></fonts>
  <fills count="1"><fill><patternFill patternType="none"/></fill></fills>
  <borders count="1"><border><left/><right/><top/><bottom/></border></borders>
  <cellXfs count="2">
    <xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
    <xf numFmtId="10" fontId="0" fillId="0" borderId="0" applyNumberFormat="1"/>
  </cellXfs>
</styleSheet>"#;

        let table = parse_styles_xml(xml);
        assert_eq!(table.len(), 2);
        assert_eq!(table.number_format_of(0), None);
        assert_eq!(table.number_format_of(1), Some("0.00%"));
    }

    #[test]
    fn fonts_fills_and_borders_resolve() {
        let xml = r#"<?xml version="1.0"?>
<styleSheet>
  <fonts count="2">
    <font><sz val="11"/><name val="Calibri"/></font>
    <font><b/><sz val="14"/><color rgb="FF2F5597"/><name val="Calibri"/></font>
  </fonts>
  <fills count="3">
    <fill><patternFill patternType="none"/></fill>
    <fill><patternFill patternType="gray125"/></fill>
    <fill><patternFill patternType="solid"><fgColor rgb="FFFFFF00"/></patternFill></fill>
  </fills>
  <borders count="2">
    <border><left/><right/><top/><bottom/></border>
    <border>
      <left style="thin"><color rgb="FFFF8C00"/></left>
      <right style="thin"><color rgb="FFFF8C00"/></right>
      <top style="thin"><color rgb="FFFF8C00"/></top>
      <bottom style="thin"><color rgb="FFFF8C00"/></bottom>
    </border>
  </borders>
  <cellXfs count="2">
    <xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
    <xf numFmtId="0" fontId="1" fillId="2" borderId="1" applyFont="1" applyFill="1" applyBorder="1">
      <alignment horizontal="center" vertical="top" wrapText="1"/>
    </xf>
  </cellXfs>
</styleSheet>"#;

        let table = parse_styles_xml(xml);
        let style = table.get(1).unwrap();
        assert!(style.bold);
        assert_eq!(style.font_size, Some(14.0));
        assert_eq!(style.font_color, Some(0x2F5597));
        assert_eq!(style.fill, Some(0xFFFF00));
        assert_eq!(style.border_top.line, BorderLine::Thin);
        assert_eq!(style.border_top.color, Some(0xFF8C00));
        assert_eq!(style.border_bottom.color, Some(0xFF8C00));
        assert_eq!(style.h_align, Some(HorizontalAlign::Center));
        assert_eq!(style.v_align, Some(VerticalAlign::Top));
        assert!(style.wrap_text);

        let default = table.get(0).unwrap();
        assert!(!default.bold);
        assert_eq!(default.fill, None);
        assert_eq!(default.border_left.line, BorderLine::None);
    }

    #[test]
    fn sheet_layout_extracts_styles_merges_and_dimensions() {
        let xml = r#"<?xml version="1.0"?>
<worksheet>
  <cols>
    <col min="2" max="3" width="18.5" customWidth="1"/>
  </cols>
  <sheetData>
    <row r="1" ht="30" customHeight="1">
      <c r="A1" s="1"><v>1</v></c>
      <c r="B1"><v>2</v></c>
    </row>
    <row r="10">
      <c r="B10" s="2"/>
    </row>
  </sheetData>
  <mergeCells count="1">
    <mergeCell ref="B10:D10"/>
  </mergeCells>
</worksheet>"#;

        let layout = parse_sheet_layout(xml);
        assert_eq!(
            layout.cell_styles.get(&Coordinate::parse("A1").unwrap()),
            Some(&1)
        );
        // No s attribute → default style, not recorded
        assert!(!layout
            .cell_styles
            .contains_key(&Coordinate::parse("B1").unwrap()));
        assert_eq!(
            layout.cell_styles.get(&Coordinate::parse("B10").unwrap()),
            Some(&2)
        );
        assert_eq!(layout.col_widths.get(&1), Some(&18.5));
        assert_eq!(layout.col_widths.get(&2), Some(&18.5));
        assert_eq!(layout.row_heights.get(&0), Some(&30.0));
        assert_eq!(layout.merges.len(), 1);
        assert_eq!(layout.merges[0].master().to_string(), "B10");
        assert_eq!(layout.merges[0].end.to_string(), "D10");
    }

    #[test]
    fn workbook_xml_yields_order_and_active_tab() {
        let xml = r#"<?xml version="1.0"?>
<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <bookViews><workbookView activeTab="1"/></bookViews>
  <sheets>
    <sheet name="Summary" sheetId="1" r:id="rId1"/>
    <sheet name="Data" sheetId="2" r:id="rId2"/>
  </sheets>
</workbook>"#;

        let (sheets, active) = parse_workbook_xml(xml);
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].0, "Summary");
        assert_eq!(sheets[1].1.as_deref(), Some("rId2"));
        assert_eq!(active, 1);
    }

    #[test]
    fn part_paths_normalize_relative_targets() {
        assert_eq!(
            normalize_part_path("worksheets/sheet1.xml".into()),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            normalize_part_path("/xl/worksheets/sheet1.xml".into()),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            normalize_part_path("xl/worksheets/sheet1.xml".into()),
            "xl/worksheets/sheet1.xml"
        );
    }

    #[test]
    fn range_refs_parse() {
        let rect = parse_range_ref("B10:D10").unwrap();
        assert_eq!(rect.master(), Coordinate::parse("B10").unwrap());
        assert_eq!(rect.width(), 3);
        assert!(parse_range_ref("B10").is_none());
        assert!(parse_range_ref("").is_none());
    }
}
