use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::model::Coordinate;

/// Machine-readable reason a file (or a cell within it) was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AccessDenied,
    Corrupt,
    Password,
    StructureMismatch,
    CoerceFailed,
    Encoding,
    TooLarge,
    Io,
}

impl SkipReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied => "access_denied",
            Self::Corrupt => "corrupt",
            Self::Password => "password",
            Self::StructureMismatch => "structure_mismatch",
            Self::CoerceFailed => "coerce_failed",
            Self::Encoding => "encoding",
            Self::TooLarge => "too_large",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A source the run carried on without.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub enum ConsolidateError {
    /// Template path does not exist or is unreadable.
    TemplateMissing(PathBuf),
    /// Template workbook corrupt, encrypted, or unsupported.
    TemplateLoad { path: PathBuf, reason: String },
    /// Source scan yielded zero eligible files.
    NoSources(PathBuf),
    /// A source failed to open or iterate (strict mode only; lenient runs
    /// record the file in the result instead).
    SourceRead { path: PathBuf, reason: SkipReason },
    /// Strict structural validation failed for a source.
    StructureMismatch {
        path: PathBuf,
        template_size: (u32, u32),
        source_size: (u32, u32),
    },
    /// Non-numeric text in a cell the template marks numeric (strict mode).
    Coerce {
        file: String,
        coord: Coordinate,
        value: String,
    },
    /// Output file locked, unwritable, or disk full.
    OutputInUse { path: PathBuf, reason: String },
    /// Settings TOML parse or validation error.
    SettingsParse(String),
    /// Caller-triggered cancellation; no output was written.
    Cancelled,
}

impl fmt::Display for ConsolidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TemplateMissing(path) => {
                write!(f, "template not found or unreadable: {}", path.display())
            }
            Self::TemplateLoad { path, reason } => {
                write!(f, "cannot load template {}: {reason}", path.display())
            }
            Self::NoSources(folder) => {
                write!(f, "no eligible source files in {}", folder.display())
            }
            Self::SourceRead { path, reason } => {
                write!(f, "cannot read source {}: {reason}", path.display())
            }
            Self::StructureMismatch {
                path,
                template_size,
                source_size,
            } => write!(
                f,
                "source {} used range is {}x{}, template is {}x{}",
                path.display(),
                source_size.0,
                source_size.1,
                template_size.0,
                template_size.1
            ),
            Self::Coerce { file, coord, value } => {
                write!(f, "cell {coord} in '{file}' is not numeric: '{value}'")
            }
            Self::OutputInUse { path, reason } => {
                write!(f, "cannot write output {}: {reason}", path.display())
            }
            Self::SettingsParse(msg) => write!(f, "settings error: {msg}"),
            Self::Cancelled => write!(f, "consolidation cancelled"),
        }
    }
}

impl std::error::Error for ConsolidateError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
