//! `sheetfold-engine` — Template-driven consolidation engine.
//!
//! Pure engine crate: receives template metadata and normalized cell
//! values, owns the sum/mean semantics. No file or workbook I/O.

pub mod aggregate;
pub mod classify;
pub mod coerce;
pub mod comment;
pub mod error;
pub mod model;
pub mod progress;
pub mod settings;

pub use aggregate::{Accumulator, Aggregator};
pub use classify::classify;
pub use coerce::coerce;
pub use error::{ConsolidateError, SkipReason, SkippedFile};
pub use model::{
    CellRect, CellScalar, Coordinate, FormatCategory, FormatInfo, AggregationMethod, RunResult,
    SourceRecord, TemplateModel,
};
pub use progress::{CancelToken, NullProgress, ProgressSink};
pub use settings::ConsolidateSettings;
