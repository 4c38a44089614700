// Workbook I/O and the consolidation pipeline

pub mod discover;
pub mod output;
pub mod run;
pub mod source;
pub mod styles;
pub mod template;

pub use run::{consolidate, ConsolidateRequest};
pub use template::{load_template, TemplateBook};
