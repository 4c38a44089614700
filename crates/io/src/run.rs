//! The consolidation pipeline: template analysis on the calling thread, a
//! worker pool reading sources, a single-reducer channel into the
//! aggregator, then the output writer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use log::{info, warn};

use sheetfold_engine::aggregate::Aggregator;
use sheetfold_engine::error::{ConsolidateError, SkippedFile};
use sheetfold_engine::model::{RunResult, TemplateModel};
use sheetfold_engine::progress::{CancelToken, ProgressSink};
use sheetfold_engine::settings::ConsolidateSettings;

use crate::discover::{discover_sources, source_label};
use crate::output::write_output;
use crate::source::{read_source, ReadError, SourceBatch};
use crate::template::load_template;

/// One consolidation job.
#[derive(Debug, Clone)]
pub struct ConsolidateRequest {
    pub template_path: PathBuf,
    pub source_folder: PathBuf,
    pub output_folder: PathBuf,
    pub settings: ConsolidateSettings,
}

struct WorkerEvent {
    path: PathBuf,
    outcome: Result<Option<SourceBatch>, ReadError>,
}

/// Run a consolidation end to end. Sources are never modified; on any
/// fatal error (or cancellation) no output is written.
pub fn consolidate(
    request: &ConsolidateRequest,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<RunResult, ConsolidateError> {
    request.settings.validate()?;
    let settings = &request.settings;

    let (book, model) = load_template(&request.template_path)?;
    progress.on_progress(5, "template loaded");

    let files = discover_sources(&request.source_folder, settings.include_xls)
        .map_err(|_| ConsolidateError::NoSources(request.source_folder.clone()))?;
    if files.is_empty() {
        return Err(ConsolidateError::NoSources(request.source_folder.clone()));
    }
    info!("{} source files discovered", files.len());

    // Contributor universe: every discovered file, including any that
    // later fail to read — absent labels still get zero rows in the
    // Contributions sheet. Duplicate stems collapse to one label.
    let mut labels: Vec<String> = files.iter().map(|p| source_label(p)).collect();
    labels.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
    labels.dedup();

    let mut aggregator = Aggregator::new(files.len(), settings.exclude_zero_percent);
    let mut files_skipped: Vec<SkippedFile> = Vec::new();
    let mut cells_skipped = 0usize;
    let mut files_processed = 0usize;
    let mut fatal: Option<ConsolidateError> = None;

    let worker_count = settings.workers.min(files.len());
    let next_file = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<WorkerEvent>();

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let files = &files;
            let next_file = &next_file;
            let model: &TemplateModel = &model;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let index = next_file.fetch_add(1, Ordering::Relaxed);
                let Some(path) = files.get(index) else {
                    break;
                };
                let outcome = read_source(path, model, settings.strict_structure, cancel);
                if tx
                    .send(WorkerEvent {
                        path: path.clone(),
                        outcome,
                    })
                    .is_err()
                {
                    break;
                }
            });
        }
        drop(tx);

        // Single-writer reduction: this thread is the only one touching
        // the aggregator.
        let total = files.len();
        let mut done = 0usize;
        for event in rx.iter() {
            done += 1;
            let file_name = event
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match event.outcome {
                Ok(Some(batch)) => {
                    if settings.strict && !batch.coerce_failures.is_empty() {
                        let (coord, value) = batch.coerce_failures[0].clone();
                        fatal.get_or_insert(ConsolidateError::Coerce {
                            file: batch.label.clone(),
                            coord,
                            value,
                        });
                        cancel.cancel();
                        continue;
                    }
                    cells_skipped += batch.coerce_failures.len();
                    for record in &batch.records {
                        let method = model.category_of(record.coord).method();
                        aggregator.record(record.coord, method, &record.source, record.value);
                    }
                    files_processed += 1;
                }
                Ok(None) => {
                    // Reader observed cancellation mid-file
                }
                Err(ReadError::Skip(reason)) => {
                    if settings.strict {
                        fatal.get_or_insert(ConsolidateError::SourceRead {
                            path: event.path.clone(),
                            reason,
                        });
                        cancel.cancel();
                    } else {
                        warn!("skipping {}: {reason}", event.path.display());
                        files_skipped.push(SkippedFile {
                            path: event.path.clone(),
                            reason,
                        });
                    }
                }
                Err(ReadError::Structure {
                    template_size,
                    source_size,
                }) => {
                    fatal.get_or_insert(ConsolidateError::StructureMismatch {
                        path: event.path.clone(),
                        template_size,
                        source_size,
                    });
                    cancel.cancel();
                }
            }

            let percent = 5 + (80 * done / total) as u8;
            progress.on_progress(percent, &file_name);
        }
    });

    if let Some(error) = fatal {
        return Err(error);
    }
    if cancel.is_cancelled() {
        return Err(ConsolidateError::Cancelled);
    }

    progress.on_progress(90, "writing output");
    let output_path = write_output(
        &book,
        &model,
        &aggregator,
        &labels,
        &request.output_folder,
        settings,
    )?;
    progress.on_progress(100, "saved");

    info!(
        "consolidated {} files into {} ({} cells)",
        files_processed,
        output_path.display(),
        aggregator.len()
    );

    Ok(RunResult {
        output_path,
        sheet_name: model.sheet_name.clone(),
        files_processed,
        files_skipped,
        cells_skipped,
    })
}
