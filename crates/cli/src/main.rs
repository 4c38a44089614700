// sheetfold CLI - consolidate a folder of workbooks into a template-shaped
// summary workbook

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sheetfold_engine::progress::CancelToken;
use sheetfold_engine::settings::ConsolidateSettings;
use sheetfold_io::{consolidate, ConsolidateRequest};

const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[derive(Parser)]
#[command(name = "sheetfold")]
#[command(about = "Consolidate a folder of workbooks into one shaped by a template")]
#[command(version)]
struct Cli {
    /// Template workbook (.xlsx or .xlsm)
    template: PathBuf,

    /// Folder containing the source workbooks (scanned non-recursively)
    sources: PathBuf,

    /// Output folder, created if absent
    #[arg(long, short = 'o', default_value = ".")]
    out: PathBuf,

    /// Average percentage cells over non-zero reporters only
    #[arg(long)]
    exclude_zero_percent: bool,

    /// Fail when a source's used range differs in size from the template
    #[arg(long)]
    strict_structure: bool,

    /// Keep template formulas instead of overwriting them with values
    #[arg(long)]
    keep_formulas: bool,

    /// Worker threads for source reading
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Include legacy .xls sources
    #[arg(long)]
    xls: bool,

    /// Do not hyperlink consolidated cells to the Contributions sheet
    #[arg(long)]
    no_links: bool,

    /// Abort on per-file read errors and unparseable cells
    #[arg(long)]
    strict: bool,

    /// Print the run result as JSON
    #[arg(long)]
    json: bool,

    /// Suppress progress output
    #[arg(long, short = 'q')]
    quiet: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let settings = ConsolidateSettings {
        exclude_zero_percent: cli.exclude_zero_percent,
        strict_structure: cli.strict_structure,
        overwrite_output_formulas: !cli.keep_formulas,
        workers: cli.workers,
        include_xls: cli.xls,
        link_contributions: !cli.no_links,
        strict: cli.strict,
    };
    if let Err(e) = settings.validate() {
        eprintln!("sheetfold: {e}");
        return ExitCode::from(EXIT_USAGE);
    }

    let request = ConsolidateRequest {
        template_path: cli.template,
        source_folder: cli.sources,
        output_folder: cli.out,
        settings,
    };

    let quiet = cli.quiet;
    let sink = move |percent: u8, message: &str| {
        if !quiet {
            eprintln!("[{percent:>3}%] {message}");
        }
    };
    let cancel = CancelToken::new();

    match consolidate(&request, &sink, &cancel) {
        Ok(result) => {
            if cli.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("sheetfold: cannot serialize result: {e}");
                        return ExitCode::from(EXIT_ERROR);
                    }
                }
            } else {
                println!(
                    "Consolidated {} file(s) from sheet '{}' into {}",
                    result.files_processed,
                    result.sheet_name,
                    result.output_path.display()
                );
                if result.cells_skipped > 0 {
                    println!("  {} cell(s) skipped (unparseable)", result.cells_skipped);
                }
                for skipped in &result.files_skipped {
                    println!(
                        "  skipped {} ({})",
                        skipped.path.display(),
                        skipped.reason
                    );
                }
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("sheetfold: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
