//! Field extraction from vector layout XML files.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, warn};

use layscan_core::{
    assemble, resolve_derived, resolve_document, LayoutSchema, MatcherCache, RecordBatch,
    VectorDocument,
};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Layout schema JSON file
    #[arg(short, long)]
    schema: PathBuf,

    /// Input files or glob pattern (layout XML)
    #[arg(required = true)]
    input: String,

    /// Output CSV file
    #[arg(short, long, default_value = "extracted.csv")]
    output: PathBuf,

    /// Header for the record identifier column
    #[arg(long, default_value = "Document")]
    id_header: String,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

pub async fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    let schema = LayoutSchema::from_file(&args.schema)?;
    let mut cache = MatcherCache::new();
    let sections = schema.compile(&mut cache)?;
    debug!(
        sections = sections.len(),
        matchers = cache.len(),
        "schema compiled"
    );

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            ext.eq_ignore_ascii_case("xml")
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} layout files to process",
        style("ℹ").blue(),
        files.len()
    );

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap()
            .progress_chars("=>-"),
    );

    let mut batch = RecordBatch::new();
    let mut failed: Vec<(PathBuf, String)> = Vec::new();

    for path in files {
        match process_file(&path, &sections) {
            Ok(fields) => {
                batch.insert_record(&document_id(&path), fields);
            }
            Err(e) => {
                if args.continue_on_error {
                    warn!("Failed to process {}: {}", path.display(), e);
                    failed.push((path.clone(), e.to_string()));
                } else {
                    error!("Failed to process {}: {}", path.display(), e);
                    anyhow::bail!("Processing failed: {}", e);
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Complete");

    let table = assemble(&batch, &args.id_header, &schema.document_priority());
    write_csv(&args.output, &table)?;

    println!();
    println!(
        "{} Extracted {} records in {:?}",
        style("✓").green(),
        batch.len(),
        start.elapsed()
    );
    println!(
        "{} Table written to {}",
        style("✓").green(),
        args.output.display()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for (path, error) in &failed {
            println!("  - {}: {}", path.display(), error);
        }
    }

    Ok(())
}

fn process_file(
    path: &Path,
    sections: &[layscan_core::CompiledSection],
) -> anyhow::Result<Vec<(String, String)>> {
    let document = VectorDocument::from_file(path)?;
    let mut fields = resolve_document(sections, &document.pages);
    resolve_derived(&mut fields)?;
    Ok(fields)
}

/// Record identifier for a layout file: the file stem.
fn document_id(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

pub(crate) fn write_csv(path: &Path, table: &layscan_core::Table) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(&table.headers)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}
