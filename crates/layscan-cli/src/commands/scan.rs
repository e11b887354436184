//! Region recognition from scanned page images.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use layscan_core::{
    discover_documents, FsStore, LayoutSchema, RecordEntry, RegionRecognizer, TesseractEngine,
    SENTINEL,
};

/// Arguments for the scan command.
#[derive(Args)]
pub struct ScanArgs {
    /// Layout schema JSON file
    #[arg(short, long)]
    schema: PathBuf,

    /// Directory of per-document page image subdirectories
    #[arg(required = true)]
    input: PathBuf,

    /// Directory for cropped region artifacts
    #[arg(long, default_value = "regions")]
    regions_dir: PathBuf,

    /// Directory for the recognized-text cache
    #[arg(long, default_value = "recognized")]
    cache_dir: PathBuf,

    /// Output record stream (JSON lines)
    #[arg(short, long, default_value = "records.jsonl")]
    output: PathBuf,

    /// Fail on any recognition error instead of recording a missing value
    #[arg(long)]
    strict: bool,

    /// Recognizer binary to invoke
    #[arg(long, default_value = "tesseract")]
    engine: String,

    /// Page segmentation mode passed to the recognizer
    #[arg(long, default_value = "7")]
    psm: u8,

    /// Per-region recognition timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,
}

pub async fn run(args: ScanArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    let schema = LayoutSchema::from_file(&args.schema)?;
    schema.validate_regions()?;

    let documents = discover_documents(&args.input)?;
    if documents.is_empty() {
        anyhow::bail!("No document directories found under {}", args.input.display());
    }

    let total_fields: usize = schema.sections.iter().map(|s| s.fields.len()).sum();
    println!(
        "{} Found {} documents, {} regions each",
        style("ℹ").blue(),
        documents.len(),
        total_fields
    );

    let engine = TesseractEngine::new()
        .with_binary(args.engine.clone())
        .with_psm(args.psm)
        .with_timeout(std::time::Duration::from_secs(args.timeout));
    let store = FsStore::new(&args.cache_dir);
    let mut recognizer = RegionRecognizer::new(&args.regions_dir, store, engine);

    let pb = ProgressBar::new((documents.len() * total_fields) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} regions")
            .unwrap()
            .progress_chars("=>-"),
    );

    let file = File::create(&args.output)?;
    let mut out = BufWriter::new(file);
    let mut missing = 0usize;

    for document in &documents {
        debug!(document = %document.id, pages = document.pages.len(), "scanning document");
        for section in &schema.sections {
            let page = document.page(section.page);
            for field in &section.fields {
                let value = match page {
                    Some(image) => {
                        match recognizer.recognize(image, &field.box_spec) {
                            Ok(text) => text,
                            Err(e) if args.strict => {
                                pb.abandon();
                                return Err(e.into());
                            }
                            Err(e) => {
                                warn!(
                                    document = %document.id,
                                    field = %field.name,
                                    "recognition failed: {e}"
                                );
                                missing += 1;
                                SENTINEL.to_string()
                            }
                        }
                    }
                    None => {
                        warn!(
                            document = %document.id,
                            page = section.page,
                            "page image missing"
                        );
                        missing += 1;
                        SENTINEL.to_string()
                    }
                };

                let entry = RecordEntry {
                    document: document.id.clone(),
                    section: section.name.clone(),
                    category: field.name.clone(),
                    value,
                };
                serde_json::to_writer(&mut out, &entry)?;
                out.write_all(b"\n")?;
                pb.inc(1);
            }
        }
    }

    out.flush()?;
    pb.finish_with_message("Complete");

    println!();
    println!(
        "{} Recognized {} regions in {:?}",
        style("✓").green(),
        documents.len() * total_fields,
        start.elapsed()
    );
    if missing > 0 {
        println!("   {} missing values", style(missing).yellow());
    }
    println!(
        "{} Records written to {}",
        style("✓").green(),
        args.output.display()
    );

    Ok(())
}
