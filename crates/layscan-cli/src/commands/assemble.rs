//! Table assembly from a recognized record stream.

use std::fs;
use std::io::BufRead;
use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::{debug, warn};

use layscan_core::{
    assemble, group_by_section, normalize_name, resolve_derived, LayoutSchema, RecordEntry,
};

/// Arguments for the assemble command.
#[derive(Args)]
pub struct AssembleArgs {
    /// Layout schema JSON file
    #[arg(short, long)]
    schema: PathBuf,

    /// Input record stream (JSON lines, as written by `scan`)
    #[arg(required = true)]
    input: PathBuf,

    /// Output directory, one CSV per section
    #[arg(short, long, default_value = "tables")]
    output_dir: PathBuf,

    /// Header for the record identifier column
    #[arg(long, default_value = "Document")]
    id_header: String,
}

pub async fn run(args: AssembleArgs) -> anyhow::Result<()> {
    let schema = LayoutSchema::from_file(&args.schema)?;

    let file = fs::File::open(&args.input)?;
    let mut entries: Vec<RecordEntry> = Vec::new();
    for (number, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: RecordEntry = serde_json::from_str(&line)
            .map_err(|e| anyhow::anyhow!("{}:{}: {e}", args.input.display(), number + 1))?;
        entries.push(entry);
    }

    if entries.is_empty() {
        anyhow::bail!("No records found in {}", args.input.display());
    }

    let mut batches = group_by_section(&entries);
    fs::create_dir_all(&args.output_dir)?;

    // Emit tables in schema section order; records for sections the
    // schema no longer names are dropped with a warning.
    let mut written = 0usize;
    for section in &schema.sections {
        let Some(mut batch) = batches.remove(&section.name) else {
            debug!(section = %section.name, "no records for section");
            continue;
        };

        for (id, fields) in batch.records_mut() {
            resolve_derived(fields)
                .map_err(|e| anyhow::anyhow!("record {id}, section {}: {e}", section.name))?;
        }

        let table = assemble(&batch, &args.id_header, &schema.section_priority(&section.name));
        let path = args
            .output_dir
            .join(format!("{}.csv", normalize_name(&section.name)));
        super::extract::write_csv(&path, &table)?;

        println!(
            "{} {} ({} records) written to {}",
            style("✓").green(),
            section.name,
            batch.len(),
            path.display()
        );
        written += 1;
    }

    for section in batches.keys() {
        warn!(section = %section, "records for unknown section ignored");
    }

    if written == 0 {
        anyhow::bail!("No section in the schema matched any records");
    }

    Ok(())
}
