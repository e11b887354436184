//! Source document downloads.

use std::path::PathBuf;

use clap::Args;
use console::style;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Arguments for the fetch command.
#[derive(Args)]
pub struct FetchArgs {
    /// File listing one document URL per line
    #[arg(required = true)]
    urls: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "documents")]
    output_dir: PathBuf,

    /// Re-download files that already exist
    #[arg(long)]
    force: bool,
}

pub async fn run(args: FetchArgs) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&args.urls).await?;
    let urls: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    if urls.is_empty() {
        anyhow::bail!("No URLs found in {}", args.urls.display());
    }

    tokio::fs::create_dir_all(&args.output_dir).await?;

    println!(
        "{} Fetching {} documents into {}",
        style("ℹ").blue(),
        urls.len(),
        args.output_dir.display()
    );

    let pb = ProgressBar::new(urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap()
            .progress_chars("=>-"),
    );

    let client = reqwest::Client::new();
    let mut fetched = 0usize;
    let mut skipped = 0usize;
    let mut failed: Vec<(String, String)> = Vec::new();

    for url in urls {
        let name = url.rsplit('/').next().unwrap_or(url);
        let target = args.output_dir.join(name);

        if target.exists() && !args.force {
            debug!(file = %target.display(), "already present, skipping");
            skipped += 1;
            pb.inc(1);
            continue;
        }

        match download(&client, url, &target).await {
            Ok(()) => fetched += 1,
            Err(e) => {
                warn!("Failed to fetch {url}: {e}");
                failed.push((url.to_string(), e.to_string()));
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Complete");

    println!();
    println!(
        "{} {} fetched, {} skipped, {} failed",
        style("✓").green(),
        fetched,
        skipped,
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed downloads:").red());
        for (url, error) in &failed {
            println!("  - {url}: {error}");
        }
        anyhow::bail!("{} downloads failed", failed.len());
    }

    Ok(())
}

async fn download(
    client: &reqwest::Client,
    url: &str,
    target: &std::path::Path,
) -> anyhow::Result<()> {
    let response = client.get(url).send().await?.error_for_status()?;

    // Download to a temporary name so an interrupted transfer never
    // masquerades as a complete document.
    let tmp = target.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    tokio::fs::rename(&tmp, target).await?;

    debug!(file = %target.display(), "fetched");
    Ok(())
}
