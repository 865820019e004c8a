//! figures-client
//!
//! Sends a PDF (or a directory of PDFs) to a figures server and downloads
//! the extracted metadata and images.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use figures_server::client::{zip_directory, FiguresClient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract figures and tables from PDFs via a figures server")]
struct Args {
    /// PDF file, or a directory of PDFs to send as one batch
    input: PathBuf,

    /// Where downloaded artifacts are written
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Server base URL
    #[arg(short, long, default_value = "http://localhost:5001")]
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "figures_server=warn,figures_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let client = FiguresClient::new(&args.url);

    if args.input.is_dir() {
        run_batch(&client, &args.input, &args.output_dir).await
    } else if args.input.is_file() {
        run_single(&client, &args.input, &args.output_dir).await
    } else {
        bail!("Input not found: {}", args.input.display())
    }
}

async fn run_single(client: &FiguresClient, input: &Path, output_dir: &Path) -> Result<()> {
    let mut response = client
        .extract_file(input)
        .await
        .with_context(|| format!("Extraction of {} failed", input.display()))?;

    response.metadata_file = fetch(client, &response.metadata_file, output_dir).await?;
    response.figures = fetch_all(client, &response.figures, output_dir).await?;
    response.tables = fetch_all(client, &response.tables, output_dir).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_batch(client: &FiguresClient, input: &Path, output_dir: &Path) -> Result<()> {
    let dir = input.to_path_buf();
    let archive = tokio::task::spawn_blocking(move || zip_directory(&dir))
        .await?
        .with_context(|| format!("Failed to pack {}", input.display()))?;

    let name = input
        .file_name()
        .map(|n| format!("{}.zip", n.to_string_lossy()))
        .unwrap_or_else(|| "batch.zip".to_string());

    let mut response = client
        .extract_archive(&name, archive)
        .await
        .with_context(|| format!("Batch extraction of {} failed", input.display()))?;

    for document in &mut response.documents {
        if let Some(metadata) = &document.metadata_file {
            document.metadata_file = Some(fetch(client, metadata, output_dir).await?);
        }
        document.figures = fetch_all(client, &document.figures, output_dir).await?;
        document.tables = fetch_all(client, &document.tables, output_dir).await?;
    }

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn fetch(client: &FiguresClient, url: &str, output_dir: &Path) -> Result<String> {
    let local = client
        .download(url, output_dir)
        .await
        .with_context(|| format!("Failed to download {url}"))?;
    tracing::info!("Saved {}", local.display());
    Ok(local.display().to_string())
}

async fn fetch_all(client: &FiguresClient, urls: &[String], output_dir: &Path) -> Result<Vec<String>> {
    let mut local = Vec::with_capacity(urls.len());
    for url in urls {
        local.push(fetch(client, url, output_dir).await?);
    }
    Ok(local)
}
