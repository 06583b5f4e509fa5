use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "drawing-extract",
    version,
    about = "Extract text, shapes and lines from technical drawings with several OCR and vision engines"
)]
struct Cli {
    /// Drawings to analyze (png/jpeg/webp/gif/bmp/tiff)
    #[arg(value_name = "IMAGES")]
    images: Vec<PathBuf>,

    /// Comma-separated sources to run (e.g. tesseract,openai,yolo)
    #[arg(short = 's', long = "sources")]
    sources: Option<String>,

    /// Output format: text or json
    #[arg(short = 'f', long = "format", default_value = "text")]
    format: String,

    /// Write the report to a file instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Per-source timeout in seconds
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    /// Confidence assumed for items reported without one (0-1)
    #[arg(long = "default-confidence")]
    default_confidence: Option<f64>,

    /// Weight of the source success rate in the overall confidence
    #[arg(long = "success-weight")]
    success_weight: Option<f64>,

    /// Weight of the mean item confidence in the overall confidence
    #[arg(long = "confidence-weight")]
    confidence_weight: Option<f64>,

    /// Show available sources (name, kind, text category) and exit
    #[arg(long = "list-sources")]
    list_sources: bool,

    /// Show installed tesseract languages and exit
    #[arg(long = "show-tesseract-languages")]
    show_tesseract_languages: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    drawing_extract::logging::init(cli.verbose)?;

    let output = drawing_extract::run(drawing_extract::Config {
        images: cli.images,
        sources: cli.sources,
        format: cli.format,
        settings_path: cli.read_settings,
        timeout_secs: cli.timeout,
        default_confidence: cli.default_confidence,
        success_weight: cli.success_weight,
        confidence_weight: cli.confidence_weight,
        list_sources: cli.list_sources,
        show_tesseract_languages: cli.show_tesseract_languages,
    })
    .await?;

    match cli.output {
        Some(path) => std::fs::write(&path, format!("{}\n", output))
            .with_context(|| format!("failed to write report: {}", path.display()))?,
        None => println!("{}", output),
    }
    Ok(())
}
