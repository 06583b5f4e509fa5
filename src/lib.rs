use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod aggregate;
pub mod data;
pub mod extraction;
pub mod logging;
pub mod pipeline;
mod providers;
pub mod report;
pub mod settings;
pub mod sources;

pub use aggregate::{
    AggregatedResult, AggregationPolicy, ConfidenceLevel, MethodSummary, aggregate,
};
pub use extraction::{
    ContractViolation, ExtractedContent, ExtractionResult, ExtractionSource, SourceKind,
    TextCategory,
};
pub use pipeline::{BatchAnalysis, DrawingAnalysis, Pipeline, PipelineOptions};
pub use providers::{Claude, Gemini, OpenAI, Provider, ProviderKind, ProviderUsage};
pub use report::ReportFormat;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub images: Vec<PathBuf>,
    /// Comma-separated source names overriding `[pipeline].sources`.
    pub sources: Option<String>,
    pub format: String,
    pub settings_path: Option<String>,
    pub timeout_secs: Option<u64>,
    pub default_confidence: Option<f64>,
    pub success_weight: Option<f64>,
    pub confidence_weight: Option<f64>,
    pub list_sources: bool,
    pub show_tesseract_languages: bool,
}

pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;

    if config.list_sources {
        return Ok(format_source_list(&settings));
    }
    if config.show_tesseract_languages {
        return Ok(sources::list_tesseract_languages().await?.join("\n"));
    }

    let format = ReportFormat::from_name(&config.format)
        .ok_or_else(|| anyhow!("unsupported format '{}' (use text or json)", config.format))?;
    if config.images.is_empty() {
        return Err(anyhow!("no drawings given"));
    }

    apply_overrides(&mut settings, &config)?;
    let policy = settings
        .to_policy()
        .with_context(|| "invalid aggregation settings")?;
    let enabled = match config.sources.as_deref() {
        Some(list) => split_list(list),
        None => settings.sources.clone(),
    };
    let sources = sources::build_sources(&settings, &enabled)?;
    let pipeline = Pipeline::new(
        sources,
        PipelineOptions {
            timeout: Duration::from_secs(settings.timeout_secs),
            max_concurrent_images: settings.max_concurrent_images,
        },
    );

    if let [path] = config.images.as_slice() {
        let image = data::load_drawing(path)?;
        let analysis = pipeline.analyze_drawing(&image, &policy).await;
        return report::render(&analysis, format);
    }

    let batch = pipeline.analyze_batch(&config.images, &policy).await;
    report::render_batch(&batch, format)
}

fn apply_overrides(settings: &mut settings::Settings, config: &Config) -> Result<()> {
    if let Some(secs) = config.timeout_secs {
        if secs == 0 {
            return Err(anyhow!("timeout must be at least one second"));
        }
        settings.timeout_secs = secs;
    }
    if let Some(value) = config.default_confidence {
        settings.default_confidence = value;
    }
    if let Some(value) = config.success_weight {
        settings.success_weight = value;
    }
    if let Some(value) = config.confidence_weight {
        settings.confidence_weight = value;
    }
    Ok(())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn format_source_list(settings: &settings::Settings) -> String {
    sources::available_sources(settings)
        .iter()
        .map(|source| {
            format!(
                "{}\t{}\t{}",
                source.name(),
                source.kind().as_str(),
                source.category().as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_lists_are_trimmed() {
        assert_eq!(
            split_list(" tesseract, ,OpenAI ,"),
            vec!["tesseract".to_string(), "OpenAI".to_string()]
        );
    }

    #[test]
    fn flag_overrides_replace_settings() {
        let mut settings = settings::Settings::default();
        let config = Config {
            timeout_secs: Some(15),
            success_weight: Some(1.0),
            ..Config::default()
        };
        apply_overrides(&mut settings, &config).unwrap();
        assert_eq!(settings.timeout_secs, 15);
        assert_eq!(settings.success_weight, 1.0);
        assert_eq!(settings.confidence_weight, 0.6);

        let zero = Config {
            timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(apply_overrides(&mut settings, &zero).is_err());
    }

    #[test]
    fn source_list_shows_kind_and_category() {
        let listing = format_source_list(&settings::Settings::default());
        let first = listing.lines().next().unwrap();
        assert_eq!(first, "tesseract\ttext\tprinted");
        assert!(listing.contains("claude\tmixed\tmixed"));
    }
}
