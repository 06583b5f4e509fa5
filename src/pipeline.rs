use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregatedResult, AggregationPolicy, aggregate};
use crate::data::{DrawingImage, ImageInfo, load_drawing};
use crate::extraction::{ExtractionResult, ExtractionSource};
use crate::sources::Source;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_CONCURRENT_IMAGES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Upper bound for a single source on a single drawing.
    pub timeout: Duration,
    pub max_concurrent_images: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_concurrent_images: DEFAULT_MAX_CONCURRENT_IMAGES,
        }
    }
}

/// Everything learned about one drawing.
#[derive(Debug, Clone, Serialize)]
pub struct DrawingAnalysis {
    pub image: ImageInfo,
    pub analyzed_at: String,
    pub results: Vec<ExtractionResult>,
    pub aggregated: AggregatedResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<DrawingAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

impl BatchEntry {
    /// Loaded and at least one source succeeded.
    pub fn is_success(&self) -> bool {
        self.analysis
            .as_ref()
            .is_some_and(|analysis| analysis.aggregated.sources_succeeded > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_images: usize,
    pub successful_images: usize,
    pub failed_images: usize,
    pub success_rate: f64,
    pub total_processing_time_ms: u64,
    pub average_time_per_image_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchAnalysis {
    pub entries: Vec<BatchEntry>,
    pub summary: BatchSummary,
}

pub struct Pipeline<S: Source> {
    sources: Vec<S>,
    options: PipelineOptions,
}

impl<S: Source> Pipeline<S> {
    pub fn new(sources: Vec<S>, options: PipelineOptions) -> Self {
        Self { sources, options }
    }

    pub fn sources(&self) -> &[S] {
        &self.sources
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Runs every source against `image` concurrently.
    ///
    /// Returns one result per source, in source order. Errors, timeouts and
    /// content that breaks the item contract all become failure results.
    pub async fn analyze(&self, image: &DrawingImage) -> Vec<ExtractionResult> {
        let runs = self
            .sources
            .iter()
            .map(|source| run_source(source, image, self.options.timeout));
        join_all(runs).await
    }

    pub async fn analyze_drawing(
        &self,
        image: &DrawingImage,
        policy: &AggregationPolicy,
    ) -> DrawingAnalysis {
        info!(
            "analyzing {} ({}x{}) with {} source(s)",
            image.display_name(),
            image.width,
            image.height,
            self.sources.len()
        );
        let results = self.analyze(image).await;
        let aggregated = aggregate(&results, policy);
        info!(
            "{}: {}/{} source(s) succeeded, confidence {:.2}",
            image.display_name(),
            aggregated.sources_succeeded,
            aggregated.sources_attempted,
            aggregated.overall_confidence
        );
        DrawingAnalysis {
            image: image.info(),
            analyzed_at: now_rfc3339(),
            results,
            aggregated,
        }
    }

    /// Analyzes several drawings, keeping at most `max_concurrent_images` in
    /// flight. Entries come back in input order.
    pub async fn analyze_batch(
        &self,
        paths: &[PathBuf],
        policy: &AggregationPolicy,
    ) -> BatchAnalysis {
        let limit = self.options.max_concurrent_images.max(1);
        let entries = stream::iter(paths.iter())
            .map(|path| self.analyze_path(path, policy))
            .buffered(limit)
            .collect::<Vec<_>>()
            .await;
        let summary = summarize(&entries);
        BatchAnalysis { entries, summary }
    }

    async fn analyze_path(&self, path: &Path, policy: &AggregationPolicy) -> BatchEntry {
        let started = Instant::now();
        let (analysis, error) = match load_drawing(path) {
            Ok(image) => (Some(self.analyze_drawing(&image, policy).await), None),
            Err(err) => {
                warn!("skipping {}: {:#}", path.display(), err);
                (None, Some(format!("{:#}", err)))
            }
        };
        BatchEntry {
            path: path.display().to_string(),
            analysis,
            error,
            processing_time_ms: elapsed_ms(started),
        }
    }
}

async fn run_source<S: Source>(
    source: &S,
    image: &DrawingImage,
    timeout: Duration,
) -> ExtractionResult {
    let descriptor = source.descriptor();
    debug!("{}: started", descriptor.name());
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, source.analyze(image)).await;
    let elapsed = elapsed_ms(started);

    let result = match outcome {
        Ok(Ok(content)) => ExtractionResult::success(descriptor, content, elapsed)
            .unwrap_or_else(|violation| {
                ExtractionResult::source_failure(
                    descriptor,
                    format!("malformed response: {}", violation),
                    elapsed,
                )
            }),
        Ok(Err(err)) => ExtractionResult::source_failure(descriptor, format!("{:#}", err), elapsed),
        Err(_) => ExtractionResult::source_failure(
            descriptor,
            format!("timed out after {:?}", timeout),
            elapsed,
        ),
    };
    log_result(descriptor, &result);
    result
}

fn log_result(descriptor: &ExtractionSource, result: &ExtractionResult) {
    match result.error_message() {
        None => info!(
            "{}: {} item(s) in {}ms",
            descriptor.name(),
            result.item_count(),
            result.processing_time_ms()
        ),
        Some(error) => warn!(
            "{}: failed after {}ms: {}",
            descriptor.name(),
            result.processing_time_ms(),
            error
        ),
    }
}

pub fn summarize(entries: &[BatchEntry]) -> BatchSummary {
    let total_images = entries.len();
    let successful_images = entries.iter().filter(|entry| entry.is_success()).count();
    let total_processing_time_ms = entries
        .iter()
        .map(|entry| entry.processing_time_ms)
        .sum::<u64>();
    let (success_rate, average_time_per_image_ms) = if total_images == 0 {
        (0.0, 0.0)
    } else {
        (
            successful_images as f64 / total_images as f64,
            total_processing_time_ms as f64 / total_images as f64,
        )
    };
    BatchSummary {
        total_images,
        successful_images,
        failed_images: total_images - successful_images,
        success_rate,
        total_processing_time_ms,
        average_time_per_image_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
