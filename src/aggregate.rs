use serde::Serialize;
use std::collections::BTreeMap;

use crate::extraction::{
    ContractViolation, ExtractionResult, LineItem, ShapeItem, ShapeType, TextItem,
    validate_confidence,
};

/// Confidence assumed for content whose source reported none.
pub const DEFAULT_CONFIDENCE: f64 = 0.6;
pub const DEFAULT_SUCCESS_WEIGHT: f64 = 0.4;
pub const DEFAULT_CONFIDENCE_WEIGHT: f64 = 0.6;

/// Tunables for [`aggregate`].
///
/// `overall_confidence` is
/// `(success_weight * success_rate + confidence_weight * mean_confidence) / (success_weight + confidence_weight)`,
/// where `mean_confidence` averages every reported item confidence and falls
/// back to the per-source default (or `default_confidence`) for items that
/// carry none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationPolicy {
    default_confidence: f64,
    success_weight: f64,
    confidence_weight: f64,
    source_defaults: BTreeMap<String, f64>,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
            success_weight: DEFAULT_SUCCESS_WEIGHT,
            confidence_weight: DEFAULT_CONFIDENCE_WEIGHT,
            source_defaults: BTreeMap::new(),
        }
    }
}

impl AggregationPolicy {
    pub fn new(
        default_confidence: f64,
        success_weight: f64,
        confidence_weight: f64,
    ) -> Result<Self, ContractViolation> {
        validate_policy_confidence("default_confidence", default_confidence)?;
        for (label, weight) in [
            ("success_weight", success_weight),
            ("confidence_weight", confidence_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ContractViolation::InvalidPolicy(format!(
                    "{} must be a non-negative number (got {})",
                    label, weight
                )));
            }
        }
        if success_weight + confidence_weight <= 0.0 {
            return Err(ContractViolation::InvalidPolicy(
                "success_weight and confidence_weight cannot both be zero".to_string(),
            ));
        }
        Ok(Self {
            default_confidence,
            success_weight,
            confidence_weight,
            source_defaults: BTreeMap::new(),
        })
    }

    /// Overrides the fallback confidence for one source, e.g. to trust a
    /// hosted vision model more than traditional OCR.
    pub fn with_source_default(
        mut self,
        source_name: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, ContractViolation> {
        let source_name = source_name.into();
        validate_policy_confidence(&source_name, confidence)?;
        self.source_defaults.insert(source_name, confidence);
        Ok(self)
    }

    pub fn default_confidence(&self) -> f64 {
        self.default_confidence
    }

    pub fn success_weight(&self) -> f64 {
        self.success_weight
    }

    pub fn confidence_weight(&self) -> f64 {
        self.confidence_weight
    }

    pub fn source_defaults(&self) -> &BTreeMap<String, f64> {
        &self.source_defaults
    }

    pub fn default_confidence_for(&self, source_name: &str) -> f64 {
        self.source_defaults
            .get(source_name)
            .copied()
            .unwrap_or(self.default_confidence)
    }

    fn blend(&self, success_rate: f64, mean_confidence: f64) -> f64 {
        let total = self.success_weight + self.confidence_weight;
        let score =
            (self.success_weight * success_rate + self.confidence_weight * mean_confidence) / total;
        score.clamp(0.0, 1.0)
    }
}

fn validate_policy_confidence(label: &str, value: f64) -> Result<(), ContractViolation> {
    validate_confidence(label, value).map_err(|_| {
        ContractViolation::InvalidPolicy(format!(
            "confidence for '{}' must be within [0, 1] (got {})",
            label, value
        ))
    })
}

/// Ledger entry for one attempted source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSummary {
    pub attempted: bool,
    pub succeeded: bool,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.6 {
            ConfidenceLevel::Medium
        } else if score >= 0.4 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
            ConfidenceLevel::VeryLow => "Very Low",
        }
    }
}

/// Consolidated view of every source run against one drawing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    pub all_text: Vec<TextItem>,
    pub shapes_detected: Vec<ShapeItem>,
    pub lines_detected: Vec<LineItem>,
    pub method_summary: BTreeMap<String, MethodSummary>,
    /// Ledger keys in the order the sources were supplied.
    pub source_order: Vec<String>,
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub success_rate: f64,
    pub mean_confidence: f64,
    pub overall_confidence: f64,
}

impl AggregatedResult {
    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.overall_confidence)
    }

    /// Ledger entries in input order.
    pub fn ledger(&self) -> impl Iterator<Item = (&str, &MethodSummary)> {
        self.source_order.iter().filter_map(|key| {
            self.method_summary
                .get(key)
                .map(|summary| (key.as_str(), summary))
        })
    }

    pub fn succeeded_sources(&self) -> Vec<&str> {
        self.ledger()
            .filter(|(_, summary)| summary.succeeded)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn failed_sources(&self) -> Vec<(&str, &str)> {
        self.ledger()
            .filter_map(|(name, summary)| summary.error.as_deref().map(|error| (name, error)))
            .collect()
    }

    pub fn shape_counts(&self) -> BTreeMap<ShapeType, usize> {
        let mut counts = BTreeMap::new();
        for shape in &self.shapes_detected {
            *counts.entry(shape.shape_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.all_text.is_empty() && self.shapes_detected.is_empty() && self.lines_detected.is_empty()
    }
}

/// Merges the results of every attempted source into one record.
///
/// Failed sources contribute only a ledger entry. Content keeps the order of
/// `results`, and nothing is deduplicated across sources.
pub fn aggregate(results: &[ExtractionResult], policy: &AggregationPolicy) -> AggregatedResult {
    let mut all_text = Vec::new();
    let mut shapes_detected = Vec::new();
    let mut lines_detected = Vec::new();
    let mut method_summary = BTreeMap::new();
    let mut source_order = Vec::with_capacity(results.len());
    let mut samples = Vec::new();
    let mut succeeded = 0usize;

    for result in results {
        let key = ledger_key(&method_summary, result.source_name());
        method_summary.insert(
            key.clone(),
            MethodSummary {
                attempted: true,
                succeeded: result.is_success(),
                item_count: result.item_count(),
                error: result.error_message().map(|error| error.to_string()),
                processing_time_ms: result.processing_time_ms(),
            },
        );
        source_order.push(key);

        if !result.is_success() {
            continue;
        }
        succeeded += 1;

        let fallback = policy.default_confidence_for(result.source_name());
        if result.text_items().is_empty() {
            if !result.shapes().is_empty() || !result.lines().is_empty() {
                samples.push(fallback);
            }
        } else {
            samples.extend(
                result
                    .text_items()
                    .iter()
                    .map(|item| item.confidence.unwrap_or(fallback)),
            );
        }

        all_text.extend_from_slice(result.text_items());
        shapes_detected.extend_from_slice(result.shapes());
        lines_detected.extend_from_slice(result.lines());
    }

    let success_rate = succeeded as f64 / results.len().max(1) as f64;
    let mean_confidence = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    };
    let overall_confidence = if succeeded == 0 {
        0.0
    } else {
        policy.blend(success_rate, mean_confidence)
    };

    AggregatedResult {
        all_text,
        shapes_detected,
        lines_detected,
        method_summary,
        source_order,
        sources_attempted: results.len(),
        sources_succeeded: succeeded,
        success_rate,
        mean_confidence,
        overall_confidence,
    }
}

fn ledger_key(summary: &BTreeMap<String, MethodSummary>, name: &str) -> String {
    if !summary.contains_key(name) {
        return name.to_string();
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{}#{}", name, suffix);
        if !summary.contains_key(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
