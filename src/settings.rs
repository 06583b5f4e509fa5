use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregate::{
    AggregationPolicy, DEFAULT_CONFIDENCE, DEFAULT_CONFIDENCE_WEIGHT, DEFAULT_SUCCESS_WEIGHT,
};
use crate::extraction::{ContractViolation, SourceKind, TextCategory};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub default_confidence: f64,
    pub success_weight: f64,
    pub confidence_weight: f64,
    pub source_defaults: BTreeMap<String, f64>,
    pub sources: Vec<String>,
    pub timeout_secs: u64,
    pub max_concurrent_images: usize,
    pub tesseract: TesseractSettings,
    pub vision: VisionSettings,
    pub commands: Vec<CommandSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TesseractSettings {
    pub languages: String,
    pub psm: u32,
    /// Words below this confidence (0-100, as tesseract reports it) are dropped.
    pub min_confidence: f64,
    pub preprocess: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisionSettings {
    pub openai_model: Option<String>,
    pub claude_model: Option<String>,
    pub gemini_model: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSettings {
    pub name: String,
    pub kind: SourceKind,
    pub category: TextCategory,
    pub program: String,
    pub args: Vec<String>,
}

impl Default for Settings {
    /// The values of the embedded `settings.toml`, whether or not it has been
    /// written to the home directory.
    fn default() -> Self {
        let mut settings = Self::fallback();
        if let Ok(embedded) = parse_settings(DEFAULT_SETTINGS_TOML) {
            settings.merge(embedded);
        }
        settings
    }
}

impl Settings {
    fn fallback() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
            success_weight: DEFAULT_SUCCESS_WEIGHT,
            confidence_weight: DEFAULT_CONFIDENCE_WEIGHT,
            source_defaults: BTreeMap::new(),
            sources: vec!["tesseract".to_string()],
            timeout_secs: 120,
            max_concurrent_images: 2,
            tesseract: TesseractSettings::default(),
            vision: VisionSettings::default(),
            commands: Vec::new(),
        }
    }
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            languages: "eng".to_string(),
            psm: 6,
            min_confidence: 30.0,
            preprocess: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    aggregation: Option<AggregationFile>,
    pipeline: Option<PipelineFile>,
    tesseract: Option<TesseractFile>,
    vision: Option<VisionFile>,
    commands: Option<Vec<CommandFile>>,
}

#[derive(Debug, Default, Deserialize)]
struct AggregationFile {
    default_confidence: Option<f64>,
    success_weight: Option<f64>,
    confidence_weight: Option<f64>,
    source_defaults: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineFile {
    sources: Option<Vec<String>>,
    timeout_secs: Option<u64>,
    max_concurrent_images: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct TesseractFile {
    languages: Option<String>,
    psm: Option<u32>,
    min_confidence: Option<f64>,
    preprocess: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct VisionFile {
    openai_model: Option<String>,
    claude_model: Option<String>,
    gemini_model: Option<String>,
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandFile {
    name: String,
    kind: SourceKind,
    category: Option<TextCategory>,
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    load_layers(&ordered_paths)
}

/// Applies every existing file in `paths` on top of the built-in defaults.
pub fn load_layers(paths: &[PathBuf]) -> Result<Settings> {
    let mut settings = Settings::default();
    for path in paths {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed = parse_settings(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }
    Ok(settings)
}

fn parse_settings(content: &str) -> Result<SettingsFile> {
    Ok(toml::from_str(content)?)
}

impl Settings {
    /// Builds the aggregation policy these settings describe.
    pub fn to_policy(&self) -> Result<AggregationPolicy, ContractViolation> {
        let mut policy = AggregationPolicy::new(
            self.default_confidence,
            self.success_weight,
            self.confidence_weight,
        )?;
        for (name, confidence) in &self.source_defaults {
            policy = policy.with_source_default(name.clone(), *confidence)?;
        }
        Ok(policy)
    }

    pub fn command(&self, name: &str) -> Option<&CommandSettings> {
        self.commands
            .iter()
            .find(|command| command.name.eq_ignore_ascii_case(name.trim()))
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(aggregation) = incoming.aggregation {
            if let Some(value) = aggregation.default_confidence {
                self.default_confidence = value;
            }
            if let Some(value) = aggregation.success_weight {
                self.success_weight = value;
            }
            if let Some(value) = aggregation.confidence_weight {
                self.confidence_weight = value;
            }
            if let Some(map) = aggregation.source_defaults {
                for (name, value) in map {
                    let name = name.trim().to_lowercase();
                    if !name.is_empty() {
                        self.source_defaults.insert(name, value);
                    }
                }
            }
        }
        if let Some(pipeline) = incoming.pipeline {
            if let Some(sources) = pipeline.sources {
                let sources = sources
                    .into_iter()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .collect::<Vec<_>>();
                if !sources.is_empty() {
                    self.sources = sources;
                }
            }
            if let Some(secs) = pipeline.timeout_secs
                && secs > 0
            {
                self.timeout_secs = secs;
            }
            if let Some(limit) = pipeline.max_concurrent_images
                && limit > 0
            {
                self.max_concurrent_images = limit;
            }
        }
        if let Some(tesseract) = incoming.tesseract {
            if let Some(languages) = tesseract.languages
                && !languages.trim().is_empty()
            {
                self.tesseract.languages = languages.trim().to_string();
            }
            if let Some(psm) = tesseract.psm {
                self.tesseract.psm = psm;
            }
            if let Some(value) = tesseract.min_confidence
                && (0.0..=100.0).contains(&value)
            {
                self.tesseract.min_confidence = value;
            }
            if let Some(preprocess) = tesseract.preprocess {
                self.tesseract.preprocess = preprocess;
            }
        }
        if let Some(vision) = incoming.vision {
            merge_text(&mut self.vision.openai_model, vision.openai_model);
            merge_text(&mut self.vision.claude_model, vision.claude_model);
            merge_text(&mut self.vision.gemini_model, vision.gemini_model);
            merge_text(&mut self.vision.context, vision.context);
        }
        if let Some(commands) = incoming.commands {
            for command in commands {
                let name = command.name.trim().to_lowercase();
                let program = command.program.trim().to_string();
                if name.is_empty() || program.is_empty() {
                    continue;
                }
                let category = command.category.unwrap_or(match command.kind {
                    SourceKind::Mixed => TextCategory::Mixed,
                    _ => TextCategory::Printed,
                });
                let entry = CommandSettings {
                    name,
                    kind: command.kind,
                    category,
                    program,
                    args: command.args,
                };
                match self
                    .commands
                    .iter_mut()
                    .find(|existing| existing.name == entry.name)
                {
                    Some(existing) => *existing = entry,
                    None => self.commands.push(entry),
                }
            }
        }
    }
}

fn merge_text(target: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming
        && !value.trim().is_empty()
    {
        *target = Some(value.trim().to_string());
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".drawing-extract"))
        }
    })
}
