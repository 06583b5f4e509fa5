use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, GenericImageView};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Source, SourceFuture, TESSERACT};
use crate::data::DrawingImage;
use crate::extraction::{ExtractedContent, ExtractionSource, SourceKind, TextCategory, TextSpan};
use crate::settings::TesseractSettings;

const MAX_SCALED_WIDTH: u32 = 6000;
const UPSCALE_BELOW_WIDTH: u32 = 2000;

/// Printed-text OCR through the `tesseract` binary.
#[derive(Debug, Clone)]
pub struct TesseractSource {
    descriptor: ExtractionSource,
    settings: TesseractSettings,
}

impl TesseractSource {
    pub fn new(settings: &TesseractSettings) -> Result<Self> {
        let descriptor = ExtractionSource::new(TESSERACT, SourceKind::Text, TextCategory::Printed)?;
        Ok(Self {
            descriptor,
            settings: settings.clone(),
        })
    }
}

impl Source for TesseractSource {
    fn descriptor(&self) -> &ExtractionSource {
        &self.descriptor
    }

    fn analyze(&self, image: &DrawingImage) -> SourceFuture {
        let settings = self.settings.clone();
        let bytes = image.bytes.clone();
        Box::pin(async move { recognize(bytes, &settings).await })
    }
}

/// Decoding and preprocessing run on the blocking pool; the tesseract child
/// is killed if this future is dropped.
async fn recognize(bytes: Vec<u8>, settings: &TesseractSettings) -> Result<ExtractedContent> {
    let languages = normalize_ocr_languages(&settings.languages).await?;
    let preprocess = settings.preprocess;
    let tmp = tokio::task::spawn_blocking(move || prepare_image(&bytes, preprocess))
        .await
        .map_err(|err| anyhow!("tesseract task failed: {}", err))??;

    let tsv = run_tesseract_tsv(tmp.path(), &languages, settings.psm).await?;
    let texts = parse_tsv_lines(&tsv, settings.min_confidence);
    debug!("tesseract recognized {} line(s)", texts.len());
    Ok(ExtractedContent::with_texts(texts))
}

fn prepare_image(bytes: &[u8], preprocess: bool) -> Result<tempfile::NamedTempFile> {
    let image = image::load_from_memory(bytes).with_context(|| "failed to decode image for OCR")?;
    let ocr_image = if preprocess {
        let (width, _) = image.dimensions();
        preprocess_for_ocr(image, ocr_scale(width))
    } else {
        image
    };

    let mut tmp = tempfile::Builder::new()
        .prefix("drawing-ocr-")
        .suffix(".png")
        .tempfile()
        .with_context(|| "failed to create temp file for OCR")?;
    ocr_image
        .write_to(&mut tmp, image::ImageFormat::Png)
        .with_context(|| "failed to write temp image for OCR")?;
    tmp.flush().ok();
    Ok(tmp)
}

pub async fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_language_list(&stdout))
}

fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

async fn normalize_ocr_languages(requested: &str) -> Result<String> {
    let available = match list_tesseract_languages().await {
        Ok(list) => list,
        Err(_) => {
            let trimmed = requested.trim();
            if trimmed.is_empty() {
                return Err(anyhow!("ocr languages is empty"));
            }
            return Ok(trimmed.to_string());
        }
    };
    choose_languages(requested, &available)
}

fn choose_languages(requested: &str, available: &[String]) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for raw in trimmed.split(['+', ',', ' ']) {
        let lang = raw.trim();
        if lang.is_empty() {
            continue;
        }
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

async fn run_tesseract_tsv(path: &Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(psm.to_string())
        .arg("--dpi")
        .arg("300")
        .arg("tsv")
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

struct Word {
    left: u32,
    text: String,
    conf: f64,
}

/// Groups level-5 TSV rows into lines in reading order.
///
/// Line confidence is the mean word confidence weighted by word length,
/// rescaled from tesseract's 0-100 to 0-1.
fn parse_tsv_lines(tsv: &str, min_confidence: f64) -> Vec<TextSpan> {
    let mut lines: BTreeMap<(i32, i32, i32, i32), Vec<Word>> = BTreeMap::new();

    for row in tsv.lines().skip(1) {
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != 5 {
            continue;
        }
        let conf: f64 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 || conf < min_confidence {
            continue;
        }
        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        lines.entry(key).or_default().push(Word {
            left: cols[6].parse().unwrap_or(0),
            text: text.to_string(),
            conf,
        });
    }

    lines
        .into_values()
        .filter_map(|mut words| {
            words.sort_by_key(|word| word.left);
            build_line(&words)
        })
        .collect()
}

fn build_line(words: &[Word]) -> Option<TextSpan> {
    let mut text = String::new();
    let mut conf_sum = 0.0;
    let mut len_sum = 0.0;
    for word in words {
        if let Some(last) = text.chars().last()
            && needs_space(last, &word.text)
        {
            text.push(' ');
        }
        text.push_str(&word.text);
        let weight = word.text.chars().count().max(1) as f64;
        conf_sum += word.conf * weight;
        len_sum += weight;
    }
    let text = text.trim();
    if text.is_empty() || len_sum <= 0.0 {
        return None;
    }
    let confidence = (conf_sum / len_sum / 100.0).clamp(0.0, 1.0);
    Some(TextSpan::new(text).with_confidence(confidence))
}

fn needs_space(last: char, next: &str) -> bool {
    match next.chars().next() {
        Some(first) => {
            !(is_cjk(last) && is_cjk(first))
                && !matches!(first, ',' | '.' | ';' | ':' | ')' | '%')
                && !matches!(last, '(' | '/')
        }
        None => false,
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32, 0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF)
}

fn ocr_scale(width: u32) -> u32 {
    if width >= UPSCALE_BELOW_WIDTH {
        return 1;
    }
    let mut scale = 3u32;
    while width.saturating_mul(scale) > MAX_SCALED_WIDTH && scale > 1 {
        scale -= 1;
    }
    scale.max(1)
}

/// Flattens alpha onto white, converts to grayscale, upscales small
/// drawings and stretches contrast.
fn preprocess_for_ocr(image: DynamicImage, scale: u32) -> DynamicImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = image::GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        luma.put_pixel(x, y, image::Luma([value]));
    }

    let resized = if scale > 1 {
        image::imageops::resize(
            &luma,
            width.saturating_mul(scale),
            height.saturating_mul(scale),
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        luma
    };

    DynamicImage::ImageLuma8(contrast_stretch(resized))
}

fn contrast_stretch(mut image: image::GrayImage) -> image::GrayImage {
    let (min, max) = image
        .pixels()
        .fold((255u8, 0u8), |(min, max), pixel| (min.min(pixel[0]), max.max(pixel[0])));
    if max <= min {
        return image;
    }

    let scale = 255.0 / (max as f32 - min as f32);
    for pixel in image.pixels_mut() {
        pixel[0] = (pixel[0].saturating_sub(min) as f32 * scale).round() as u8;
    }
    image
}
