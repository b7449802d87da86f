use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::checkbox::TieBreak;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunable thresholds and engine settings for one validator instance.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.  Absent file → `ValidatorConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Render resolution for PDF pages.  Images are used at their native size.
    pub dpi: u32,
    /// Largest rendered page side in pixels.
    pub max_render_dimension: u32,
    /// Luminance below which a preprocessed pixel counts as ink (0–255).
    pub binarize_threshold: u8,
    /// Smallest luminance span a crop needs before it is contrast-stretched.
    pub min_contrast_span: u8,
    /// Median despeckle radius (1 → 3×3 window).
    pub median_radius: u32,
    /// Ink ratio above which a checkbox option counts as marked, unless the
    /// template group sets its own `ink_thresh`.
    pub ink_threshold: f64,
    /// Half-size of the adaptive-threshold neighbourhood (15 → 31×31).
    pub adaptive_block_radius: u32,
    /// How far below the local mean a pixel must be to count as ink.
    pub adaptive_offset: i16,
    /// Which marked option wins when several options in one group cross the
    /// ink threshold.
    pub tie_break: TieBreak,
    /// Completeness at or below this share of tracked rules is treated as noise.
    pub noise_guard_ratio: f64,
    /// Image uploads whose whole-page transcript is shorter than this are
    /// rejected as unreadable (only when an OCR engine is available).
    pub min_transcript_chars: usize,
    /// Longest value captured after a label in the text-layer fallback.
    pub label_capture_len: usize,
    /// How many characters after a money label a currency amount may start.
    pub label_window: usize,
    /// Known provinces recognised by loose keyword presence.
    pub province_keywords: Vec<String>,
    /// Phrases after which a captured label value is cut off.
    pub boilerplate_stopwords: Vec<String>,
    pub fingerprint: FingerprintConfig,
    pub ocr: OcrSettings,
    /// Directory holding the PDFium shared library, if not on the system path.
    pub pdfium_dir: Option<PathBuf>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_render_dimension: 4000,
            binarize_threshold: 150,
            min_contrast_span: 48,
            median_radius: 1,
            ink_threshold: 0.08,
            adaptive_block_radius: 15,
            adaptive_offset: 7,
            tie_break: TieBreak::default(),
            noise_guard_ratio: 0.2,
            min_transcript_chars: 50,
            label_capture_len: 80,
            label_window: 40,
            province_keywords: vec!["Agusan del Norte".to_string()],
            boilerplate_stopwords: [
                "(surname",
                "(last name",
                "(first name",
                "(mm/dd",
                "mm/dd/yyyy",
                "dd/mm/yyyy",
                "please ",
                "signature",
                "(if ",
                "(street",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            fingerprint: FingerprintConfig::default(),
            ocr: OcrSettings::default(),
            pdfium_dir: None,
        }
    }
}

/// Quorum-based document-type check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// At least one of these must appear in the page text.
    pub header_phrases: Vec<String>,
    /// Any of these (word-bounded) marks the page as a different form.
    pub conflicting_tags: Vec<String>,
    /// Label keywords expected on the form.
    pub label_keywords: Vec<String>,
    /// How many distinct label keywords must be present.
    pub quorum: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            header_phrases: owned(&["form a", "personal information"]),
            conflicting_tags: owned(&["form b", "form c", "form d", "form e", "form f"]),
            label_keywords: owned(&[
                "name of applicant",
                "date of birth",
                "mobile",
                "email address",
                "permanent address",
                "municipality",
                "province",
                "zip",
                "citizenship",
                "sex",
                "strand",
                "father",
                "mother",
                "occupation",
                "annual gross income",
            ]),
            quorum: 4,
        }
    }
}

/// OCR engine selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Tesseract languages ("en", "eng", "fil", ...).
    pub languages: Vec<String>,
    /// Directory containing `tessdata/`.  `None` → system default.
    pub tessdata_dir: Option<String>,
    /// oar-ocr recognition model (.onnx); oar-ocr is skipped when unset.
    pub oar_rec_model: Option<PathBuf>,
    /// oar-ocr character dictionary.
    pub oar_dict: Option<PathBuf>,
    /// If the best priority-engine confidence reaches this value the fallback
    /// engines are skipped.
    pub fast_threshold: f64,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            languages: vec!["eng".to_string()],
            tessdata_dir: None,
            oar_rec_model: None,
            oar_dict: None,
            fast_threshold: 0.9,
        }
    }
}

impl ValidatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: ValidatorConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make every request fail or pass trivially.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dpi == 0 {
            return Err(ConfigError::Invalid("dpi must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.ink_threshold) {
            return Err(ConfigError::Invalid(format!(
                "ink_threshold {} outside [0, 1]",
                self.ink_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.noise_guard_ratio) {
            return Err(ConfigError::Invalid(format!(
                "noise_guard_ratio {} outside [0, 1)",
                self.noise_guard_ratio
            )));
        }
        if self.fingerprint.quorum > self.fingerprint.label_keywords.len() {
            return Err(ConfigError::Invalid(format!(
                "fingerprint quorum {} exceeds the {} label keywords",
                self.fingerprint.quorum,
                self.fingerprint.label_keywords.len()
            )));
        }
        Ok(())
    }
}
