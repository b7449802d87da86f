use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::ocr::SegMode;

/// Form A layout shipped with the crate.
pub const BUILTIN_TEMPLATE: &str = include_str!("../templates/form_a.json");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid template: {0}")]
    Invalid(String),
    #[error("template unavailable: {0}")]
    Unavailable(String),
}

/// Fractional bounding box `[x0, y0, x1, y1]`, each coordinate a share of the
/// page width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct FractionBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl From<[f64; 4]> for FractionBox {
    fn from([x0, y0, x1, y1]: [f64; 4]) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

impl From<FractionBox> for [f64; 4] {
    fn from(b: FractionBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// Pixel rectangle, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

impl FractionBox {
    /// Scale to a `width`×`height` page.  Coordinates are clamped to [0, 1];
    /// a degenerate box grows to a 2-pixel span.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelBox {
        let scale = |v: f64, size: u32| (v.clamp(0.0, 1.0) * size as f64).round() as u32;
        let x0 = scale(self.x0, width);
        let y0 = scale(self.y0, height);
        let mut x1 = scale(self.x1, width);
        let mut y1 = scale(self.y1, height);
        if x1 <= x0 {
            x1 = x0 + 2;
        }
        if y1 <= y0 {
            y1 = y0 + 2;
        }
        PixelBox { x0, y0, x1, y1 }
    }

    fn is_finite(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1].iter().all(|v| v.is_finite())
    }
}

fn default_psm() -> u8 {
    7
}

fn default_max_len() -> usize {
    120
}

/// One free-text field on the form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    pub region: FractionBox,
    /// Tesseract-style page segmentation mode (7 = single line, 10 = single char).
    #[serde(default = "default_psm")]
    pub psm: u8,
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl FieldSpec {
    pub fn mode(&self) -> SegMode {
        SegMode::from_psm(self.psm)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSpec {
    pub value: String,
    pub region: FractionBox,
}

/// An exclusive-choice checkbox group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckboxGroupSpec {
    pub key: String,
    /// Overrides the configured ink threshold for this group.
    #[serde(default)]
    pub ink_thresh: Option<f64>,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub fields: Vec<FieldSpec>,
    pub checkboxes: Vec<CheckboxGroupSpec>,
}

impl Template {
    pub fn from_json(text: &str) -> Result<Self, TemplateError> {
        let tpl: Template = serde_json::from_str(text)?;
        tpl.validate()?;
        Ok(tpl)
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let text = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_json(BUILTIN_TEMPLATE)
    }

    fn validate(&self) -> Result<(), TemplateError> {
        let mut seen = HashSet::new();
        for f in &self.fields {
            if f.key.trim().is_empty() {
                return Err(TemplateError::Invalid("field with empty key".into()));
            }
            if !f.region.is_finite() {
                return Err(TemplateError::Invalid(format!("field {}: non-finite region", f.key)));
            }
            if f.max_len == 0 {
                return Err(TemplateError::Invalid(format!("field {}: max_len is 0", f.key)));
            }
            if !seen.insert(f.key.as_str()) {
                return Err(TemplateError::Invalid(format!("duplicate key {}", f.key)));
            }
        }
        for g in &self.checkboxes {
            if g.key.trim().is_empty() {
                return Err(TemplateError::Invalid("checkbox group with empty key".into()));
            }
            if g.options.is_empty() {
                return Err(TemplateError::Invalid(format!("checkbox group {} has no options", g.key)));
            }
            if let Some(t) = g.ink_thresh {
                if !(0.0..=1.0).contains(&t) {
                    return Err(TemplateError::Invalid(format!(
                        "checkbox group {}: ink_thresh {t} outside [0, 1]",
                        g.key
                    )));
                }
            }
            if let Some(o) = g.options.iter().find(|o| !o.region.is_finite()) {
                return Err(TemplateError::Invalid(format!(
                    "checkbox {}/{}: non-finite region",
                    g.key, o.value
                )));
            }
            if !seen.insert(g.key.as_str()) {
                return Err(TemplateError::Invalid(format!("duplicate key {}", g.key)));
            }
        }
        Ok(())
    }
}

/// Where the registry gets its template from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    Builtin,
    File(PathBuf),
    Inline(Arc<Template>),
}

/// Loads the template once and hands out shared read-only copies.
///
/// A failed load is cached as well: it is a deployment error, and every
/// request sees the same message until the process is restarted.
pub struct TemplateRegistry {
    source: TemplateSource,
    cell: OnceLock<Result<Arc<Template>, String>>,
}

impl TemplateRegistry {
    pub fn new(source: TemplateSource) -> Self {
        Self {
            source,
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Result<Arc<Template>, TemplateError> {
        self.cell
            .get_or_init(|| {
                let loaded = match &self.source {
                    TemplateSource::Builtin => Template::builtin().map(Arc::new),
                    TemplateSource::File(path) => Template::load(path).map(Arc::new),
                    TemplateSource::Inline(tpl) => Ok(tpl.clone()),
                };
                match &loaded {
                    Ok(tpl) => info!(
                        fields = tpl.fields.len(),
                        checkboxes = tpl.checkboxes.len(),
                        "template loaded"
                    ),
                    Err(e) => warn!(error = %e, "template load failed"),
                }
                loaded.map_err(|e| e.to_string())
            })
            .clone()
            .map_err(TemplateError::Unavailable)
    }
}
