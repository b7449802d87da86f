//! One validation request, end to end.
//!
//! rasterize → template → page text → fingerprint → region OCR and checkboxes
//! (in parallel over fields) → text back-fill → scoring.

use image::{DynamicImage, GrayImage, RgbImage};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checkbox::{AdaptiveInkMeter, CheckboxDetector, InkMeter, NoInkMeter};
use crate::config::{ConfigError, ValidatorConfig};
use crate::fallback::{extract_text_layer, normalize_page_text, Fingerprint, TextBackfill};
use crate::fields::FieldMap;
use crate::ocr::{RecognizerSet, SegMode};
use crate::raster::{rasterize, DocumentInput, DocumentKind, NoPdfRenderer, PdfRenderer, PdfiumRenderer, RasterError};
use crate::region::{preprocess, RegionReader};
use crate::score::{score, Score, SectionLists, Stats};
use crate::template::{Template, TemplateError, TemplateRegistry};

/// Problems with the upload itself.  These are the caller's to fix, so they
/// are returned as errors rather than as a scored result.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("no file uploaded")]
    Empty,

    #[error("unsupported file type: {0} (upload a PDF or a JPG/PNG photo)")]
    UnsupportedType(String),

    #[error("could not read the photo ({chars} characters of text found); please upload a clearer, well-lit photo of the form")]
    Unreadable { chars: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Complete,
    Incomplete,
    WrongDocument,
    Unrenderable,
    TemplateError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub missing_fields: SectionLists,
    pub filled_fields: SectionLists,
    pub stats: Stats,
    /// Raw extracted values, only in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldMap>,
}

impl ValidationResult {
    fn rejected(outcome: Outcome, reason: String) -> Self {
        Self {
            valid: false,
            outcome,
            reason: Some(reason),
            message: None,
            missing_fields: SectionLists::default(),
            filled_fields: SectionLists::default(),
            stats: Stats::default(),
            fields: None,
        }
    }

    /// A scored form: valid results carry `message`, invalid ones `reason`.
    fn scored(scored: Score, fields: Option<FieldMap>) -> Self {
        let text = Some(scored.message().to_string());
        let (outcome, reason, message) = if scored.valid {
            (Outcome::Complete, None, text)
        } else {
            (Outcome::Incomplete, text, None)
        };
        Self {
            valid: scored.valid,
            outcome,
            reason,
            message,
            missing_fields: scored.missing,
            filled_fields: scored.filled,
            stats: scored.stats,
            fields,
        }
    }
}

/// Optional engines injected into a [`Validator`].
pub struct Capabilities {
    pub pdf: Box<dyn PdfRenderer>,
    pub ocr: RecognizerSet,
    pub ink: Box<dyn InkMeter>,
}

impl Capabilities {
    /// Everything this build and host can offer.  Missing pieces are logged
    /// once here and degrade to empty readings later.
    pub fn detect(config: &ValidatorConfig) -> Self {
        let pdf = PdfiumRenderer::new(config.pdfium_dir.clone(), config.max_render_dimension);
        if !pdf.is_available() {
            warn!(dir = ?config.pdfium_dir, "PDFium not found; PDF uploads cannot be rendered");
        }
        Self {
            pdf: Box::new(pdf),
            ocr: RecognizerSet::from_settings(&config.ocr),
            ink: Box::new(AdaptiveInkMeter::from_config(config)),
        }
    }

    /// No PDF renderer, no OCR, no ink detection.
    pub fn none() -> Self {
        Self {
            pdf: Box::new(NoPdfRenderer),
            ocr: RecognizerSet::none(),
            ink: Box::new(NoInkMeter),
        }
    }
}

pub struct Validator {
    config: ValidatorConfig,
    templates: TemplateRegistry,
    caps: Capabilities,
    fingerprint: Fingerprint,
    backfill: TextBackfill,
}

impl Validator {
    pub fn new(
        config: ValidatorConfig,
        templates: TemplateRegistry,
        caps: Capabilities,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let fingerprint = Fingerprint::new(&config.fingerprint)
            .map_err(|e| ConfigError::Invalid(format!("fingerprint phrase: {e}")))?;
        let backfill = TextBackfill::new(&config)
            .map_err(|e| ConfigError::Invalid(format!("text fallback pattern: {e}")))?;
        Ok(Self {
            config,
            templates,
            caps,
            fingerprint,
            backfill,
        })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn template(&self) -> Result<Arc<Template>, TemplateError> {
        self.templates.get()
    }

    pub fn rasterize(&self, input: &DocumentInput) -> Result<RgbImage, RasterError> {
        rasterize(input, self.config.dpi, self.caps.pdf.as_ref())
    }

    /// Validate one uploaded document.
    ///
    /// Rendering, template and fingerprint failures are reported inside the
    /// result; only problems with the upload itself are errors.
    pub fn validate(
        &self,
        input: &DocumentInput,
        debug: bool,
    ) -> Result<ValidationResult, InputError> {
        if input.bytes.is_empty() {
            return Err(InputError::Empty);
        }

        let image = match self.rasterize(input) {
            Ok(img) => img,
            Err(e) => {
                warn!(error = %e, kind = ?input.kind, "rasterization failed");
                return Ok(ValidationResult::rejected(
                    Outcome::Unrenderable,
                    format!("Cannot rasterize first page: {e}"),
                ));
            }
        };
        debug!(width = image.width(), height = image.height(), "page rasterized");

        let template = match self.templates.get() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "template unavailable");
                return Ok(ValidationResult::rejected(
                    Outcome::TemplateError,
                    format!("Form template unavailable: {e}"),
                ));
            }
        };

        let binarized = preprocess(&image, &self.config);
        let text = self.page_text(input, &binarized);
        let chars = text.chars().count();
        if input.kind == DocumentKind::Image
            && self.caps.ocr.is_available()
            && chars < self.config.min_transcript_chars
        {
            return Err(InputError::Unreadable { chars });
        }

        if text.trim().is_empty() {
            warn!("no page text available, skipping document type check");
        } else {
            let report = self.fingerprint.check(&text);
            debug!(?report, "fingerprint");
            if !report.passed {
                info!(
                    header = ?report.header,
                    conflicting_tag = ?report.conflicting_tag,
                    keyword_hits = report.keyword_hits,
                    "rejected as wrong document type"
                );
                let reason = match report.conflicting_tag {
                    Some(tag) => format!("Wrong document type: this looks like {}, not Form A.", tag.to_uppercase()),
                    None => "Wrong document type: the upload does not look like Form A.".to_string(),
                };
                return Ok(ValidationResult::rejected(Outcome::WrongDocument, reason));
            }
        }

        let mut fields = self.extract(&image, &binarized, &template);
        let backfilled = self.backfill.backfill(&mut fields, &text);
        if !backfilled.is_empty() {
            debug!(keys = ?backfilled, "filled from page text");
        }

        let scored = score(&fields, self.config.noise_guard_ratio);
        info!(
            valid = scored.valid,
            complete = scored.stats.complete,
            total = scored.stats.total,
            percent = scored.stats.percent,
            backfilled = backfilled.len(),
            "form validated"
        );

        Ok(ValidationResult::scored(scored, debug.then_some(fields)))
    }

    /// Embedded PDF text, else a whole-page OCR transcript.  "" when neither
    /// source yields anything.
    fn page_text(&self, input: &DocumentInput, binarized: &GrayImage) -> String {
        if input.kind == DocumentKind::Pdf {
            let layer = normalize_page_text(&extract_text_layer(&input.bytes));
            if !layer.is_empty() {
                debug!(chars = layer.len(), "using pdf text layer");
                return layer;
            }
        }
        let page = DynamicImage::ImageLuma8(binarized.clone());
        self.caps
            .ocr
            .recognize(&page, SegMode::Auto)
            .map(|r| normalize_page_text(&r.text))
            .unwrap_or_default()
    }

    /// Geometric pass: every field region and checkbox group of `template`.
    ///
    /// Fields are cropped from the colour page and enhanced per crop.
    /// Checkboxes are cropped from the page binarized as a whole, so a blank
    /// box keeps the page's contrast instead of its own.
    fn extract(&self, image: &RgbImage, binarized: &GrayImage, template: &Template) -> FieldMap {
        let reader = RegionReader::new(&self.caps.ocr, &self.config);
        let values: Vec<(&str, String)> = template
            .fields
            .par_iter()
            .map(|spec| (spec.key.as_str(), reader.read(image, spec)))
            .collect();

        let mut fields = FieldMap::new();
        for (key, value) in values {
            fields.fill(key, &value);
        }

        let detector = CheckboxDetector::new(self.caps.ink.as_ref(), &self.caps.ocr, &self.config);
        for group in &template.checkboxes {
            let chosen = detector.resolve_group(binarized, group);
            fields.fill(&group.key, &chosen);
        }
        fields
    }
}
