#[cfg(feature = "oar")]
pub mod oar;
#[cfg(feature = "tesseract")]
pub mod tesseract;

use crate::config::OcrSettings;
use image::DynamicImage;
use rayon::prelude::*;
use tracing::{debug, info, warn};

// ── Public types ─────────────────────────────────────────────────────────────

/// How the engine should segment the image it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegMode {
    /// Whole page, automatic layout analysis.
    Auto,
    /// One uniform block of text.
    Block,
    /// One text line (field crops).
    SingleLine,
    SingleWord,
    /// One glyph (checkbox marks, tiny fields).
    SingleChar,
}

impl SegMode {
    /// Map a Tesseract `--psm` number from the template.
    pub fn from_psm(psm: u8) -> Self {
        match psm {
            6 => SegMode::Block,
            7 | 13 => SegMode::SingleLine,
            8 => SegMode::SingleWord,
            10 => SegMode::SingleChar,
            _ => SegMode::Auto,
        }
    }
}

/// Result produced by a single `Recognizer` for one image.
#[derive(Debug, Clone, Default)]
pub struct OcrResult {
    pub text: String,
    pub confidence: f64,     // 0.0 – 1.0
    pub engine_name: String, // e.g. "tesseract", "oar-ocr"
}

/// Every OCR backend implements this.
///
/// `recognize` returns `None` when the engine cannot read anything (or cannot
/// handle `mode` at all); callers treat that as an empty reading.
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &str;
    fn recognize(&self, image: &DynamicImage, mode: SegMode) -> Option<OcrResult>;
}

// ── Orchestration ────────────────────────────────────────────────────────────

/// The OCR capability handed to the region reader, checkbox detector and
/// transcript builder.
///
/// - `priority` engines run first (in parallel).  If the best result's
///   confidence reaches `fast_threshold`, the `fallback` engines are skipped.
/// - Otherwise `fallback` engines also run and the most confident candidate
///   across all engines wins.
///
/// An empty set is the "no OCR installed" capability: every call yields `None`.
pub struct RecognizerSet {
    priority: Vec<Box<dyn Recognizer>>,
    fallback: Vec<Box<dyn Recognizer>>,
    fast_threshold: f64,
}

impl RecognizerSet {
    pub fn new(
        priority: Vec<Box<dyn Recognizer>>,
        fallback: Vec<Box<dyn Recognizer>>,
        fast_threshold: f64,
    ) -> Self {
        Self {
            priority,
            fallback,
            fast_threshold: fast_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn none() -> Self {
        Self::new(Vec::new(), Vec::new(), 1.0)
    }

    pub fn single(engine: Box<dyn Recognizer>) -> Self {
        Self::new(vec![engine], Vec::new(), 1.0)
    }

    /// Build the engines compiled into this binary.
    ///
    /// oar-ocr (when configured) is the priority engine; Tesseract is the
    /// fallback.  Engines that fail to initialise are logged and left out.
    pub fn from_settings(settings: &OcrSettings) -> Self {
        #[allow(unused_mut)]
        let mut priority: Vec<Box<dyn Recognizer>> = Vec::new();
        #[allow(unused_mut)]
        let mut fallback: Vec<Box<dyn Recognizer>> = Vec::new();

        #[cfg(feature = "oar")]
        {
            match (&settings.oar_rec_model, &settings.oar_dict) {
                (Some(rec), Some(dict)) => match oar::OarRecognizer::load(rec, dict) {
                    Ok(engine) => priority.push(Box::new(engine)),
                    Err(e) => warn!(error = %e, "oar-ocr init failed"),
                },
                _ => debug!("oar-ocr models not configured"),
            }
        }

        #[cfg(feature = "tesseract")]
        {
            let engine = tesseract::TesseractRecognizer {
                languages: settings.languages.clone(),
                tessdata_dir: settings.tessdata_dir.clone(),
            };
            if engine.probe() {
                fallback.push(Box::new(engine));
            } else {
                warn!(tessdata = ?settings.tessdata_dir, "tesseract could not be initialised");
            }
        }

        let set = Self::new(priority, fallback, settings.fast_threshold);
        if set.is_available() {
            info!(engines = ?set.engine_names(), "ocr engines ready");
        } else {
            warn!("no ocr engine available, fields will only come from the pdf text layer");
        }
        set
    }

    pub fn is_available(&self) -> bool {
        !self.priority.is_empty() || !self.fallback.is_empty()
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.priority
            .iter()
            .chain(self.fallback.iter())
            .map(|e| e.name())
            .collect()
    }

    /// Recognize `image` and return the winning candidate, if any.
    pub fn recognize(&self, image: &DynamicImage, mode: SegMode) -> Option<OcrResult> {
        if !self.is_available() || image.width() == 0 || image.height() == 0 {
            return None;
        }

        // ── Step 1: priority engines (fast path) ─────────────────────────────
        let mut results: Vec<OcrResult> = self
            .priority
            .par_iter()
            .filter_map(|e| e.recognize(image, mode))
            .filter(|r| !r.text.trim().is_empty())
            .collect();

        if let Some(best) = best_result(&results) {
            if best.confidence >= self.fast_threshold {
                debug!(
                    engine = %best.engine_name,
                    confidence = best.confidence,
                    "fast path, skipping fallback engines"
                );
                return Some(trimmed(best.clone()));
            }
        }

        // ── Step 2: fallback engines ─────────────────────────────────────────
        results.extend(
            self.fallback
                .par_iter()
                .filter_map(|e| e.recognize(image, mode))
                .filter(|r| !r.text.trim().is_empty())
                .collect::<Vec<_>>(),
        );

        for r in &results {
            debug!(engine = %r.engine_name, text = ?r.text, confidence = r.confidence, "candidate");
        }

        best_result(&results).cloned().map(trimmed)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Highest confidence wins; earlier engines win ties.
fn best_result(results: &[OcrResult]) -> Option<&OcrResult> {
    results.iter().reduce(|best, r| {
        if r.confidence > best.confidence {
            r
        } else {
            best
        }
    })
}

fn trimmed(mut r: OcrResult) -> OcrResult {
    r.text = r.text.trim().to_string();
    r
}
