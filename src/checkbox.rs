use image::{DynamicImage, GrayImage};
use imageproc::filter::box_filter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ValidatorConfig;
use crate::ocr::{RecognizerSet, SegMode};
use crate::region::crop;
use crate::template::{CheckboxGroupSpec, PixelBox};

/// Glyphs a single-character OCR pass returns for a ticked box.
static MARK_GLYPHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[xX✓✔•●■█▣▮☑☒]").unwrap());

/// Measures how much of a binarized region is covered by marks.
pub trait InkMeter: Send + Sync {
    fn name(&self) -> &str;
    /// Share of foreground pixels in `region`, or `None` when the meter
    /// cannot measure anything.
    fn ink_ratio(&self, region: &GrayImage) -> Option<f64>;
}

/// Adaptive mean thresholding: a pixel is ink when it is at least `offset`
/// darker than the mean of its `(2r+1)²` neighbourhood.
pub struct AdaptiveInkMeter {
    pub block_radius: u32,
    pub offset: i16,
}

impl AdaptiveInkMeter {
    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self {
            block_radius: config.adaptive_block_radius,
            offset: config.adaptive_offset,
        }
    }
}

impl InkMeter for AdaptiveInkMeter {
    fn name(&self) -> &str {
        "adaptive-mean"
    }

    fn ink_ratio(&self, region: &GrayImage) -> Option<f64> {
        let total = region.width() as u64 * region.height() as u64;
        if total == 0 {
            return Some(0.0);
        }
        let mean = box_filter(region, self.block_radius, self.block_radius);
        let ink = region
            .pixels()
            .zip(mean.pixels())
            .filter(|(p, m)| p[0] as i16 <= m[0] as i16 - self.offset)
            .count();
        Some(ink as f64 / total as f64)
    }
}

/// Meter for deployments without ink detection: nothing is ever marked.
pub struct NoInkMeter;

impl InkMeter for NoInkMeter {
    fn name(&self) -> &str {
        "none"
    }

    fn ink_ratio(&self, _region: &GrayImage) -> Option<f64> {
        None
    }
}

/// Which option wins when more than one option in a group reads as marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The earliest marked option in template order.
    FirstMarked,
    /// The latest marked option in template order.
    #[default]
    LastMarked,
}

impl TieBreak {
    pub fn choose<'s>(self, marked: &[&'s str]) -> Option<&'s str> {
        match self {
            TieBreak::FirstMarked => marked.first().copied(),
            TieBreak::LastMarked => marked.last().copied(),
        }
    }
}

pub struct CheckboxDetector<'a> {
    ink: &'a dyn InkMeter,
    ocr: &'a RecognizerSet,
    config: &'a ValidatorConfig,
}

impl<'a> CheckboxDetector<'a> {
    pub fn new(ink: &'a dyn InkMeter, ocr: &'a RecognizerSet, config: &'a ValidatorConfig) -> Self {
        Self { ink, ocr, config }
    }

    /// Is the box at `b` marked?
    ///
    /// `page` is the whole page after `region::preprocess`.  Ink coverage
    /// decides first; a box below the threshold still counts when a
    /// single-glyph OCR pass reads a tick or cross in it.
    pub fn detect_checkbox(&self, page: &GrayImage, b: PixelBox, ink_threshold: f64) -> bool {
        let Some(gray) = crop(page, b) else {
            return false;
        };
        let Some(ratio) = self.ink.ink_ratio(&gray) else {
            return false;
        };
        if ratio > ink_threshold {
            return true;
        }
        self.ocr
            .recognize(&DynamicImage::ImageLuma8(gray), SegMode::SingleChar)
            .is_some_and(|r| MARK_GLYPHS.is_match(&r.text))
    }

    /// Evaluate every option of `group` in template order and apply the
    /// tie-break policy.  "" when nothing is marked.
    pub fn resolve_group(&self, page: &GrayImage, group: &CheckboxGroupSpec) -> String {
        let threshold = group.ink_thresh.unwrap_or(self.config.ink_threshold);
        let (w, h) = page.dimensions();

        let marked: Vec<&str> = group
            .options
            .iter()
            .filter(|opt| {
                let hit = self.detect_checkbox(page, opt.region.to_pixels(w, h), threshold);
                debug!(group = %group.key, option = %opt.value, marked = hit, "checkbox");
                hit
            })
            .map(|opt| opt.value.as_str())
            .collect();

        if marked.len() > 1 {
            debug!(group = %group.key, ?marked, policy = ?self.config.tie_break, "several options marked");
        }
        self.config
            .tie_break
            .choose(&marked)
            .unwrap_or_default()
            .to_string()
    }
}
