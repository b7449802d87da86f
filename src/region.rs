use image::{DynamicImage, GrayImage, ImageBuffer, Pixel, RgbImage};
use imageproc::contrast::stretch_contrast;
use imageproc::filter::median_filter;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::ValidatorConfig;
use crate::ocr::{RecognizerSet, SegMode};
use crate::template::{FieldSpec, PixelBox};

/// Keys whose values are money amounts.
pub const MONEY_KEYS: &[&str] = &[
    "father_income",
    "mother_income",
    "total_annual_gross_income",
    "annual_contribution_any",
];

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());
static DASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());
static ZIPCODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").unwrap());
static MONEY_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d{1,2})?").unwrap());

// ── Geometry ─────────────────────────────────────────────────────────────────

/// Cut `b` out of the page, clamped to the page bounds.
/// Returns `None` when nothing of the box lies on the page.
pub fn crop<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>, b: PixelBox) -> Option<ImageBuffer<P, Vec<P::Subpixel>>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let x1 = b.x1.min(image.width());
    let y1 = b.y1.min(image.height());
    if x1 <= b.x0 || y1 <= b.y0 {
        return None;
    }
    Some(image::imageops::crop_imm(image, b.x0, b.y0, x1 - b.x0, y1 - b.y0).to_image())
}

// ── Preprocessing ────────────────────────────────────────────────────────────

/// Grayscale → contrast stretch → median despeckle.
///
/// The stretch is skipped when the luminance span is below
/// `min_contrast_span`: a crop of bare paper would otherwise have its grain
/// blown up to full black and white.
pub fn enhance(crop: &RgbImage, config: &ValidatorConfig) -> GrayImage {
    let mut gray = image::imageops::grayscale(crop);
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi > lo && hi - lo >= config.min_contrast_span {
        gray = stretch_contrast(&gray, lo, hi, 0, 255);
    }
    if config.median_radius > 0 {
        gray = median_filter(&gray, config.median_radius, config.median_radius);
    }
    gray
}

/// `enhance` followed by a fixed-threshold binarization: ink → 0, paper → 255.
///
/// The threshold sits above the grey of printed rule lines after the
/// stretch, so blank underlines mostly vanish while pen strokes stay.
pub fn preprocess(crop: &RgbImage, config: &ValidatorConfig) -> GrayImage {
    let mut gray = enhance(crop, config);
    for p in gray.pixels_mut() {
        p[0] = if p[0] < config.binarize_threshold { 0 } else { 255 };
    }
    gray
}

// ── Text normalization ───────────────────────────────────────────────────────

/// Clean one line of OCR output: unify dashes and spaces, drop control
/// characters, truncate to `max_len` characters, then remove blank-line
/// artifacts (underscore runs, dash runs) and stray edge punctuation.
pub fn clean_ocr_text(raw: &str, max_len: usize) -> String {
    let unified: String = raw
        .chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' => '-',
            '\u{00a0}' | '\n' | '\r' | '\t' => ' ',
            c => c,
        })
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = SPACES.replace_all(unified.trim(), " ");
    let truncated: String = collapsed.chars().take(max_len).collect();

    let s = UNDERSCORE_RUNS.replace_all(&truncated, " ");
    let s = DASH_RUNS.replace_all(&s, " ");
    let s = SPACES.replace_all(s.trim(), " ");
    s.trim_matches(|c: char| " .,:;|-".contains(c)).to_string()
}

/// Exactly four digits, else empty.
pub fn normalize_zipcode(value: &str) -> String {
    let v = value.trim();
    if ZIPCODE.is_match(v) {
        v.to_string()
    } else {
        String::new()
    }
}

/// Spaces removed, case preserved; empty unless it looks like `local@domain.tld`.
pub fn normalize_email(value: &str) -> String {
    let v: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if EMAIL.is_match(&v) {
        v
    } else {
        String::new()
    }
}

/// Strip currency marks and thousands separators, keep the first number
/// (at most two decimals).  Empty when no digits are present.
pub fn normalize_money(value: &str) -> String {
    let v = value.replace('₱', "").replace(',', "");
    MONEY_TOKEN
        .find(&v)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Apply the field-specific syntax rule for `key`, if it has one.
pub fn normalize_for_key(key: &str, value: &str) -> String {
    match key {
        "zipcode" => normalize_zipcode(value),
        "email" => {
            if value.is_empty() {
                String::new()
            } else {
                normalize_email(value)
            }
        }
        k if MONEY_KEYS.contains(&k) => normalize_money(value),
        _ => value.to_string(),
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Reads free-text fields out of template regions.
pub struct RegionReader<'a> {
    ocr: &'a RecognizerSet,
    config: &'a ValidatorConfig,
}

impl<'a> RegionReader<'a> {
    pub fn new(ocr: &'a RecognizerSet, config: &'a ValidatorConfig) -> Self {
        Self { ocr, config }
    }

    /// Crop, preprocess and recognize one region.  Any failure → "".
    pub fn read_field(&self, image: &RgbImage, b: PixelBox, mode: SegMode, max_len: usize) -> String {
        let Some(region) = crop(image, b) else {
            return String::new();
        };
        let prepared = DynamicImage::ImageLuma8(preprocess(&region, self.config));
        self.ocr
            .recognize(&prepared, mode)
            .map(|r| clean_ocr_text(&r.text, max_len))
            .unwrap_or_default()
    }

    /// Read a template field and apply its key's syntax rule.
    pub fn read(&self, image: &RgbImage, spec: &FieldSpec) -> String {
        let b = spec.region.to_pixels(image.width(), image.height());
        let raw = self.read_field(image, b, spec.mode(), spec.max_len);
        let value = normalize_for_key(&spec.key, &raw);
        debug!(key = %spec.key, raw = ?raw, value = ?value, "field read");
        value
    }
}
