use image::{DynamicImage, GrayImage, Luma};
use tesseract::{PageSegMode, Tesseract};

use super::{OcrResult, Recognizer, SegMode};

/// White margin added around crops; Tesseract finds text blocks poorly when
/// ink touches the image edge.
const PAD: u32 = 15;

pub struct TesseractRecognizer {
    pub languages: Vec<String>,
    /// Directory containing `tessdata/`; `None` → system default.
    pub tessdata_dir: Option<String>,
}

impl Recognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &DynamicImage, mode: SegMode) -> Option<OcrResult> {
        let lang = build_lang(&self.languages);
        let gray = pad_white(&image.to_luma8());
        let (w, h) = (gray.width(), gray.height());
        let (text, confidence) = try_ocr(
            gray.as_raw(),
            w,
            h,
            self.tessdata_dir.as_deref(),
            &lang,
            page_seg_mode(mode),
        )
        .ok()?;
        Some(OcrResult {
            text,
            confidence,
            engine_name: self.name().to_string(),
        })
    }
}

impl TesseractRecognizer {
    /// `true` when the library loads and the language data is present.
    pub fn probe(&self) -> bool {
        Tesseract::new(self.tessdata_dir.as_deref(), Some(&build_lang(&self.languages))).is_ok()
    }
}

fn page_seg_mode(mode: SegMode) -> PageSegMode {
    match mode {
        SegMode::Auto => PageSegMode::PsmAuto,
        SegMode::Block => PageSegMode::PsmSingleBlock,
        SegMode::SingleLine => PageSegMode::PsmSingleLine,
        SegMode::SingleWord => PageSegMode::PsmSingleWord,
        SegMode::SingleChar => PageSegMode::PsmSingleChar,
    }
}

/// Call Tesseract once on an 8-bit grayscale frame.
fn try_ocr(
    bytes: &[u8],
    w: u32,
    h: u32,
    datadir: Option<&str>,
    lang: &str,
    psm: PageSegMode,
) -> Result<(String, f64), ()> {
    let mut tess = Tesseract::new(datadir, Some(lang))
        .map_err(|_| ())?
        .set_frame(bytes, w as i32, h as i32, 1, w as i32)
        .map_err(|_| ())?;
    tess.set_page_seg_mode(psm);
    let mut tess = tess.recognize().map_err(|_| ())?;

    let raw = tess.get_text().map_err(|_| ())?;
    let trimmed = raw.trim().to_string();
    if trimmed.is_empty() {
        return Err(());
    }

    let conf = tess.mean_text_conf().max(0) as f64 / 100.0;
    Ok((trimmed, conf))
}

fn pad_white(gray: &GrayImage) -> GrayImage {
    let (gw, gh) = gray.dimensions();
    let mut padded = GrayImage::from_pixel(gw + PAD * 2, gh + PAD * 2, Luma([255u8]));
    image::imageops::overlay(&mut padded, gray, PAD as i64, PAD as i64);
    padded
}

fn build_lang(languages: &[String]) -> String {
    if languages.is_empty() {
        return "eng".to_string();
    }
    languages
        .iter()
        .map(|l| match l.trim() {
            "en" | "eng" => "eng",
            "fil" | "tl" | "tgl" => "tgl",
            other => other,
        })
        .collect::<Vec<_>>()
        .join("+")
}
