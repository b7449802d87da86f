use image::{imageops::FilterType, DynamicImage, GrayImage};
use oar_ocr::predictors::TextRecognitionPredictor;
use std::path::Path;
use tracing::{debug, warn};

use super::{OcrResult, Recognizer, SegMode};

/// The PP-OCR recognition models normalise line height to 48 px.
const LINE_HEIGHT: u32 = 48;

/// Line recognizer over a PP-OCR recognition model.
///
/// There is no detection stage, so only crops that already hold a single
/// line, word or glyph can be read.
pub struct OarRecognizer {
    rec: TextRecognitionPredictor,
}

// The ONNX session is not marked thread-safe, but prediction does not
// mutate the predictor.
unsafe impl Send for OarRecognizer {}
unsafe impl Sync for OarRecognizer {}

impl OarRecognizer {
    pub fn load(rec_model: &Path, dict: &Path) -> Result<Self, String> {
        let rec = TextRecognitionPredictor::builder()
            .dict_path(dict.to_string_lossy().as_ref())
            .score_threshold(0.0)
            .build(rec_model.to_string_lossy().as_ref())
            .map_err(|e| e.to_string())?;
        Ok(Self { rec })
    }
}

/// Nearest-neighbour upscale of short crops so binarized strokes stay crisp.
fn to_line_height(gray: GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    if h == 0 || h >= LINE_HEIGHT {
        return gray;
    }
    let scale = LINE_HEIGHT.div_ceil(h);
    image::imageops::resize(&gray, w * scale, h * scale, FilterType::Nearest)
}

impl Recognizer for OarRecognizer {
    fn name(&self) -> &str {
        "oar-ocr"
    }

    fn recognize(&self, image: &DynamicImage, mode: SegMode) -> Option<OcrResult> {
        if matches!(mode, SegMode::Auto | SegMode::Block) {
            return None;
        }

        let line = DynamicImage::ImageLuma8(to_line_height(image.to_luma8())).to_rgb8();
        let result = match self.rec.predict(vec![line]) {
            Ok(r) => r,
            Err(e) => {
                warn!(engine = self.name(), error = %e, "recognition failed");
                return None;
            }
        };

        let text = result.texts.into_iter().next()?;
        let score = result.scores.into_iter().next().unwrap_or(0.0);
        debug!(engine = self.name(), ?mode, text = ?text, confidence = score, "line read");

        (!text.is_empty()).then(|| OcrResult {
            text,
            confidence: score as f64,
            engine_name: self.name().to_string(),
        })
    }
}
