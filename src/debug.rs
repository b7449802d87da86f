//! Named PNG crops of every template region, for checking template alignment
//! against a real upload.

use base64::Engine;
use image::{codecs::png::PngEncoder, ExtendedColorType, ImageEncoder, ImageError, RgbImage};
use serde::Serialize;

use crate::config::ValidatorConfig;
use crate::region::{crop, preprocess};
use crate::template::Template;

#[derive(Debug, Clone)]
pub struct CropEntry {
    /// Field key, or `group:value` for checkbox options.
    pub name: String,
    pub png: Vec<u8>,
}

/// JSON manifest line for one crop.
#[derive(Debug, Serialize)]
pub struct CropPreview<'a> {
    pub name: &'a str,
    pub png_base64: String,
}

impl CropEntry {
    pub fn preview(&self) -> CropPreview<'_> {
        CropPreview {
            name: &self.name,
            png_base64: base64::engine::general_purpose::STANDARD.encode(&self.png),
        }
    }

    /// File name for writing this crop to disk.
    pub fn file_name(&self) -> String {
        format!("{}.png", self.name.replace([':', '/', '\\'], "_"))
    }
}

/// Field crops are exported the way OCR sees them (preprocessed); option
/// crops are raw so ink can be judged by eye.  Regions that fall off the
/// page are skipped.
pub fn export_crops(
    image: &RgbImage,
    template: &Template,
    config: &ValidatorConfig,
) -> Result<Vec<CropEntry>, ImageError> {
    let (w, h) = image.dimensions();
    let mut out = Vec::new();

    for field in &template.fields {
        let Some(region) = crop(image, field.region.to_pixels(w, h)) else {
            continue;
        };
        let gray = preprocess(&region, config);
        out.push(CropEntry {
            name: field.key.clone(),
            png: encode_png(gray.as_raw(), gray.width(), gray.height(), ExtendedColorType::L8)?,
        });
    }

    for group in &template.checkboxes {
        for option in &group.options {
            let Some(region) = crop(image, option.region.to_pixels(w, h)) else {
                continue;
            };
            out.push(CropEntry {
                name: format!("{}:{}", group.key, option.value),
                png: encode_png(region.as_raw(), region.width(), region.height(), ExtendedColorType::Rgb8)?,
            });
        }
    }
    Ok(out)
}

fn encode_png(bytes: &[u8], w: u32, h: u32, color: ExtendedColorType) -> Result<Vec<u8>, ImageError> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png).write_image(bytes, w, h, color)?;
    Ok(png)
}
