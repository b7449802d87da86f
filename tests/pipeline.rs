//! End-to-end runs over synthetic form photos.
//!
//! Every text field region gets `index + 1` vertical bars; the stub engine
//! counts the bars to know which field it is looking at and answers with
//! that field's value.  Checkbox marks are solid squares, measured by the
//! real adaptive ink meter.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use formcheck_lib::checkbox::{AdaptiveInkMeter, NoInkMeter, TieBreak};
use formcheck_lib::ocr::{OcrResult, Recognizer, RecognizerSet, SegMode};
use formcheck_lib::raster::NoPdfRenderer;
use formcheck_lib::template::{CheckboxGroupSpec, FieldSpec, OptionSpec, PixelBox};
use formcheck_lib::{
    Capabilities, DocumentInput, InputError, Outcome, Template, TemplateRegistry, TemplateSource,
    Validator, ValidatorConfig,
};

const W: u32 = 2000;
const H: u32 = 2800;

const FORM_A_TEXT: &str = "REPUBLIC SCHOLARSHIP PROGRAM\nFORM A\nPERSONAL INFORMATION\n\
    Name of Applicant\nDate of Birth\nMobile Phone No.\nEmail Address\nCitizenship\n\
    Sex: Male Female\nStrand: STEM NON-STEM";

/// Reads fields by counting bars; whole-page requests get a fixed transcript.
struct BarReader {
    values: Vec<String>,
    page_text: String,
}

impl Recognizer for BarReader {
    fn name(&self) -> &str {
        "bars"
    }

    fn recognize(&self, image: &DynamicImage, mode: SegMode) -> Option<OcrResult> {
        let text = match mode {
            SegMode::Auto => self.page_text.clone(),
            SegMode::SingleChar => return None,
            _ => {
                let gray = image.to_luma8();
                let y = gray.height() / 2;
                let mut runs = 0;
                let mut in_bar = false;
                for x in 0..gray.width() {
                    let dark = gray.get_pixel(x, y)[0] < 128;
                    if dark && !in_bar {
                        runs += 1;
                    }
                    in_bar = dark;
                }
                if runs == 0 {
                    return None;
                }
                self.values.get(runs - 1)?.clone()
            }
        };
        Some(OcrResult {
            text,
            confidence: 1.0,
            engine_name: "bars".into(),
        })
    }
}

struct Form {
    template: Template,
    values: Vec<String>,
}

fn value_for(key: &str, index: usize) -> String {
    match key {
        "zipcode" => "8600".into(),
        "email" => "juan.delacruz@example.com".into(),
        "mobile" => "09171234567".into(),
        "father_income" | "mother_income" | "total_annual_gross_income" | "annual_contribution_any" => {
            "96,000".into()
        }
        _ => format!("Entry {index}"),
    }
}

/// The built-in template's keys laid out on a regular grid.
fn form() -> Form {
    let builtin = Template::builtin().unwrap();
    let mut values = Vec::new();
    let fields = builtin
        .fields
        .iter()
        .enumerate()
        .map(|(i, f)| {
            values.push(value_for(&f.key, i));
            let (col, row) = ((i % 3) as f64, (i / 3) as f64);
            let x0 = 0.05 + col * 0.3;
            let y0 = 0.05 + row * 0.03;
            FieldSpec {
                key: f.key.clone(),
                region: [x0, y0, x0 + 0.2, y0 + 0.02].into(),
                psm: 7,
                max_len: 120,
            }
        })
        .collect();
    let checkboxes = builtin
        .checkboxes
        .iter()
        .enumerate()
        .map(|(g, group)| CheckboxGroupSpec {
            key: group.key.clone(),
            ink_thresh: None,
            options: group
                .options
                .iter()
                .enumerate()
                .map(|(j, opt)| {
                    let x0 = 0.1 + j as f64 * 0.1;
                    let y0 = 0.5 + g as f64 * 0.05;
                    OptionSpec {
                        value: opt.value.clone(),
                        region: [x0, y0, x0 + 0.02, y0 + 0.015].into(),
                    }
                })
                .collect(),
        })
        .collect();
    Form {
        template: Template { fields, checkboxes },
        values,
    }
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32) {
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, Rgb([15, 15, 15]));
        }
    }
}

fn draw_bars(img: &mut RgbImage, b: PixelBox, count: usize) {
    for n in 0..count as u32 {
        let x = b.x0 + 10 + n * 8;
        fill_rect(img, x, b.y0 + 10, x + 4, b.y1 - 10);
    }
}

fn draw_mark(img: &mut RgbImage, b: PixelBox) {
    let cx = (b.x0 + b.x1) / 2;
    let cy = (b.y0 + b.y1) / 2;
    fill_rect(img, cx - 10, cy - 10, cx + 10, cy + 10);
}

/// Off-white paper grain between 238 and 251, as a phone camera sees it.
fn grain(x: u32, y: u32) -> u8 {
    (238 + (x * 7 + y * 13) % 14) as u8
}

/// Render a photo with every field written except `blank_keys`, and the
/// listed checkbox options marked.
fn photo(form: &Form, blank_keys: &[&str], marks: &[(&str, &str)]) -> Vec<u8> {
    photo_on(|_, _| 255, form, blank_keys, marks)
}

fn photo_on(paper: fn(u32, u32) -> u8, form: &Form, blank_keys: &[&str], marks: &[(&str, &str)]) -> Vec<u8> {
    let mut img = RgbImage::from_fn(W, H, |x, y| {
        let v = paper(x, y);
        Rgb([v, v, v])
    });
    for (i, field) in form.template.fields.iter().enumerate() {
        if !blank_keys.contains(&field.key.as_str()) {
            draw_bars(&mut img, field.region.to_pixels(W, H), i + 1);
        }
    }
    for group in &form.template.checkboxes {
        for opt in &group.options {
            if marks.contains(&(group.key.as_str(), opt.value.as_str())) {
                draw_mark(&mut img, opt.region.to_pixels(W, H));
            }
        }
    }
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn validator_with(form: &Form, page_text: &str, config: ValidatorConfig) -> Validator {
    let caps = Capabilities {
        pdf: Box::new(NoPdfRenderer),
        ocr: RecognizerSet::single(Box::new(BarReader {
            values: form.values.clone(),
            page_text: page_text.to_string(),
        })),
        ink: Box::new(AdaptiveInkMeter::from_config(&config)),
    };
    let registry = TemplateRegistry::new(TemplateSource::Inline(Arc::new(form.template.clone())));
    Validator::new(config, registry, caps).unwrap()
}

fn validator(form: &Form, page_text: &str) -> Validator {
    validator_with(form, page_text, ValidatorConfig::default())
}

const ALL_MARKS: &[(&str, &str)] = &[("sex", "female"), ("strand", "stem"), ("relatives_support", "yes")];

#[test]
fn clean_form_is_valid() {
    let form = form();
    let v = validator(&form, FORM_A_TEXT);
    let res = v
        .validate(&DocumentInput::image(photo(&form, &[], ALL_MARKS)), true)
        .unwrap();

    assert!(res.valid, "{res:#?}");
    assert_eq!(res.outcome, Outcome::Complete);
    assert_eq!(res.stats.total, 36);
    assert_eq!(res.stats.complete, 36);
    assert_eq!(res.stats.percent, 100);
    assert!(res.missing_fields.personal.is_empty());
    assert!(res.missing_fields.family.is_empty());
    assert!(res.missing_fields.financial.is_empty());
    assert_eq!(
        res.message.as_deref(),
        Some("Form A looks valid. All required fields are present.")
    );
    assert!(res.reason.is_none());

    let fields = res.fields.unwrap();
    assert_eq!(fields.get("sex"), "female");
    assert_eq!(fields.get("strand"), "stem");
    assert_eq!(fields.get("email"), "juan.delacruz@example.com");
    assert_eq!(fields.get("father_income"), "96000");
}

#[test]
fn blank_email_and_unticked_strand_are_reported() {
    let form = form();
    let v = validator(&form, FORM_A_TEXT);
    let marks = [("sex", "female"), ("relatives_support", "no")];
    let res = v
        .validate(&DocumentInput::image(photo(&form, &["email"], &marks)), false)
        .unwrap();

    assert!(!res.valid);
    assert_eq!(res.outcome, Outcome::Incomplete);
    assert!(res.missing_fields.personal.contains(&"Email Address".to_string()));
    assert!(res
        .missing_fields
        .personal
        .contains(&"Senior High School Strand (STEM/NON-STEM)".to_string()));
    assert_eq!(res.stats.complete, 34);
    assert!(res.stats.percent > 0 && res.stats.percent < 100);
    assert!(res.fields.is_none());
    assert_eq!(
        res.reason.as_deref(),
        Some("Some required fields are missing/unchecked.")
    );
    assert!(res.message.is_none());
}

#[test]
fn grainy_photo_leaves_unticked_boxes_empty() {
    let form = form();
    let v = validator(&form, FORM_A_TEXT);
    let marks = [("sex", "male"), ("relatives_support", "yes")];
    let res = v
        .validate(&DocumentInput::image(photo_on(grain, &form, &["email"], &marks)), true)
        .unwrap();

    assert_eq!(res.outcome, Outcome::Incomplete);
    assert_eq!(res.stats.complete, 34);
    let fields = res.fields.unwrap();
    assert_eq!(fields.get("sex"), "male");
    assert_eq!(fields.get("relatives_support"), "yes");
    assert_eq!(fields.get("strand"), "");
    assert_eq!(fields.get("email"), "");
    assert_eq!(fields.get("zipcode"), "8600");
}

#[test]
fn unrelated_document_is_rejected_before_extraction() {
    let form = form();
    let text = "CERTIFICATE OF ENROLLMENT\nThis certifies that the student named below\n\
                is officially enrolled for the first semester.";
    let v = validator(&form, text);
    let res = v
        .validate(&DocumentInput::image(photo(&form, &[], ALL_MARKS)), true)
        .unwrap();

    assert!(!res.valid);
    assert_eq!(res.outcome, Outcome::WrongDocument);
    assert_eq!(res.stats.percent, 0);
    assert!(res.reason.unwrap().contains("Wrong document type"));
    assert!(res.fields.is_none());
    assert!(res.filled_fields.personal.is_empty());
}

#[test]
fn other_form_tag_is_rejected_even_with_header() {
    let form = form();
    let text = format!("{FORM_A_TEXT}\nFORM B - FAMILY BACKGROUND");
    let v = validator(&form, &text);
    let res = v
        .validate(&DocumentInput::image(photo(&form, &[], ALL_MARKS)), false)
        .unwrap();
    assert_eq!(res.outcome, Outcome::WrongDocument);
    assert!(res.reason.unwrap().contains("FORM B"));
}

#[test]
fn photo_with_too_little_text_is_an_input_error() {
    let form = form();
    let v = validator(&form, "FORM A");
    let err = v
        .validate(&DocumentInput::image(photo(&form, &[], ALL_MARKS)), false)
        .unwrap_err();
    assert!(matches!(err, InputError::Unreadable { chars: 6 }));
}

#[test]
fn double_mark_follows_tie_break_policy() {
    let form = form();
    let marks = [("sex", "male"), ("sex", "female"), ("strand", "stem"), ("strand", "non-stem"), ("relatives_support", "yes")];
    let bytes = photo(&form, &[], &marks);

    let last = validator(&form, FORM_A_TEXT)
        .validate(&DocumentInput::image(bytes.clone()), true)
        .unwrap();
    let fields = last.fields.unwrap();
    assert_eq!(fields.get("sex"), "female");
    assert_eq!(fields.get("strand"), "non-stem");

    let mut config = ValidatorConfig::default();
    config.tie_break = TieBreak::FirstMarked;
    let first = validator_with(&form, FORM_A_TEXT, config)
        .validate(&DocumentInput::image(bytes), true)
        .unwrap();
    let fields = first.fields.unwrap();
    assert_eq!(fields.get("sex"), "male");
    assert_eq!(fields.get("strand"), "stem");
}

#[test]
fn without_engines_only_marks_count_and_noise_guard_zeroes_them() {
    let form = form();
    let registry = TemplateRegistry::new(TemplateSource::Inline(Arc::new(form.template.clone())));
    let caps = Capabilities {
        pdf: Box::new(NoPdfRenderer),
        ocr: RecognizerSet::none(),
        ink: Box::new(AdaptiveInkMeter::from_config(&ValidatorConfig::default())),
    };
    let v = Validator::new(ValidatorConfig::default(), registry, caps).unwrap();
    let res = v
        .validate(&DocumentInput::image(photo(&form, &[], ALL_MARKS)), true)
        .unwrap();

    assert_eq!(res.outcome, Outcome::Incomplete);
    assert_eq!(res.filled_fields.personal.len(), 2);
    assert_eq!(res.stats.complete, 0);
    assert_eq!(res.stats.percent, 0);
    let fields = res.fields.unwrap();
    assert_eq!(fields.get("name_of_applicant"), "");
    assert_eq!(fields.get("relatives_support"), "yes");
}

#[test]
fn without_ink_meter_no_option_is_selected() {
    let form = form();
    let registry = TemplateRegistry::new(TemplateSource::Inline(Arc::new(form.template.clone())));
    let caps = Capabilities {
        pdf: Box::new(NoPdfRenderer),
        ocr: RecognizerSet::single(Box::new(BarReader {
            values: form.values.clone(),
            page_text: FORM_A_TEXT.to_string(),
        })),
        ink: Box::new(NoInkMeter),
    };
    let v = Validator::new(ValidatorConfig::default(), registry, caps).unwrap();
    let res = v
        .validate(&DocumentInput::image(photo(&form, &[], ALL_MARKS)), true)
        .unwrap();

    let fields = res.fields.unwrap();
    let selected: HashMap<&str, &str> = ["sex", "strand", "relatives_support"]
        .into_iter()
        .map(|k| (k, fields.get(k)))
        .collect();
    assert!(selected.values().all(|v| v.is_empty()), "{selected:?}");
    assert_eq!(res.stats.complete, 33);
}

#[test]
fn pdf_without_renderer_is_unrenderable() {
    let form = form();
    let v = validator(&form, FORM_A_TEXT);
    let res = v
        .validate(&DocumentInput::pdf(b"%PDF-1.7\n%%EOF\n".to_vec()), false)
        .unwrap();
    assert_eq!(res.outcome, Outcome::Unrenderable);
    assert_eq!(res.stats.percent, 0);
}

#[test]
fn unreadable_template_file_is_a_template_error() {
    let form = form();
    let caps = Capabilities {
        pdf: Box::new(NoPdfRenderer),
        ocr: RecognizerSet::none(),
        ink: Box::new(NoInkMeter),
    };
    let registry = TemplateRegistry::new(TemplateSource::File("/nonexistent/form_a.json".into()));
    let v = Validator::new(ValidatorConfig::default(), registry, caps).unwrap();
    let res = v
        .validate(&DocumentInput::image(photo(&form, &[], &[])), false)
        .unwrap();
    assert_eq!(res.outcome, Outcome::TemplateError);
    assert!(!res.valid);
}
