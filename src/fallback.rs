//! Whole-page text fallback.
//!
//! Works on the PDF text layer or, for photos and scanned PDFs, on a
//! whole-page OCR transcript.  Confirms the document type, then back-fills
//! fields the geometric pass left blank using label-anchored patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::panic;
use tracing::{debug, warn};

use crate::config::{FingerprintConfig, ValidatorConfig};
use crate::fields::FieldMap;
use crate::region::{clean_ocr_text, normalize_for_key, normalize_money};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:n\s*/\s*a|n\.a\.?|na|none|null|nil|[_\-.\s]+|[☐□▢◻❏❑\[\]()\s]+)$").unwrap()
});
static HORIZONTAL_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static ANY_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RULE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[_\-\s]+$").unwrap());
static MOBILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:\+63|\b0)9\d{9}\b").unwrap());

/// Free-text labels: (field key, label pattern).  Each pattern carries its
/// own word boundaries, since a label may end in `.` or `)`.
const LABELS: &[(&str, &str)] = &[
    ("name_of_applicant", r"name\s+of\s+(?:the\s+)?applicant\b"),
    ("date_of_birth", r"date\s+of\s+birth\b"),
    ("mobile", r"mobile\b(?:\s+phone\b)?(?:\s+no\b\.?|\s+number\b)?"),
    ("email", r"e-?mail\b(?:\s+address\b)?"),
    ("permanent_address", r"permanent\s+address\b"),
    (
        "city_municipality",
        r"city\s*/\s*municipality\b|city\s+or\s+municipality\b|municipality\b",
    ),
    ("province", r"province\b"),
    ("zipcode", r"zip\s*code\b|zip\b"),
    ("citizenship", r"citizenship\b"),
    ("purpose_any", r"purpose\b(?:\s+of\s+(?:the\s+)?(?:financial\s+)?contribution\b)?"),
    (
        "relationship_any",
        r"relationship\s+(?:of\s+(?:the\s+)?contributor\s+)?to\s+(?:the\s+)?applicant\b",
    ),
];

/// Money labels: (field key, label pattern).
const MONEY_LABELS: &[(&str, &str)] = &[
    ("annual_contribution_any", r"annual\s+contribution\b(?:\s*\(\s*in\s+pesos\s*\))?"),
    ("total_annual_gross_income", r"total\s+annual\s+gross\s+income\b(?:\s+in\s+\d{4}\b)?"),
];

/// Family table rows: (attribute, row label pattern).  Each row reads
/// `<LABEL>: FATHER: <value> MOTHER: <value>`.
const FAMILY_ROWS: &[(&str, &str)] = &[
    ("name", r"name"),
    ("civil_status", r"civil\s+status"),
    ("relationship", r"relationship"),
    ("contact", r"contact(?:\s+no\.?|\s+number)?"),
    ("education", r"(?:highest\s+)?educational\s+attainment|education"),
    ("occupation", r"occupation"),
    ("class_of_worker", r"class\s+of\s+worker"),
    ("employer_name", r"name\s+of\s+employer|employer'?s?\s+name"),
    ("employer_address", r"address\s+of\s+employer|employer'?s?\s+address"),
    ("income", r"(?:monthly\s+|annual\s+)?income"),
];

/// Words that end a captured value when they show up after it on the same line.
const EXTRA_STOPS: &[&str] = &["sex", "strand", "father", "mother", "age"];

struct ChoiceGroup {
    key: &'static str,
    /// Longer option words first so "non-stem" is consumed before "stem".
    options: &'static [(&'static str, &'static str)],
    /// Infer from a lone option word when no mark glyph is found.
    loose: bool,
}

const CHOICE_GROUPS: &[ChoiceGroup] = &[
    ChoiceGroup {
        key: "sex",
        options: &[("female", r"female"), ("male", r"male")],
        loose: true,
    },
    ChoiceGroup {
        key: "strand",
        options: &[("non-stem", r"non[\s-]?stem"), ("stem", r"stem")],
        loose: true,
    },
    ChoiceGroup {
        key: "relatives_support",
        options: &[("yes", r"yes"), ("no", r"no")],
        loose: false,
    },
];

/// Ticked-box glyphs that may precede an option word in extracted text.
const MARK_PREFIX: &str = r"(?:[☑☒✓✔■●▣]|\[\s*[xX✓✔]\s*\]|\(\s*[xX✓✔]\s*\))\s*";

// ── Blank predicate ──────────────────────────────────────────────────────────

/// A value is blank when it is empty, shorter than two characters, or a
/// placeholder such as "N/A", "----" or an empty box glyph.
pub fn is_blank(value: &str) -> bool {
    let v = value.trim();
    v.chars().count() < 2 || PLACEHOLDER.is_match(v)
}

// ── Transcript sources ───────────────────────────────────────────────────────

/// Embedded text of a PDF, "" when there is none or extraction fails.
pub fn extract_text_layer(pdf: &[u8]) -> String {
    // pdf-extract panics on some malformed content streams.
    match panic::catch_unwind(|| pdf_extract::extract_text_from_mem(pdf)) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!(error = %e, "pdf text layer unavailable");
            String::new()
        }
        Err(_) => {
            warn!("pdf text extraction panicked");
            String::new()
        }
    }
}

/// Normalize page text line by line: unify dashes and spaces, drop lines
/// shorter than three characters and blank rule lines.
pub fn normalize_page_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let unified: String = line
                .chars()
                .map(|c| match c {
                    '\u{2013}' | '\u{2014}' => '-',
                    '\u{00a0}' => ' ',
                    c => c,
                })
                .collect();
            HORIZONTAL_SPACE.replace_all(unified.trim(), " ").into_owned()
        })
        .filter(|line| line.chars().count() > 2 && !RULE_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Case-insensitive pattern for a plain phrase, word-bounded, any whitespace
/// between its words.
fn phrase_regex(phrase: &str) -> Result<Regex, regex::Error> {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+")))
}

// ── Fingerprint ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct FingerprintReport {
    pub passed: bool,
    pub header: Option<String>,
    pub conflicting_tag: Option<String>,
    pub keyword_hits: usize,
}

/// Quorum-based check that the text belongs to the expected form.
pub struct Fingerprint {
    headers: Vec<(String, Regex)>,
    conflicts: Vec<(String, Regex)>,
    keywords: Vec<Regex>,
    quorum: usize,
}

impl Fingerprint {
    pub fn new(config: &FingerprintConfig) -> Result<Self, regex::Error> {
        let compile = |items: &[String]| -> Result<Vec<(String, Regex)>, regex::Error> {
            items
                .iter()
                .map(|p| Ok((p.clone(), phrase_regex(p)?)))
                .collect()
        };
        Ok(Self {
            headers: compile(&config.header_phrases)?,
            conflicts: compile(&config.conflicting_tags)?,
            keywords: compile(&config.label_keywords)?
                .into_iter()
                .map(|(_, re)| re)
                .collect(),
            quorum: config.quorum,
        })
    }

    pub fn check(&self, text: &str) -> FingerprintReport {
        let flat = ANY_SPACE.replace_all(text, " ");
        let header = self
            .headers
            .iter()
            .find(|(_, re)| re.is_match(&flat))
            .map(|(p, _)| p.clone());
        let conflicting_tag = self
            .conflicts
            .iter()
            .find(|(_, re)| re.is_match(&flat))
            .map(|(p, _)| p.clone());
        let keyword_hits = self.keywords.iter().filter(|re| re.is_match(&flat)).count();

        FingerprintReport {
            passed: header.is_some() && conflicting_tag.is_none() && keyword_hits >= self.quorum,
            header,
            conflicting_tag,
            keyword_hits,
        }
    }
}

// ── Back-fill ────────────────────────────────────────────────────────────────

struct FamilyRow {
    attribute: &'static str,
    father: Regex,
    mother: Regex,
}

/// Compiled label patterns for back-filling blank fields from page text.
pub struct TextBackfill {
    labels: Vec<(&'static str, Regex)>,
    money: Vec<(&'static str, Regex, Regex)>,
    family: Vec<FamilyRow>,
    choices: Vec<(&'static str, bool, Vec<(&'static str, Regex, Regex)>)>,
    stop: Regex,
    provinces: Vec<(String, Regex)>,
    stopwords: Vec<String>,
    capture_len: usize,
}

impl TextBackfill {
    pub fn new(config: &ValidatorConfig) -> Result<Self, regex::Error> {
        let n = config.label_capture_len.max(1);
        let capture = |label: &str| {
            Regex::new(&format!(r"(?im)\b(?:{label})[ \t]*[:\-]?[ \t]*([^\n]{{1,{n}}})"))
        };

        let labels = LABELS
            .iter()
            .map(|&(key, label)| Ok((key, capture(label)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let window = config.label_window;
        let money = MONEY_LABELS
            .iter()
            .map(|&(key, label)| {
                let near = Regex::new(&format!(
                    r"(?i)\b(?:{label})[^\n]{{0,{window}}}?(?:₱|php|p)\.?[ \t]*(\d[\d,]*(?:\.\d{{1,2}})?)"
                ))?;
                Ok((key, near, capture(label)?))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let family = FAMILY_ROWS
            .iter()
            .map(|&(attribute, label)| {
                Ok(FamilyRow {
                    attribute,
                    father: Regex::new(&format!(
                        r"(?im)^[ \t]*(?:{label})[ \t]*:?[ \t]*father[ \t]*:?[ \t]*(.*?)[ \t]*(?:\bmother\b.*)?$"
                    ))?,
                    mother: Regex::new(&format!(
                        r"(?im)^[ \t]*(?:{label})[ \t]*:?[ \t]*(?:father\b.*?)?\bmother[ \t]*:?[ \t]*(.*)$"
                    ))?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let choices = CHOICE_GROUPS
            .iter()
            .map(|g| {
                let options = g
                    .options
                    .iter()
                    .map(|&(value, word)| {
                        Ok((
                            value,
                            Regex::new(&format!(r"(?i){MARK_PREFIX}\b(?:{word})\b"))?,
                            Regex::new(&format!(r"(?i)\b(?:{word})\b"))?,
                        ))
                    })
                    .collect::<Result<Vec<_>, regex::Error>>()?;
                Ok((g.key, g.loose, options))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let stop_words: Vec<&str> = LABELS
            .iter()
            .chain(MONEY_LABELS.iter())
            .map(|&(_, label)| label)
            .chain(EXTRA_STOPS.iter().copied())
            .collect();
        let stop = Regex::new(&format!(r"(?i)\b(?:{})\b", stop_words.join("|")))?;

        let provinces = config
            .province_keywords
            .iter()
            .map(|p| Ok((p.clone(), phrase_regex(p)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            labels,
            money,
            family,
            choices,
            stop,
            provinces,
            stopwords: config
                .boilerplate_stopwords
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            capture_len: n,
        })
    }

    /// Fill blank keys of `fields` from `text`.  Returns the keys written.
    pub fn backfill(&self, fields: &mut FieldMap, text: &str) -> Vec<String> {
        let mut filled = Vec::new();
        if text.trim().is_empty() {
            return filled;
        }
        let mut offer = |fields: &mut FieldMap, key: &str, value: &str, source: &str| {
            if fields.fill(key, value) {
                debug!(key, value, source, "back-filled from page text");
                filled.push(key.to_string());
            }
        };

        for (key, re) in &self.labels {
            if !fields.is_blank(key) {
                continue;
            }
            if let Some(v) = self.first_capture(re, text) {
                offer(fields, *key, &normalize_for_key(key, &v), "label");
            }
        }

        for (key, near, anchored) in &self.money {
            if !fields.is_blank(key) {
                continue;
            }
            let amount = near
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| normalize_money(m.as_str()))
                .filter(|v| !v.is_empty())
                .or_else(|| {
                    self.first_capture(anchored, text)
                        .map(|v| normalize_money(&v))
                });
            if let Some(v) = amount {
                offer(fields, *key, &v, "money");
            }
        }

        for row in &self.family {
            for (who, re) in [("father", &row.father), ("mother", &row.mother)] {
                let key = format!("{who}_{}", row.attribute);
                if !fields.is_blank(&key) {
                    continue;
                }
                let value = re
                    .captures_iter(text)
                    .filter_map(|c| c.get(1))
                    .find_map(|m| self.clean_capture(m.as_str()));
                if let Some(v) = value {
                    offer(fields, key.as_str(), &normalize_for_key(&key, &v), "family row");
                }
            }
        }

        if fields.is_blank("mobile") {
            if let Some(m) = MOBILE.find(text) {
                offer(fields, "mobile", m.as_str(), "keyword");
            }
        }
        if fields.is_blank("province") {
            if let Some((name, _)) = self.provinces.iter().find(|(_, re)| re.is_match(text)) {
                offer(fields, "province", name.as_str(), "keyword");
            }
        }

        for (key, loose, options) in &self.choices {
            if !fields.is_blank(key) {
                continue;
            }
            if let Some(value) = choose_option(text, *loose, options) {
                offer(fields, *key, value, "choice keyword");
            }
        }

        filled
    }

    /// First capture of `re` in `text` that survives cleaning.
    fn first_capture(&self, re: &Regex, text: &str) -> Option<String> {
        re.captures_iter(text)
            .filter_map(|c| c.get(1))
            .find_map(|m| self.clean_capture(m.as_str()))
    }

    /// Trim a raw capture at the next label or boilerplate phrase, then clean
    /// it like OCR output.  `None` when nothing meaningful is left.
    fn clean_capture(&self, raw: &str) -> Option<String> {
        let mut end = raw.len();
        if let Some(m) = self.stop.find(raw) {
            end = end.min(m.start());
        }
        let lower = raw.to_lowercase();
        for word in &self.stopwords {
            if let Some(pos) = lower.find(word.as_str()) {
                // Lowercasing can shift byte offsets for non-ASCII text.
                if raw.is_char_boundary(pos) {
                    end = end.min(pos);
                }
            }
        }
        let value = clean_ocr_text(&raw[..end], self.capture_len);
        (!is_blank(&value)).then_some(value)
    }
}

/// Pick a choice from text: a mark glyph right before an option word wins;
/// otherwise, for loose groups, the single option word present in the text.
fn choose_option<'a>(
    text: &str,
    loose: bool,
    options: &[(&'a str, Regex, Regex)],
) -> Option<&'a str> {
    let marked: Vec<&str> = options
        .iter()
        .filter(|(_, glyph, _)| glyph.is_match(text))
        .map(|(value, _, _)| *value)
        .collect();
    if marked.len() == 1 {
        return Some(marked[0]);
    }
    if !loose || !marked.is_empty() {
        return None;
    }

    // Claim spans longest option first so "stem" inside "non-stem" is not
    // counted twice.
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut present = Vec::new();
    for (value, _, word) in options {
        let mut seen = false;
        for m in word.find_iter(text) {
            let overlaps = claimed.iter().any(|&(s, e)| m.start() < e && s < m.end());
            if !overlaps {
                claimed.push((m.start(), m.end()));
                seen = true;
            }
        }
        if seen {
            present.push(*value);
        }
    }
    (present.len() == 1).then(|| present[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backfill() -> TextBackfill {
        TextBackfill::new(&ValidatorConfig::default()).unwrap()
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::new(&FingerprintConfig::default()).unwrap()
    }

    #[test]
    fn blank_predicate_covers_placeholders() {
        for v in ["", "  ", "N/A", "n/a", "NA", "None", "----", "____", "☐", "[ ]", "x", "."] {
            assert!(is_blank(v), "{v:?} should be blank");
        }
        for v in ["Filipino", "8600", "no", "Al"] {
            assert!(!is_blank(v), "{v:?} should not be blank");
        }
    }

    #[test]
    fn fingerprint_needs_header_and_quorum() {
        let blob = "FORM A - PERSONAL INFORMATION\nName of Applicant: Juan\nDate of Birth: 01/02/2006\n\
                    Email Address: juan@example.com\nCitizenship: Filipino";
        let report = fingerprint().check(blob);
        assert!(report.passed, "{report:?}");
        assert_eq!(report.keyword_hits, 4);

        let no_header = "Name of Applicant\nDate of Birth\nEmail Address\nCitizenship";
        assert!(!fingerprint().check(no_header).passed);

        let thin = "FORM A - PERSONAL INFORMATION\nName of Applicant: Juan\nCitizenship: Filipino";
        assert!(!fingerprint().check(thin).passed);
    }

    #[test]
    fn conflicting_form_tag_fails_even_with_header() {
        let blob = "FORM A - PERSONAL INFORMATION\nSee also FORM B\nName of Applicant: Juan\n\
                    Date of Birth: 01/02/2006\nEmail Address: juan@example.com\nCitizenship: Filipino";
        let report = fingerprint().check(blob);
        assert!(!report.passed);
        assert_eq!(report.conflicting_tag.as_deref(), Some("form b"));
    }

    #[test]
    fn header_phrase_is_word_bounded() {
        let report = fingerprint().check("a form and a personal statement");
        assert!(report.header.is_none());
    }

    #[test]
    fn label_capture_stops_at_next_label() {
        let text = "City/Municipality: Butuan City Province: Agusan del Norte Zip Code: 8600";
        let mut fields = FieldMap::new();
        let filled = backfill().backfill(&mut fields, text);

        assert_eq!(fields.get("city_municipality"), "Butuan City");
        assert_eq!(fields.get("province"), "Agusan del Norte");
        assert_eq!(fields.get("zipcode"), "8600");
        assert!(filled.contains(&"zipcode".to_string()));
    }

    #[test]
    fn boilerplate_and_placeholders_are_not_values() {
        let text = "Name of Applicant: (Surname, First Name, Middle Name)\nCitizenship: N/A\n\
                    Email Address: ________________";
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, text);
        assert_eq!(fields.get("name_of_applicant"), "");
        assert_eq!(fields.get("citizenship"), "");
        assert_eq!(fields.get("email"), "");
    }

    #[test]
    fn label_on_its_own_line_does_not_swallow_the_next_line() {
        let text = "Email Address:\nPermanent Address: 123 Rizal St.";
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, text);
        assert_eq!(fields.get("email"), "");
        assert_eq!(fields.get("permanent_address"), "123 Rizal St");
    }

    #[test]
    fn existing_values_are_kept() {
        let mut fields = FieldMap::new();
        fields.fill("province", "Surigao del Norte");
        backfill().backfill(&mut fields, "Province: Agusan del Norte");
        assert_eq!(fields.get("province"), "Surigao del Norte");
    }

    #[test]
    fn family_rows_split_father_and_mother() {
        let text = "OCCUPATION: FATHER: Farmer MOTHER: Teacher\n\
                    CIVIL STATUS: FATHER: Married MOTHER: Married\n\
                    INCOME: FATHER: ₱ 96,000.00 MOTHER: 120,000";
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, text);
        assert_eq!(fields.get("father_occupation"), "Farmer");
        assert_eq!(fields.get("mother_occupation"), "Teacher");
        assert_eq!(fields.get("father_civil_status"), "Married");
        assert_eq!(fields.get("father_income"), "96000.00");
        assert_eq!(fields.get("mother_income"), "120000");
    }

    #[test]
    fn money_prefers_currency_near_label() {
        let text = "TOTAL ANNUAL GROSS INCOME IN 2025: ₱ 250,000.50\n\
                    Annual Contribution (in pesos): 10,000";
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, text);
        assert_eq!(fields.get("total_annual_gross_income"), "250000.50");
        assert_eq!(fields.get("annual_contribution_any"), "10000");
    }

    #[test]
    fn label_ending_in_punctuation_consumes_it() {
        let text = "Annual Contribution (in pesos): ____\n\
                    Purpose: Tuition\n\
                    Annual Contribution (in pesos): 10,000\n\
                    Mobile Phone No.: 0917 123 4567";
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, text);
        assert_eq!(fields.get("annual_contribution_any"), "10000");
        assert_eq!(fields.get("mobile"), "0917 123 4567");
    }

    #[test]
    fn label_needs_a_whole_word() {
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, "Provinces: Caraga Region\nZipper: 8600");
        assert_eq!(fields.get("province"), "");
        assert_eq!(fields.get("zipcode"), "");
    }

    #[test]
    fn keyword_fallbacks_find_mobile_and_province() {
        let text = "Contact me at 09171234567\nResident of AGUSAN DEL NORTE";
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, text);
        assert_eq!(fields.get("mobile"), "09171234567");
        assert_eq!(fields.get("province"), "Agusan del Norte");
    }

    #[test]
    fn both_printed_options_infer_nothing() {
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, "Sex: Male Female\nStrand: STEM NON-STEM");
        assert_eq!(fields.get("sex"), "");
        assert_eq!(fields.get("strand"), "");
    }

    #[test]
    fn mark_glyph_picks_the_ticked_option() {
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, "Sex: ☐ Male ☑ Female\nStrand: [x] NON-STEM [ ] STEM\nRelatives support: ✓ Yes No");
        assert_eq!(fields.get("sex"), "female");
        assert_eq!(fields.get("strand"), "non-stem");
        assert_eq!(fields.get("relatives_support"), "yes");
    }

    #[test]
    fn lone_option_word_is_inferred_for_loose_groups_only() {
        let mut fields = FieldMap::new();
        backfill().backfill(&mut fields, "Track: non-stem\nAnswer: no");
        assert_eq!(fields.get("strand"), "non-stem");
        assert_eq!(fields.get("relatives_support"), "");
    }

    #[test]
    fn page_text_drops_noise_lines() {
        let raw = "PERSONAL  INFORMATION\n__\n-----\nab\nName of Applicant:\u{00a0}Juan";
        assert_eq!(normalize_page_text(raw), "PERSONAL INFORMATION\nName of Applicant: Juan");
    }
}
