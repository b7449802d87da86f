//! Section rules and completeness scoring.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::fallback::is_blank;
use crate::fields::FieldMap;

static FOUR_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());

/// Attributes of the family table, one rule per parent each.
pub const FAMILY_ATTRIBUTES: &[&str] = &[
    "name",
    "civil_status",
    "relationship",
    "contact",
    "education",
    "occupation",
    "class_of_worker",
    "employer_name",
    "employer_address",
    "income",
];

pub const VALID_MESSAGE: &str = "Form A looks valid. All required fields are present.";
pub const INCOMPLETE_MESSAGE: &str = "Some required fields are missing/unchecked.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Personal,
    Family,
    Financial,
}

#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    NonBlank,
    OneOf(&'static [&'static str]),
    FourDigits,
}

impl Predicate {
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Predicate::NonBlank => !is_blank(value),
            Predicate::OneOf(values) => {
                let v = value.trim();
                values.iter().any(|ok| ok.eq_ignore_ascii_case(v))
            }
            Predicate::FourDigits => FOUR_DIGITS.is_match(value.trim()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionRule {
    pub section: Section,
    pub key: String,
    pub label: String,
    pub predicate: Predicate,
}

impl SectionRule {
    fn new(section: Section, key: &str, label: &str, predicate: Predicate) -> Self {
        Self {
            section,
            key: key.to_string(),
            label: label.to_string(),
            predicate,
        }
    }
}

static RULES: Lazy<Vec<SectionRule>> = Lazy::new(|| {
    use Predicate::*;
    use Section::*;

    let mut rules = vec![
        SectionRule::new(Personal, "name_of_applicant", "Name of Applicant", NonBlank),
        SectionRule::new(Personal, "date_of_birth", "Date of Birth", NonBlank),
        SectionRule::new(Personal, "mobile", "Mobile Phone No.", NonBlank),
        SectionRule::new(Personal, "email", "Email Address", NonBlank),
        SectionRule::new(Personal, "permanent_address", "Permanent Address", NonBlank),
        SectionRule::new(Personal, "city_municipality", "City/Municipality", NonBlank),
        SectionRule::new(Personal, "province", "Province", NonBlank),
        SectionRule::new(Personal, "zipcode", "Zipcode", FourDigits),
        SectionRule::new(Personal, "citizenship", "Citizenship", NonBlank),
        SectionRule::new(Personal, "sex", "Sex (Male/Female)", OneOf(&["male", "female"])),
        SectionRule::new(
            Personal,
            "strand",
            "Senior High School Strand (STEM/NON-STEM)",
            OneOf(&["stem", "non-stem"]),
        ),
    ];

    for attr in FAMILY_ATTRIBUTES {
        let base = attr.replace('_', " ").to_uppercase();
        for who in ["father", "mother"] {
            rules.push(SectionRule {
                section: Family,
                key: format!("{who}_{attr}"),
                label: format!("{base}: {}:", who.to_uppercase()),
                predicate: NonBlank,
            });
        }
    }

    rules.extend([
        SectionRule::new(
            Financial,
            "relatives_support",
            "Relatives Support (Yes/No)",
            OneOf(&["yes", "no"]),
        ),
        SectionRule::new(Financial, "purpose_any", "Purpose of Financial Contribution", NonBlank),
        SectionRule::new(
            Financial,
            "relationship_any",
            "Relationship of Contributor to Applicant",
            NonBlank,
        ),
        SectionRule::new(Financial, "annual_contribution_any", "Annual Contribution (in pesos)", NonBlank),
        SectionRule::new(
            Financial,
            "total_annual_gross_income",
            "TOTAL ANNUAL GROSS INCOME IN 2025:",
            NonBlank,
        ),
    ]);
    rules
});

/// All tracked rules: personal, then family, then financial.
pub fn rules() -> &'static [SectionRule] {
    &RULES
}

/// Rule labels grouped by section.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SectionLists {
    pub personal: Vec<String>,
    pub family: Vec<String>,
    pub financial: Vec<String>,
}

impl SectionLists {
    fn push(&mut self, section: Section, label: &str) {
        let list = match section {
            Section::Personal => &mut self.personal,
            Section::Family => &mut self.family,
            Section::Financial => &mut self.financial,
        };
        list.push(label.to_string());
    }

    pub fn len(&self) -> usize {
        self.personal.len() + self.family.len() + self.financial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub complete: usize,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub valid: bool,
    pub missing: SectionLists,
    pub filled: SectionLists,
    pub stats: Stats,
}

impl Score {
    pub fn message(&self) -> &'static str {
        if self.valid {
            VALID_MESSAGE
        } else {
            INCOMPLETE_MESSAGE
        }
    }
}

/// Classify every tracked rule as filled or missing and compute the stats.
///
/// `complete` is forced to 0 when no tracked key holds a value at all, or
/// when at most `noise_ratio` of the rules are filled; the filled/missing
/// lists are reported as classified.
pub fn score(fields: &FieldMap, noise_ratio: f64) -> Score {
    let mut filled = SectionLists::default();
    let mut missing = SectionLists::default();

    for rule in rules() {
        if rule.predicate.accepts(fields.get(&rule.key)) {
            filled.push(rule.section, &rule.label);
        } else {
            missing.push(rule.section, &rule.label);
        }
    }

    let total = rules().len();
    let mut complete = filled.len();
    let any_value = rules().iter().any(|r| !fields.is_blank(&r.key));
    if !any_value || complete as f64 <= total as f64 * noise_ratio {
        complete = 0;
    }
    let percent = if total == 0 {
        0
    } else {
        (100.0 * complete as f64 / total as f64).round() as u32
    };

    Score {
        valid: total > 0 && complete == total,
        missing,
        filled,
        stats: Stats {
            total,
            complete,
            percent,
        },
    }
}
