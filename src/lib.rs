pub mod checkbox;
pub mod config;
pub mod debug;
pub mod fallback;
pub mod fields;
pub mod ocr;
pub mod pipeline;
pub mod raster;
pub mod region;
pub mod score;
pub mod template;

pub use config::ValidatorConfig;
pub use fields::FieldMap;
pub use pipeline::{Capabilities, InputError, Outcome, ValidationResult, Validator};
pub use raster::{DocumentInput, DocumentKind};
pub use template::{Template, TemplateRegistry, TemplateSource};
