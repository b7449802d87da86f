use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use formcheck_lib::debug::export_crops;
use formcheck_lib::template::BUILTIN_TEMPLATE;
use formcheck_lib::{
    Capabilities, DocumentInput, TemplateRegistry, TemplateSource, Validator, ValidatorConfig,
};

#[derive(Debug, Parser)]
#[command(name = "formcheck", version, about = "Completeness check for scanned Form A applications")]
struct Cli {
    /// Template JSON (defaults to the built-in Form A template).
    #[arg(long, global = true, env = "FORMCHECK_TEMPLATE")]
    template: Option<PathBuf>,

    /// Validator settings JSON.
    #[arg(long, global = true, env = "FORMCHECK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a PDF or photo and print the result as JSON.
    Validate {
        file: PathBuf,
        /// Include the raw extracted values.
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        pretty: bool,
    },
    /// Export the template regions of a document as PNG crops.
    Crops {
        file: PathBuf,
        /// Write PNG files here instead of printing a base64 manifest.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the built-in template.
    Template,
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Template => {
            print!("{BUILTIN_TEMPLATE}");
            Ok(())
        }
        Commands::Validate { file, debug, pretty } => {
            let validator = build_validator(&cli)?;
            let input = read_document(file)?;
            let result = validator
                .validate(&input, *debug)
                .with_context(|| format!("rejected {}", file.display()))?;
            let json = if *pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{json}");
            Ok(())
        }
        Commands::Crops { file, out } => {
            let validator = build_validator(&cli)?;
            let input = read_document(file)?;
            let image = validator
                .rasterize(&input)
                .with_context(|| format!("cannot render {}", file.display()))?;
            let template = validator.template()?;
            let crops = export_crops(&image, &template, validator.config())
                .context("encoding crops")?;

            match out {
                Some(dir) => {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("cannot create {}", dir.display()))?;
                    for crop in &crops {
                        let path = dir.join(crop.file_name());
                        fs::write(&path, &crop.png)
                            .with_context(|| format!("cannot write {}", path.display()))?;
                    }
                    info!(count = crops.len(), dir = %dir.display(), "crops written");
                }
                None => {
                    let manifest: Vec<_> = crops.iter().map(|c| c.preview()).collect();
                    println!("{}", serde_json::to_string(&manifest)?);
                }
            }
            Ok(())
        }
    }
}

fn build_validator(cli: &Cli) -> Result<Validator> {
    let config = match &cli.config {
        Some(path) => ValidatorConfig::load(path)?,
        None => ValidatorConfig::default(),
    };
    let source = match &cli.template {
        Some(path) => TemplateSource::File(path.clone()),
        None => TemplateSource::Builtin,
    };
    let caps = Capabilities::detect(&config);
    Ok(Validator::new(config, TemplateRegistry::new(source), caps)?)
}

fn read_document(path: &Path) -> Result<DocumentInput> {
    let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let name = path.file_name().and_then(|n| n.to_str());
    Ok(DocumentInput::sniff(name, bytes)?)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
