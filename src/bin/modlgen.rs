// Command-line entry point for modlgen.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use modlgen::codegen::Backend;
use modlgen::config::{FloatType, PipelineConfig};
use modlgen::Pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model AST as JSON
    input: PathBuf,

    /// Pipeline configuration (JSON); command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target backends, may be repeated
    #[arg(short, long, value_enum)]
    backend: Vec<Backend>,

    /// Generate single-precision kernels
    #[arg(long)]
    single_precision: bool,

    /// Emit code even for backends that reject the model
    #[arg(long)]
    force: bool,

    #[arg(long)]
    no_inline: bool,

    #[arg(long)]
    no_localize: bool,

    /// Directory for the generated files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Log every pass at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if !self.backend.is_empty() {
            config.codegen.backends = self.backend.clone();
        }
        if self.single_precision {
            config.codegen.float_type = FloatType::Float;
        }
        config.codegen.force |= self.force;
        config.inline &= !self.no_inline;
        config.localize &= !self.no_localize;
        Ok(config)
    }
}

fn base_name(input: &Path) -> Result<String> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("no file name in {}", input.display()))?;
    // hh.mod.json -> hh
    Ok(stem.split('.').next().unwrap_or(stem).to_string())
}

fn write(path: PathBuf, contents: &str) -> Result<()> {
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.pipeline_config()?;
    let pipeline = Pipeline::new(config).context("invalid configuration")?;
    let base = base_name(&cli.input)?;

    let json = fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let output = pipeline
        .run_json(&json, &base)
        .with_context(|| format!("transforming {}", cli.input.display()))?;

    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating {}", cli.output_dir.display()))?;
    write(
        cli.output_dir.join(format!("{}.transformed.mod", base)),
        &output.program.to_string(),
    )?;
    if let Some(perf) = &output.perf {
        write(cli.output_dir.join(format!("{}.perf.json", base)), &perf.to_json()?)?;
    }
    for file in &output.files {
        write(cli.output_dir.join(&file.file_name), &file.code)?;
    }

    if output.files.is_empty() && !pipeline.config().codegen.backends.is_empty() {
        bail!("no backend accepted {}, use --force to emit anyway", cli.input.display());
    }
    Ok(())
}
