//! Pipeline and code generation options
//!
//! Options are plain serde structs so they can be loaded from a JSON file;
//! every field has a default, so an empty object `{}` is a valid config.
//!
//! ```
//! use modlgen::config::{FloatType, PipelineConfig};
//!
//! let config = PipelineConfig::from_json(r#"{ "inline": false, "codegen": { "float_type": "float" } }"#).unwrap();
//! assert!(!config.inline);
//! assert!(config.localize);
//! assert_eq!(config.codegen.float_type, FloatType::Float);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codegen::Backend;
use crate::error::ModlError;

/// Floating-point type of the generated kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloatType {
    Float,
    #[default]
    Double,
}

impl FloatType {
    pub fn c_name(self) -> &'static str {
        match self {
            FloatType::Float => "float",
            FloatType::Double => "double",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KineticOptions {
    /// Evaluate every rate expression once into a `kf<n>_`/`kb<n>_` local
    pub localize_rates: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub enabled: bool,
    /// External symbolic service, e.g. `["python3", "solve.py"]`.
    /// The native solver is used when this is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    pub backends: Vec<Backend>,
    pub float_type: FloatType,
    /// Emit code even when the compatibility check fails
    pub force: bool,
    /// Use atomic updates instead of shadow arrays on parallel backends
    pub prefer_atomics: bool,
    /// Instances per shadow-array tile
    pub tile_size: usize,
    pub cuda_block_size: usize,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            backends: vec![Backend::C],
            float_type: FloatType::Double,
            force: false,
            prefer_atomics: false,
            tile_size: 128,
            cuda_block_size: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inline: bool,
    pub localize: bool,
    /// Ignore VERBATIM text when deciding whether a variable can be localized
    pub localize_verbatim: bool,
    pub kinetic: KineticOptions,
    pub solver: SolverOptions,
    pub perf_report: bool,
    pub codegen: CodegenConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inline: true,
            localize: true,
            localize_verbatim: false,
            kinetic: KineticOptions::default(),
            solver: SolverOptions::default(),
            perf_report: true,
            codegen: CodegenConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ModlError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ModlError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ModlError> {
        if self.codegen.tile_size == 0 {
            return Err(ModlError::Config("tile_size must be positive".into()));
        }
        if self.codegen.cuda_block_size == 0 {
            return Err(ModlError::Config("cuda_block_size must be positive".into()));
        }
        if let Some(command) = &self.solver.command {
            if command.is_empty() {
                return Err(ModlError::Config("solver command is empty".into()));
            }
        }
        Ok(())
    }
}
