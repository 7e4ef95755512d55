//! Error types for the transformation passes and code generation

use thiserror::Error;

use crate::ast::parser::ParseError;
use crate::ast::ModToken;

/// Errors raised while transforming or generating a model
#[derive(Debug, Error)]
pub enum ModlError {
    // ─────────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to read or parse the JSON AST
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to parse a statement snippet
    #[error("Failed to parse statement: {0}")]
    Parse(#[from] ParseError),

    /// File I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration file or option combination
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Pass Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A pass needing symbol information ran before the table was built
    #[error("{pass}: symbol table missing on {node}")]
    MissingSymbolTable { pass: String, node: String },

    /// A name the pass must resolve is not declared anywhere
    #[error("{pass}: unresolved name '{name}'{}", location(.token))]
    UnresolvedName {
        pass: String,
        name: String,
        token: Option<ModToken>,
    },

    /// A species got a second COMPARTMENT volume
    #[error("COMPARTMENT factor already defined for state variable '{variable}'")]
    DuplicateCompartment { variable: String },

    /// Structurally invalid model
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Symbolic solving failed for an ODE system
    #[error("Solver '{method}' failed: {message}")]
    Solver { method: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Code Generation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

fn location(token: &Option<ModToken>) -> String {
    match token {
        Some(token) => format!(" at {}", token),
        None => String::new(),
    }
}

impl ModlError {
    pub fn missing_symtab(pass: impl Into<String>, node: impl Into<String>) -> Self {
        Self::MissingSymbolTable {
            pass: pass.into(),
            node: node.into(),
        }
    }

    pub fn unresolved(pass: impl Into<String>, name: impl Into<String>, token: Option<ModToken>) -> Self {
        Self::UnresolvedName {
            pass: pass.into(),
            name: name.into(),
            token,
        }
    }

    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel(message.into())
    }

    pub fn solver(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Solver {
            method: method.into(),
            message: message.into(),
        }
    }
}

/// Errors specific to a code generation backend
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodegenError {
    /// The model uses constructs the backend cannot express
    #[error("{backend} backend cannot generate code for: {}", .constructs.join(", "))]
    Incompatible {
        backend: String,
        constructs: Vec<String>,
    },

    /// A construct survived the passes in a form no backend prints
    #[error("{backend} backend: unsupported {construct}")]
    Unsupported { backend: String, construct: String },
}

impl CodegenError {
    pub fn incompatible(backend: impl Into<String>, constructs: Vec<String>) -> Self {
        Self::Incompatible {
            backend: backend.into(),
            constructs,
        }
    }

    pub fn unsupported(backend: impl Into<String>, construct: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
            construct: construct.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_name_message() {
        let err = ModlError::unresolved("KineticBlock", "X", Some(ModToken::new(4, 7)));
        assert_eq!(err.to_string(), "KineticBlock: unresolved name 'X' at 4:7");
        let err = ModlError::unresolved("Inline", "f", None);
        assert_eq!(err.to_string(), "Inline: unresolved name 'f'");
    }

    #[test]
    fn test_incompatible_lists_constructs() {
        let err = CodegenError::incompatible("ISPC", vec!["VERBATIM".into(), "TABLE".into()]);
        assert_eq!(
            err.to_string(),
            "ISPC backend cannot generate code for: VERBATIM, TABLE"
        );
    }
}
