//! Source-to-source transpiler for NMODL-style mechanism descriptions.
//!
//! A validated model AST goes through a fixed sequence of rewriting passes
//! (renaming, inlining, kinetic scheme conversion, ODE solving, localization)
//! and is then printed as C, OpenMP, OpenACC, CUDA or ISPC kernels.
//!
//! ```
//! use modlgen::prelude::*;
//! use modlgen::ast::parser::parse_statements;
//!
//! let program = Program::new(vec![
//!     Block::Neuron(NeuronBlock {
//!         suffix: Name::new("leak"),
//!         range: vec![Name::new("g")],
//!         nonspecific_currents: vec![Name::new("i")],
//!         ..Default::default()
//!     }),
//!     Block::Parameter(vec![VarDecl::with_value("g", 0.001), VarDecl::with_value("e", -70.0)]),
//!     Block::Assigned(vec![VarDecl::scalar("i")]),
//!     Block::Breakpoint(parse_statements("i = g * (v - e)").unwrap()),
//! ]);
//!
//! let output = Pipeline::default().run(program, "leak").unwrap();
//! assert_eq!(output.files[0].file_name, "leak.c");
//! assert!(output.files[0].code.contains("inst->i[id] = inst->g[id] * (v - glob->e);"));
//! assert!(output.files[0].code.contains("current += inst->i[id];"));
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod pipeline;
pub mod symtab;
pub mod visitors;

pub use error::{CodegenError, ModlError};
pub use pipeline::{Pipeline, PipelineOutput};

pub mod prelude {
    pub use crate::ast::{
        Block, Expression, Name, NeuronBlock, Program, RoutineBlock, Statement, StatementBlock, UseIon,
        VarDecl,
    };
    pub use crate::codegen::{Backend, GeneratedFile};
    pub use crate::config::{CodegenConfig, FloatType, PipelineConfig};
    pub use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
    pub use crate::error::{CodegenError, ModlError};
    pub use crate::pipeline::{Pipeline, PipelineOutput};
    pub use crate::visitors::{Pass, PerfReport};
}
