//! Pipeline driver
//!
//! Runs the passes in a fixed order, rebuilding the symbol tables after every
//! pass that rewrites the tree, then hands the final program to each
//! configured backend:
//!
//! ```text
//! symtab → LocalVarRename → Inline → KineticBlock → SolveBlock → Localize → Perf → codegen
//! ```
//!
//! Inline, SolveBlock and Localize can be switched off in [`PipelineConfig`].

use crate::ast::Program;
use crate::codegen::{self, CodegenInfo, GeneratedFile};
use crate::config::PipelineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{CodegenError, ModlError};
use crate::symtab;
use crate::visitors::{
    CommandSolver, InlineVisitor, KineticBlockVisitor, LocalVarRenameVisitor, LocalizeVisitor, Pass,
    PerfReport, PerfVisitor, SolveBlockVisitor,
};

const NAME: &str = "Pipeline";

/// Everything produced for one model
#[derive(Debug)]
pub struct PipelineOutput {
    /// The transformed program, symbol tables up to date
    pub program: Program,
    pub diagnostics: Diagnostics,
    /// Present when `perf_report` is enabled
    pub perf: Option<PerfReport>,
    pub files: Vec<GeneratedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ModlError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn passes(&self) -> Result<Vec<Box<dyn Pass>>, ModlError> {
        let mut passes: Vec<Box<dyn Pass>> = vec![Box::new(LocalVarRenameVisitor::new())];
        if self.config.inline {
            passes.push(Box::new(InlineVisitor::new()));
        }
        passes.push(Box::new(KineticBlockVisitor::new(
            self.config.kinetic.localize_rates,
        )));
        if self.config.solver.enabled {
            let solve = match &self.config.solver.command {
                Some(command) => SolveBlockVisitor::new(CommandSolver::new(command)?),
                None => SolveBlockVisitor::default(),
            };
            passes.push(Box::new(solve));
        }
        if self.config.localize {
            passes.push(Box::new(LocalizeVisitor::new(
                self.config.localize_verbatim,
            )));
        }
        Ok(passes)
    }

    /// Run the transformation passes only
    pub fn transform(&self, mut program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError> {
        symtab::build(&mut program)?;
        for mut pass in self.passes()? {
            tracing::debug!(pass = pass.name(), "running");
            program = pass.run(program, diagnostics)?;
            symtab::build(&mut program)?;
        }
        Ok(program)
    }

    /// Transform `program` and generate code for every configured backend.
    ///
    /// `base` is the model's base name, output files are `<base><suffix>`.
    /// A backend rejecting the model is skipped with a warning; the other
    /// backends still run.
    pub fn run(&self, program: Program, base: &str) -> Result<PipelineOutput, ModlError> {
        let mut diagnostics = Diagnostics::new();
        let program = self.transform(program, &mut diagnostics)?;

        let mut perf = PerfVisitor::new();
        let program = perf.run(program, &mut diagnostics)?;
        let report = perf.into_report();

        let codegen = &self.config.codegen;
        let info = CodegenInfo::new(&program, &report, codegen.float_type)?;
        let mut files = Vec::with_capacity(codegen.backends.len());
        for &backend in &codegen.backends {
            match codegen::generate(backend, &info, codegen, base, &mut diagnostics) {
                Ok(file) => files.push(file),
                Err(err @ CodegenError::Incompatible { .. }) => {
                    diagnostics.warn(NAME, format!("{}, skipped", err), None);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(PipelineOutput {
            program,
            diagnostics,
            perf: self.config.perf_report.then_some(report),
            files,
        })
    }

    /// [`run`](Self::run) on a JSON-serialized program
    pub fn run_json(&self, json: &str, base: &str) -> Result<PipelineOutput, ModlError> {
        self.run(Program::from_json(json)?, base)
    }
}
