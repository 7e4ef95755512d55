//! Demote ASSIGNED variables to block locals
//!
//! A variable that every block writes before reading never carries a value
//! from one kernel invocation to the next, so it can live in a LOCAL of each
//! block that uses it instead of a per-instance array.

use crate::ast::walk::contains_name;
use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::error::ModlError;
use crate::symtab::{self, Property, SymbolKind};
use crate::visitors::defuse::{mentions_identifier, DefUse, DuState};
use crate::visitors::Pass;

#[derive(Debug, Default)]
pub struct LocalizeVisitor {
    /// Ignore VERBATIM text when looking for uses
    ignore_verbatim: bool,
    localized: Vec<String>,
}

impl LocalizeVisitor {
    pub fn new(ignore_verbatim: bool) -> Self {
        Self {
            ignore_verbatim,
            localized: Vec::new(),
        }
    }

    /// Variables localized by the last run, in declaration order
    pub fn localized(&self) -> &[String] {
        &self.localized
    }

    fn verbatim_mentions(&self, program: &Program, variable: &str) -> bool {
        if self.ignore_verbatim {
            return false;
        }
        program.blocks.iter().any(|b| match b {
            Block::Verbatim(text) => mentions_identifier(text, variable),
            _ => false,
        })
    }

    /// ASSIGNED variables that are not exposed outside the kernels
    fn candidates(&self, program: &Program) -> Result<Vec<String>, ModlError> {
        let table = symtab::require(program, self.name())?;
        let exposed = [
            Property::Range,
            Property::Global,
            Property::ReadIon,
            Property::WriteIon,
            Property::Current,
        ];
        let candidates = table
            .iter()
            .filter(|s| s.kind == SymbolKind::Assigned && !s.is_array())
            .filter(|s| !exposed.iter().any(|p| s.has(*p)))
            .map(|s| s.name.clone())
            .filter(|name| {
                !program
                    .blocks
                    .iter()
                    .filter(|b| b.is_callable())
                    .filter_map(|b| b.body())
                    .any(|body| contains_name(body, name))
            })
            .filter(|name| !self.verbatim_mentions(program, name))
            .collect();
        Ok(candidates)
    }
}

impl Pass for LocalizeVisitor {
    fn name(&self) -> &'static str {
        "Localize"
    }

    fn run(&mut self, mut program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError> {
        self.localized.clear();
        let analysis = DefUse::new(self.ignore_verbatim);

        for variable in self.candidates(&program)? {
            let states: Vec<DuState> = program
                .blocks
                .iter()
                .filter_map(|b| b.body())
                .map(|body| analysis.analyze_block(body, &variable))
                .collect();
            let used = states.iter().any(|s| *s != DuState::None);
            let safe = states.iter().all(|s| matches!(s, DuState::None | DuState::D));
            if !used || !safe {
                continue;
            }

            let mut labels = Vec::new();
            for block in program.blocks.iter_mut() {
                let label = block.label();
                if let Some(body) = block.body_mut() {
                    if analysis.analyze_block(body, &variable) == DuState::D {
                        body.add_local(variable.clone());
                        labels.push(label);
                    }
                }
            }
            diagnostics.info(
                self.name(),
                format!("'{}' localized in {}", variable, labels.join(", ")),
                None,
            );
            self.localized.push(variable);
        }
        Ok(program)
    }
}
