//! Rename LOCAL variables that shadow names of an enclosing scope
//!
//! Once bodies are inlined, a LOCAL `tau` inside a PROCEDURE would silently
//! capture the RANGE `tau` of its caller. Every local whose name is visible
//! from an outer scope (program table, routine arguments, locals of an
//! enclosing block) is renamed to `<name>_r_<n>` in its own subtree.

use std::collections::HashSet;

use crate::ast::walk::nested_blocks_mut;
use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::error::ModlError;
use crate::symtab;
use crate::visitors::rename::{all_names, NameGenerator, RenameVisitor};
use crate::visitors::Pass;

#[derive(Debug, Default)]
pub struct LocalVarRenameVisitor {
    generator: NameGenerator,
    renamed: usize,
}

impl LocalVarRenameVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of locals renamed by the last run
    pub fn renamed(&self) -> usize {
        self.renamed
    }

    fn rename_in_block(
        &mut self,
        block: &mut StatementBlock,
        enclosing: &HashSet<String>,
        taken: &mut HashSet<String>,
        diagnostics: &mut Diagnostics,
    ) {
        let locals: Vec<Name> = block.local_names().into_iter().cloned().collect();
        let mut visible = enclosing.clone();
        for local in locals {
            let mut name = local.value.clone();
            if enclosing.contains(&name) {
                let new_name = self.generator.fresh(&format!("{}_r", name), taken);
                diagnostics.debug(
                    self.name(),
                    format!("local '{}' shadows an outer name, renamed to '{}'", name, new_name),
                    local.token,
                );
                RenameVisitor::new(&name, &new_name).rename_block(block);
                self.renamed += 1;
                name = new_name;
            }
            visible.insert(name);
        }
        for statement in block.statements.iter_mut() {
            for nested in nested_blocks_mut(statement) {
                self.rename_in_block(nested, &visible, taken, diagnostics);
            }
        }
    }
}

impl Pass for LocalVarRenameVisitor {
    fn name(&self) -> &'static str {
        "LocalVarRename"
    }

    fn run(&mut self, mut program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError> {
        let global: HashSet<String> = symtab::require(&program, self.name())?
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let mut taken = all_names(&program);
        self.renamed = 0;

        for block in program.blocks.iter_mut() {
            let mut enclosing = global.clone();
            if let Some(routine) = block.routine() {
                enclosing.extend(routine.parameters.iter().map(|p| p.value.clone()));
            }
            if let Some(body) = block.body_mut() {
                self.rename_in_block(body, &enclosing, &mut taken, diagnostics);
            }
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::parse_statements;

    fn program() -> Program {
        let mut program = Program::new(vec![
            Block::Assigned(vec![VarDecl::scalar("tau"), VarDecl::scalar("minf")]),
            Block::Procedure(RoutineBlock::new(
                "rates",
                &["v"],
                parse_statements("LOCAL tau, q\ntau = 2 * v\nminf = tau\nIF (q > 0) { LOCAL minf\nminf = q }")
                    .unwrap(),
            )),
        ]);
        symtab::build(&mut program).unwrap();
        program
    }

    #[test]
    fn test_shadowing_locals_are_renamed() {
        let mut pass = LocalVarRenameVisitor::new();
        let mut diagnostics = Diagnostics::new();
        let program = pass.run(program(), &mut diagnostics).unwrap();
        let body = program.callable("rates").and_then(|b| b.body()).unwrap();
        let text = body.to_string();

        assert!(text.contains("LOCAL tau_r_0, q"));
        assert!(text.contains("tau_r_0 = 2 * v"));
        assert!(text.contains("minf = tau_r_0"));
        assert!(text.contains("LOCAL minf_r_0"));
        assert!(text.contains("minf_r_0 = q"));
        assert_eq!(pass.renamed(), 2);
    }

    #[test]
    fn test_renaming_is_idempotent() {
        let mut diagnostics = Diagnostics::new();
        let once = LocalVarRenameVisitor::new()
            .run(program(), &mut diagnostics)
            .unwrap();
        let mut once_rebuilt = once.clone();
        symtab::build(&mut once_rebuilt).unwrap();

        let mut second = LocalVarRenameVisitor::new();
        let twice = second.run(once_rebuilt, &mut diagnostics).unwrap();
        assert_eq!(second.renamed(), 0);
        assert_eq!(twice.to_string(), once.to_string());
    }

    #[test]
    fn test_missing_symbol_table_is_fatal() {
        let mut diagnostics = Diagnostics::new();
        let program = Program::new(vec![]);
        let result = LocalVarRenameVisitor::new().run(program, &mut diagnostics);
        assert!(matches!(result, Err(ModlError::MissingSymbolTable { .. })));
    }
}
