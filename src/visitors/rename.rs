//! Renaming a single identifier and minting fresh names

use std::collections::{HashMap, HashSet};

use crate::ast::walk::{nested_blocks_mut, walk_expr_mut};
use crate::ast::*;

/// Rename every variable reference `from` to `to` inside a subtree
///
/// Declarations (LOCAL lists, routine parameters), reaction species and
/// COMPARTMENT species follow the rename. Call names are left alone unless
/// [`RenameVisitor::with_calls`] is set.
#[derive(Debug, Clone)]
pub struct RenameVisitor {
    from: String,
    to: String,
    calls: bool,
}

impl RenameVisitor {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            calls: false,
        }
    }

    pub fn with_calls(mut self) -> Self {
        self.calls = true;
        self
    }

    fn rename_name(&self, name: &mut Name) {
        if name.value == self.from {
            name.value = self.to.clone();
        }
    }

    pub fn rename_expr(&self, expr: &mut Expression) {
        walk_expr_mut(expr, &mut |e| match e {
            Expression::Name(name)
            | Expression::Indexed { name, .. }
            | Expression::PrimeName { name, .. } => self.rename_name(name),
            Expression::Call(call) if self.calls => self.rename_name(&mut call.name),
            _ => {}
        });
    }

    fn rename_react_vars(&self, vars: &mut [ReactVar]) {
        for var in vars {
            self.rename_name(&mut var.name);
            if let Some(index) = var.index.as_deref_mut() {
                self.rename_expr(index);
            }
        }
    }

    pub fn rename_statement(&self, statement: &mut Statement) {
        match statement {
            Statement::Expression(e) => self.rename_expr(e),
            Statement::LocalList(names) => names.iter_mut().for_each(|n| self.rename_name(n)),
            Statement::Reaction(r) => {
                self.rename_react_vars(&mut r.lhs);
                self.rename_react_vars(&mut r.rhs);
                self.rename_expr(&mut r.rate_forward);
                if let Some(kb) = r.rate_backward.as_mut() {
                    self.rename_expr(kb);
                }
            }
            Statement::Compartment(c) => {
                self.rename_expr(&mut c.volume);
                c.species.iter_mut().for_each(|n| self.rename_name(n));
            }
            Statement::Conserve(c) => {
                self.rename_react_vars(&mut c.react);
                self.rename_expr(&mut c.expr);
            }
            Statement::If(s) => self.rename_expr(&mut s.condition),
            Statement::Table(t) => {
                t.names.iter_mut().for_each(|n| self.rename_name(n));
                t.depend.iter_mut().for_each(|n| self.rename_name(n));
                self.rename_expr(&mut t.from);
                self.rename_expr(&mut t.to);
            }
            Statement::Solve(_) | Statement::Block(_) | Statement::Verbatim(_) => {}
        }
        for nested in nested_blocks_mut(statement) {
            self.rename_block(nested);
        }
    }

    pub fn rename_block(&self, block: &mut StatementBlock) {
        for statement in block.statements.iter_mut() {
            self.rename_statement(statement);
        }
    }
}

/// Pass-local source of unique names
///
/// Counters are kept per stem, so `m_in` yields `m_in_0`, `m_in_1`, ... and a
/// candidate is skipped while it is already taken.
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    counters: HashMap<String, usize>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `<stem>_<n>` not contained in `taken`; the result is added to `taken`
    pub fn fresh(&mut self, stem: &str, taken: &mut HashSet<String>) -> String {
        let counter = self.counters.entry(stem.to_string()).or_insert(0);
        loop {
            let candidate = format!("{}_{}", stem, counter);
            *counter += 1;
            if taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

fn collect_block_names(block: &StatementBlock, names: &mut HashSet<String>) {
    crate::ast::walk::walk_block(block, &mut |e| {
        if let Some(name) = e.base_name() {
            names.insert(name.value.clone());
        }
        if let Expression::Call(call) = e {
            names.insert(call.name.value.clone());
        }
    });
    collect_declared(block, names);
}

fn collect_declared(block: &StatementBlock, names: &mut HashSet<String>) {
    for statement in &block.statements {
        match statement {
            Statement::LocalList(list) => names.extend(list.iter().map(|n| n.value.clone())),
            Statement::Reaction(r) => {
                names.extend(r.lhs.iter().chain(r.rhs.iter()).map(|v| v.name.value.clone()))
            }
            Statement::Compartment(c) => names.extend(c.species.iter().map(|n| n.value.clone())),
            _ => {
                for nested in crate::ast::walk::nested_blocks(statement) {
                    collect_declared(nested, names);
                }
            }
        }
    }
}

/// Every identifier used or declared anywhere in the program
pub fn all_names(program: &Program) -> HashSet<String> {
    let mut names: HashSet<String> = crate::symtab::BUILTINS.iter().map(|s| s.to_string()).collect();
    if let Some(table) = &program.symtab {
        names.extend(table.iter().map(|s| s.name.clone()));
    }
    for block in &program.blocks {
        match block {
            Block::Parameter(decls) | Block::State(decls) | Block::Assigned(decls) => {
                names.extend(decls.iter().map(|d| d.name.value.clone()))
            }
            Block::Neuron(neuron) => {
                names.extend(neuron.range.iter().chain(neuron.global.iter()).map(|n| n.value.clone()));
                for ion in &neuron.ions {
                    names.extend(ion.read.iter().chain(ion.write.iter()).map(|n| n.value.clone()));
                }
                names.extend(neuron.nonspecific_currents.iter().map(|n| n.value.clone()));
            }
            _ => {}
        }
        if let Some(routine) = block.routine() {
            names.insert(routine.name.value.clone());
            names.extend(routine.parameters.iter().map(|p| p.value.clone()));
        }
        if let Some(body) = block.body() {
            collect_block_names(body, &mut names);
        }
    }
    names
}
