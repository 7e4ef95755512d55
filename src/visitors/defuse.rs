//! Definition/use analysis of a single variable
//!
//! The state of a block is the state of the first statement that touches the
//! variable, except that a conditional definition keeps looking:
//!
//! | State | Meaning |
//! |-------|---------|
//! | `U` | read before any unconditional write |
//! | `D` | written before any read |
//! | `CD` | written on some paths only |
//! | `None` | not referenced |
//!
//! For an IF chain, a read in any branch gives `U`; `D` needs an ELSE and a
//! definition in every branch; anything else that writes gives `CD`.

use crate::ast::walk::{statement_exprs, walk_expr};
use crate::ast::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuState {
    None,
    U,
    D,
    CD,
}

/// Analysis options
#[derive(Debug, Clone, Copy, Default)]
pub struct DefUse {
    /// Treat VERBATIM text as opaque and ignore it
    pub ignore_verbatim: bool,
}

fn reads(expr: &Expression, variable: &str) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| {
        if e.base_name().map(|n| n.value == variable) == Some(true) {
            found = true;
        }
    });
    found
}

/// Whether `text` mentions `variable` as a whole identifier
pub fn mentions_identifier(text: &str, variable: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    text.match_indices(variable).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + variable.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

impl DefUse {
    pub fn new(ignore_verbatim: bool) -> Self {
        Self { ignore_verbatim }
    }

    /// State of `variable` across a statement list
    pub fn analyze_block(&self, block: &StatementBlock, variable: &str) -> DuState {
        let mut result = DuState::None;
        for statement in &block.statements {
            match self.analyze_statement(statement, variable) {
                DuState::U => return DuState::U,
                DuState::D => return DuState::D,
                DuState::CD => result = DuState::CD,
                DuState::None => {}
            }
            // a LOCAL with the same name hides the variable for the rest of the block
            if let Statement::LocalList(names) = statement {
                if names.iter().any(|n| n.value == variable) {
                    return result;
                }
            }
        }
        result
    }

    pub fn analyze_statement(&self, statement: &Statement, variable: &str) -> DuState {
        match statement {
            Statement::Expression(expr) => match expr.as_assignment() {
                Some((lhs, rhs)) => {
                    let index_read = match lhs {
                        Expression::Indexed { index, .. } => reads(index, variable),
                        Expression::PrimeName { index: Some(index), .. } => reads(index, variable),
                        _ => false,
                    };
                    if index_read || reads(rhs, variable) {
                        DuState::U
                    } else if lhs.base_name().map(|n| n.value == variable) == Some(true) {
                        DuState::D
                    } else {
                        DuState::None
                    }
                }
                None if reads(expr, variable) => DuState::U,
                None => DuState::None,
            },
            Statement::If(s) => {
                if reads(&s.condition, variable) {
                    return DuState::U;
                }
                let mut branches = vec![self.analyze_block(&s.then_block, variable)];
                if let Some(else_block) = &s.else_block {
                    branches.push(self.analyze_block(else_block, variable));
                }
                if branches.contains(&DuState::U) {
                    DuState::U
                } else if s.else_block.is_some() && branches.iter().all(|b| *b == DuState::D) {
                    DuState::D
                } else if branches.iter().any(|b| matches!(b, DuState::D | DuState::CD)) {
                    DuState::CD
                } else {
                    DuState::None
                }
            }
            Statement::Block(block) => self.analyze_block(block, variable),
            Statement::Verbatim(text) => {
                if !self.ignore_verbatim && mentions_identifier(text, variable) {
                    DuState::U
                } else {
                    DuState::None
                }
            }
            Statement::Table(t) => {
                let named = t.names.iter().chain(t.depend.iter()).any(|n| n.value == variable);
                if named || reads(&t.from, variable) || reads(&t.to, variable) {
                    DuState::U
                } else {
                    DuState::None
                }
            }
            Statement::Reaction(r) => {
                let species = r.lhs.iter().chain(r.rhs.iter()).any(|v| v.name.value == variable);
                if species || statement_exprs(statement).iter().any(|e| reads(e, variable)) {
                    DuState::U
                } else {
                    DuState::None
                }
            }
            Statement::Compartment(_) | Statement::Conserve(_) => {
                if statement_exprs(statement).iter().any(|e| reads(e, variable)) {
                    DuState::U
                } else {
                    DuState::None
                }
            }
            Statement::LocalList(_) | Statement::Solve(_) => DuState::None,
        }
    }
}
