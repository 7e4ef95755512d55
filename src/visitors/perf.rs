//! Operation counts and memory access classification per block
//!
//! Every name reference is resolved through the scope chain and counted as a
//! read or a write of a local, instance (including shared globals) or
//! constant variable. Declarations (LOCAL lists, TABLE and SOLVE headers,
//! VERBATIM text) cost nothing at run time and are skipped.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::ast::walk::statement_exprs;
use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::error::ModlError;
use crate::symtab::{self, ScopeStack, Storage, SymbolKind};
use crate::visitors::Pass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerfStat {
    pub n_add: usize,
    pub n_sub: usize,
    pub n_mul: usize,
    pub n_div: usize,
    pub n_pow: usize,
    pub n_neg: usize,
    pub n_compare: usize,
    pub n_logical: usize,
    pub n_if: usize,
    pub n_elif: usize,
    /// Calls to builtins and library functions
    pub n_ext_func_call: usize,
    /// Calls to FUNCTION/PROCEDURE blocks of the model
    pub n_int_func_call: usize,

    pub n_local_read: usize,
    pub n_local_write: usize,
    pub n_instance_read: usize,
    pub n_instance_write: usize,
    pub n_constant_read: usize,
    pub n_constant_write: usize,

    pub n_unique_local_read: usize,
    pub n_unique_local_write: usize,
    pub n_unique_instance_read: usize,
    pub n_unique_instance_write: usize,
    pub n_unique_constant_read: usize,
    pub n_unique_constant_write: usize,
}

impl Add for PerfStat {
    type Output = PerfStat;

    fn add(mut self, rhs: PerfStat) -> PerfStat {
        self += rhs;
        self
    }
}

impl AddAssign for PerfStat {
    fn add_assign(&mut self, rhs: PerfStat) {
        self.n_add += rhs.n_add;
        self.n_sub += rhs.n_sub;
        self.n_mul += rhs.n_mul;
        self.n_div += rhs.n_div;
        self.n_pow += rhs.n_pow;
        self.n_neg += rhs.n_neg;
        self.n_compare += rhs.n_compare;
        self.n_logical += rhs.n_logical;
        self.n_if += rhs.n_if;
        self.n_elif += rhs.n_elif;
        self.n_ext_func_call += rhs.n_ext_func_call;
        self.n_int_func_call += rhs.n_int_func_call;
        self.n_local_read += rhs.n_local_read;
        self.n_local_write += rhs.n_local_write;
        self.n_instance_read += rhs.n_instance_read;
        self.n_instance_write += rhs.n_instance_write;
        self.n_constant_read += rhs.n_constant_read;
        self.n_constant_write += rhs.n_constant_write;
        self.n_unique_local_read += rhs.n_unique_local_read;
        self.n_unique_local_write += rhs.n_unique_local_write;
        self.n_unique_instance_read += rhs.n_unique_instance_read;
        self.n_unique_instance_write += rhs.n_unique_instance_write;
        self.n_unique_constant_read += rhs.n_unique_constant_read;
        self.n_unique_constant_write += rhs.n_unique_constant_write;
    }
}

impl PerfStat {
    /// Total number of variable accesses
    pub fn accesses(&self) -> usize {
        self.n_local_read
            + self.n_local_write
            + self.n_instance_read
            + self.n_instance_write
            + self.n_constant_read
            + self.n_constant_write
    }
}

/// Per-block statistics plus the whole-program total
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerfReport {
    pub blocks: BTreeMap<String, PerfStat>,
    pub total: PerfStat,
    /// Instance variables read anywhere
    #[serde(skip)]
    pub instance_reads: BTreeSet<String>,
    /// Instance variables written anywhere
    #[serde(skip)]
    pub instance_writes: BTreeSet<String>,
}

impl PerfReport {
    /// Whether any kernel writes the instance variable `name`
    pub fn is_written(&self, name: &str) -> bool {
        self.instance_writes.contains(name)
    }

    pub fn to_json(&self) -> Result<String, ModlError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Class {
    Local,
    Instance,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Access {
    Read,
    Write,
}

/// Counting state of the block being visited
struct BlockCounter<'a> {
    scopes: ScopeStack,
    stat: PerfStat,
    unique: HashSet<(Class, Access, String)>,
    report: &'a mut PerfReport,
    program: &'a Program,
}

impl BlockCounter<'_> {
    fn record(&mut self, name: &Name, access: Access) -> Result<(), ModlError> {
        let symbol = self
            .scopes
            .lookup(&name.value)
            .ok_or_else(|| ModlError::unresolved(PerfVisitor::NAME, &name.value, name.token))?;
        let class = match symbol.storage {
            Some(Storage::Local) => Class::Local,
            Some(Storage::Constant) => Class::Constant,
            _ => Class::Instance,
        };
        if class == Class::Instance && symbol.storage == Some(Storage::Instance) {
            let set = match access {
                Access::Read => &mut self.report.instance_reads,
                Access::Write => &mut self.report.instance_writes,
            };
            set.insert(name.value.clone());
        }
        let counter = match (class, access) {
            (Class::Local, Access::Read) => &mut self.stat.n_local_read,
            (Class::Local, Access::Write) => &mut self.stat.n_local_write,
            (Class::Instance, Access::Read) => &mut self.stat.n_instance_read,
            (Class::Instance, Access::Write) => &mut self.stat.n_instance_write,
            (Class::Constant, Access::Read) => &mut self.stat.n_constant_read,
            (Class::Constant, Access::Write) => &mut self.stat.n_constant_write,
        };
        *counter += 1;
        self.unique.insert((class, access, name.value.clone()));
        Ok(())
    }

    fn is_internal(&self, function: &str) -> bool {
        match self.scopes.lookup(function) {
            Some(symbol) => matches!(symbol.kind, SymbolKind::Function | SymbolKind::Procedure),
            None => self.program.callable(function).is_some(),
        }
    }

    fn expression(&mut self, expr: &Expression) -> Result<(), ModlError> {
        match expr {
            Expression::Number(_) => {}
            Expression::Name(name) => self.record(name, Access::Read)?,
            Expression::Indexed { name, index } => {
                self.record(name, Access::Read)?;
                self.expression(index)?;
            }
            Expression::PrimeName { name, index, .. } => {
                self.record(name, Access::Read)?;
                if let Some(index) = index {
                    self.expression(index)?;
                }
            }
            Expression::Unary { op, operand } => {
                match op {
                    UnaryOp::Neg => self.stat.n_neg += 1,
                    UnaryOp::Not => self.stat.n_logical += 1,
                }
                self.expression(operand)?;
            }
            Expression::Binary {
                lhs,
                op: BinaryOp::Assign,
                rhs,
            } => self.assignment(lhs, rhs)?,
            Expression::Binary { lhs, op, rhs } => {
                match op {
                    BinaryOp::Add => self.stat.n_add += 1,
                    BinaryOp::Sub => self.stat.n_sub += 1,
                    BinaryOp::Mul => self.stat.n_mul += 1,
                    BinaryOp::Div => self.stat.n_div += 1,
                    BinaryOp::Pow => self.stat.n_pow += 1,
                    BinaryOp::And | BinaryOp::Or => self.stat.n_logical += 1,
                    _ => self.stat.n_compare += 1,
                }
                self.expression(lhs)?;
                self.expression(rhs)?;
            }
            Expression::Paren(inner) => self.expression(inner)?,
            Expression::Call(call) => {
                if self.is_internal(&call.name.value) {
                    self.stat.n_int_func_call += 1;
                } else {
                    self.stat.n_ext_func_call += 1;
                }
                for arg in &call.args {
                    self.expression(arg)?;
                }
            }
        }
        Ok(())
    }

    /// Right-hand side first, matching evaluation order
    fn assignment(&mut self, lhs: &Expression, rhs: &Expression) -> Result<(), ModlError> {
        self.expression(rhs)?;
        match lhs {
            Expression::Name(name) | Expression::PrimeName { name, index: None, .. } => {
                self.record(name, Access::Write)
            }
            Expression::Indexed { name, index }
            | Expression::PrimeName {
                name,
                index: Some(index),
                ..
            } => {
                self.expression(index)?;
                self.record(name, Access::Write)
            }
            other => self.expression(other),
        }
    }

    fn if_statement(&mut self, statement: &IfStatement, is_elif: bool) -> Result<(), ModlError> {
        if is_elif {
            self.stat.n_elif += 1;
        } else {
            self.stat.n_if += 1;
        }
        self.expression(&statement.condition)?;
        self.block(&statement.then_block, "IF")?;
        if let Some(else_block) = &statement.else_block {
            match else_block.statements.as_slice() {
                [Statement::If(nested)] => self.if_statement(nested, true)?,
                _ => self.block(else_block, "ELSE")?,
            }
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), ModlError> {
        match statement {
            Statement::Expression(expr) => self.expression(expr),
            Statement::If(s) => self.if_statement(s, false),
            Statement::Block(block) => self.block(block, "block"),
            Statement::Reaction(_) | Statement::Compartment(_) | Statement::Conserve(_) => {
                for expr in statement_exprs(statement) {
                    self.expression(expr)?;
                }
                Ok(())
            }
            Statement::LocalList(_) | Statement::Solve(_) | Statement::Table(_) | Statement::Verbatim(_) => Ok(()),
        }
    }

    fn block(&mut self, block: &StatementBlock, label: &str) -> Result<(), ModlError> {
        let table = block
            .symtab
            .clone()
            .ok_or_else(|| ModlError::missing_symtab(PerfVisitor::NAME, label))?;
        self.scopes.push(table);
        for statement in &block.statements {
            self.statement(statement)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn finish(mut self) -> PerfStat {
        for (class, access, _) in &self.unique {
            let counter = match (class, access) {
                (Class::Local, Access::Read) => &mut self.stat.n_unique_local_read,
                (Class::Local, Access::Write) => &mut self.stat.n_unique_local_write,
                (Class::Instance, Access::Read) => &mut self.stat.n_unique_instance_read,
                (Class::Instance, Access::Write) => &mut self.stat.n_unique_instance_write,
                (Class::Constant, Access::Read) => &mut self.stat.n_unique_constant_read,
                (Class::Constant, Access::Write) => &mut self.stat.n_unique_constant_write,
            };
            *counter += 1;
        }
        self.stat
    }
}

/// Read-only pass producing a [`PerfReport`]
#[derive(Debug, Default)]
pub struct PerfVisitor {
    report: PerfReport,
}

impl PerfVisitor {
    const NAME: &'static str = "Perf";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> &PerfReport {
        &self.report
    }

    pub fn into_report(self) -> PerfReport {
        self.report
    }

    /// Compute the report without consuming the program
    pub fn analyze(&mut self, program: &Program) -> Result<&PerfReport, ModlError> {
        let global = symtab::require(program, Self::NAME)?.clone();
        self.report = PerfReport::default();

        for block in &program.blocks {
            let Some(body) = block.body() else {
                continue;
            };
            let label = block.label();
            // arguments are declared in the body table
            let mut counter = BlockCounter {
                scopes: ScopeStack::new(global.clone()),
                stat: PerfStat::default(),
                unique: HashSet::new(),
                report: &mut self.report,
                program,
            };
            counter.block(body, &label)?;
            let stat = counter.finish();
            self.report.total += stat;
            self.report.blocks.insert(label, stat);
        }
        Ok(&self.report)
    }
}

impl Pass for PerfVisitor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError> {
        self.analyze(&program)?;
        diagnostics.debug(
            self.name(),
            format!(
                "{} blocks, {} variable accesses",
                self.report.blocks.len(),
                self.report.total.accesses()
            ),
            None,
        );
        Ok(program)
    }
}
