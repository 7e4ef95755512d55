//! NMODL-style pretty printing of the AST
//!
//! Output is deterministic: the same tree always prints to the same text,
//! which is what golden-file comparisons of transformed models rely on.
//! Parentheses are only inserted where operator precedence requires them;
//! explicit [`Expression::Paren`] nodes are always kept.

use std::fmt::{self, Display, Formatter, Write};

use super::*;

const INDENT: &str = "    ";

/// Format a literal the way a model author would write it
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Precedence of an expression as seen by the printer (negative literals bind like unary minus)
fn printed_precedence(expr: &Expression) -> u8 {
    match expr {
        Expression::Number(v) if *v < 0.0 => 7,
        _ => expr.precedence(),
    }
}

/// Whether `child` needs parentheses as an operand of `op`
pub(crate) fn needs_parens(child: &Expression, op: BinaryOp, right: bool) -> bool {
    let child_prec = printed_precedence(child);
    let parent_prec = op.precedence();
    if child_prec < parent_prec {
        return true;
    }
    if child_prec == parent_prec {
        return match op {
            // right associative
            BinaryOp::Pow => !right,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or => false,
            _ => right,
        };
    }
    false
}

fn write_operand(f: &mut Formatter<'_>, child: &Expression, op: BinaryOp, right: bool) -> fmt::Result {
    if needs_parens(child, op, right) {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(v) => f.write_str(&format_number(*v)),
            Expression::Name(name) => f.write_str(&name.value),
            Expression::Indexed { name, index } => write!(f, "{}[{}]", name.value, index),
            Expression::PrimeName { name, order, index } => {
                f.write_str(&name.value)?;
                for _ in 0..*order {
                    f.write_char('\'')?;
                }
                if let Some(index) = index {
                    write!(f, "[{}]", index)?;
                }
                Ok(())
            }
            Expression::Unary { op, operand } => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                if printed_precedence(operand) < 7 {
                    write!(f, "{}({})", symbol, operand)
                } else {
                    write!(f, "{}{}", symbol, operand)
                }
            }
            Expression::Binary { lhs, op, rhs } => {
                write_operand(f, lhs, *op, false)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs, *op, true)
            }
            Expression::Paren(inner) => write!(f, "({})", inner),
            Expression::Call(call) => {
                write!(f, "{}(", call.name.value)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_char(')')
            }
        }
    }
}

impl Display for ReactVar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.coefficient != 1 {
            write!(f, "{}", self.coefficient)?;
        }
        f.write_str(&self.key())
    }
}

fn join<T: Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

fn join_names(names: &[Name], separator: &str) -> String {
    names
        .iter()
        .map(|n| n.value.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

impl Display for ReactionStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "~ {} {}", join(&self.lhs, " + "), self.op.symbol())?;
        match self.op {
            ReactionOp::Source => write!(f, " ({})", self.rate_forward),
            _ => {
                write!(f, " {} ({}", join(&self.rhs, " + "), self.rate_forward)?;
                if let Some(kb) = &self.rate_backward {
                    write!(f, ", {}", kb)?;
                }
                f.write_char(')')
            }
        }
    }
}

/// Write a statement at the given indentation depth
fn write_statement(out: &mut String, statement: &Statement, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    match statement {
        Statement::Expression(expr) => writeln!(out, "{}{}", pad, expr),
        Statement::LocalList(names) => writeln!(out, "{}LOCAL {}", pad, join_names(names, ", ")),
        Statement::Reaction(reaction) => writeln!(out, "{}{}", pad, reaction),
        Statement::Compartment(c) => {
            write!(out, "{}COMPARTMENT ", pad)?;
            if let Some(index) = &c.index_name {
                write!(out, "{}, ", index.value)?;
            }
            writeln!(out, "{} {{{}}}", c.volume, join_names(&c.species, " "))
        }
        Statement::Conserve(c) => {
            writeln!(out, "{}CONSERVE {} = {}", pad, join(&c.react, " + "), c.expr)
        }
        Statement::If(stmt) => {
            writeln!(out, "{}IF ({}) {{", pad, stmt.condition)?;
            write_statements(out, &stmt.then_block, depth + 1)?;
            if let Some(else_block) = &stmt.else_block {
                writeln!(out, "{}}} ELSE {{", pad)?;
                write_statements(out, else_block, depth + 1)?;
            }
            writeln!(out, "{}}}", pad)
        }
        Statement::Block(block) => {
            writeln!(out, "{}{{", pad)?;
            write_statements(out, block, depth + 1)?;
            writeln!(out, "{}}}", pad)
        }
        Statement::Solve(solve) => {
            write!(out, "{}SOLVE {}", pad, solve.block_name.value)?;
            if let Some(method) = &solve.method {
                write!(out, " METHOD {}", method.value)?;
            }
            out.write_char('\n')
        }
        Statement::Table(table) => {
            write!(out, "{}TABLE {}", pad, join_names(&table.names, ", "))?;
            if !table.depend.is_empty() {
                write!(out, " DEPEND {}", join_names(&table.depend, ", "))?;
            }
            writeln!(out, " FROM {} TO {} WITH {}", table.from, table.to, table.with)
        }
        Statement::Verbatim(text) => {
            writeln!(out, "VERBATIM\n{}\nENDVERBATIM", text.trim_matches('\n'))
        }
    }
}

fn write_statements(out: &mut String, block: &StatementBlock, depth: usize) -> fmt::Result {
    for statement in &block.statements {
        write_statement(out, statement, depth)?;
    }
    Ok(())
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_statement(&mut out, self, 0)?;
        f.write_str(out.trim_end_matches('\n'))
    }
}

impl Display for StatementBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::from("{\n");
        write_statements(&mut out, self, 1)?;
        out.push('}');
        f.write_str(&out)
    }
}

fn write_decls(f: &mut Formatter<'_>, keyword: &str, decls: &[VarDecl]) -> fmt::Result {
    writeln!(f, "{} {{", keyword)?;
    for decl in decls {
        write!(f, "{}{}", INDENT, decl.name.value)?;
        if decl.dimension > 0 {
            write!(f, "[{}]", decl.dimension)?;
        }
        if let Some(value) = decl.value {
            write!(f, " = {}", format_number(value))?;
        }
        if let Some(unit) = &decl.unit {
            write!(f, " ({})", unit)?;
        }
        f.write_char('\n')?;
    }
    f.write_char('}')
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Block::Neuron(neuron) => {
                f.write_str("NEURON {\n")?;
                let kind = if neuron.point_process {
                    "POINT_PROCESS"
                } else {
                    "SUFFIX"
                };
                writeln!(f, "{}{} {}", INDENT, kind, neuron.suffix.value)?;
                for ion in &neuron.ions {
                    write!(f, "{}USEION {}", INDENT, ion.ion.value)?;
                    if !ion.read.is_empty() {
                        write!(f, " READ {}", join_names(&ion.read, ", "))?;
                    }
                    if !ion.write.is_empty() {
                        write!(f, " WRITE {}", join_names(&ion.write, ", "))?;
                    }
                    if let Some(valence) = ion.valence {
                        write!(f, " VALENCE {}", format_number(valence))?;
                    }
                    f.write_char('\n')?;
                }
                if !neuron.nonspecific_currents.is_empty() {
                    writeln!(
                        f,
                        "{}NONSPECIFIC_CURRENT {}",
                        INDENT,
                        join_names(&neuron.nonspecific_currents, ", ")
                    )?;
                }
                if !neuron.range.is_empty() {
                    writeln!(f, "{}RANGE {}", INDENT, join_names(&neuron.range, ", "))?;
                }
                if !neuron.global.is_empty() {
                    writeln!(f, "{}GLOBAL {}", INDENT, join_names(&neuron.global, ", "))?;
                }
                f.write_char('}')
            }
            Block::Parameter(decls) => write_decls(f, "PARAMETER", decls),
            Block::State(decls) => write_decls(f, "STATE", decls),
            Block::Assigned(decls) => write_decls(f, "ASSIGNED", decls),
            Block::Initial(body) | Block::Breakpoint(body) => {
                write!(f, "{} {}", self.keyword(), body)
            }
            Block::Derivative(r) | Block::Kinetic(r) => {
                write!(f, "{} {} {}", self.keyword(), r.name.value, r.body)
            }
            Block::Procedure(r) | Block::Function(r) => write!(
                f,
                "{} {}({}) {}",
                self.keyword(),
                r.name.value,
                join_names(&r.parameters, ", "),
                r.body
            ),
            Block::Verbatim(text) => {
                write!(f, "VERBATIM\n{}\nENDVERBATIM", text.trim_matches('\n'))
            }
        }
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "{}", block)?;
        }
        f.write_char('\n')
    }
}
