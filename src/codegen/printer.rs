//! Text emission for the C-like targets
//!
//! [`CodePrinter`] keeps track of indentation; [`Translator`] turns AST
//! expressions and statements into C syntax, resolving every name to the
//! place its value lives in the generated kernels:
//!
//! | Storage | Printed as |
//! |---------|------------|
//! | block local, argument | `name` |
//! | instance | `inst->name[id]`, `inst->name[3*id + k]` for arrays |
//! | global, constant | `glob->name` |
//! | derivative `x'` | `D_x` |

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;

use crate::ast::printer::needs_parens;
use crate::ast::*;
use crate::config::FloatType;
use crate::error::CodegenError;
use crate::symtab::Storage;

use super::{Backend, CodegenInfo};

const INDENT: &str = "    ";

lazy_static! {
    /// Single-precision variants of the C math library
    static ref FLOAT_MATH: HashMap<&'static str, &'static str> = HashMap::from([
        ("exp", "expf"),
        ("log", "logf"),
        ("log10", "log10f"),
        ("sqrt", "sqrtf"),
        ("fabs", "fabsf"),
        ("floor", "floorf"),
        ("ceil", "ceilf"),
        ("sin", "sinf"),
        ("cos", "cosf"),
        ("tan", "tanf"),
        ("tanh", "tanhf"),
        ("pow", "powf"),
        ("fmin", "fminf"),
        ("fmax", "fmaxf"),
    ]);
}

/// Indentation-aware line buffer
#[derive(Debug, Default)]
pub struct CodePrinter {
    text: String,
    depth: usize,
}

impl CodePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        if !line.is_empty() {
            for _ in 0..self.depth {
                self.text.push_str(INDENT);
            }
            self.text.push_str(line);
        }
        self.text.push('\n');
    }

    /// Print a line without indentation (preprocessor directives, raw text)
    pub fn raw(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    pub fn blank(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with("\n\n") {
            self.text.push('\n');
        }
    }

    /// Print `line` and indent what follows
    pub fn open(&mut self, line: impl AsRef<str>) {
        self.line(line);
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Dedent and print `line`
    pub fn close(&mut self, line: impl AsRef<str>) {
        self.dedent();
        self.line(line);
    }

    pub fn finish(self) -> String {
        self.text
    }
}

/// Format a literal of the configured precision
pub fn literal(value: f64, float_type: FloatType) -> String {
    let mut text = if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{:?}", value)
    };
    if float_type == FloatType::Float {
        text.push('f');
    }
    text
}

/// AST to C translation for one kernel or helper
pub struct Translator<'a> {
    info: &'a CodegenInfo,
    backend: Backend,
    scopes: Vec<HashSet<String>>,
    /// Name of the FUNCTION being printed, assigned through `ret_<name>`
    function: Option<String>,
}

impl<'a> Translator<'a> {
    pub fn new(info: &'a CodegenInfo, backend: Backend) -> Self {
        Self {
            info,
            backend,
            scopes: vec![HashSet::new()],
            function: None,
        }
    }

    /// Treat `names` as plain C locals, e.g. helper arguments
    pub fn with_locals<'n>(mut self, names: impl IntoIterator<Item = &'n str>) -> Self {
        if let Some(scope) = self.scopes.last_mut() {
            scope.extend(names.into_iter().map(str::to_string));
        }
        self
    }

    pub fn in_function(mut self, name: &str) -> Self {
        self.function = Some(name.to_string());
        self
    }

    fn float(&self) -> &'static str {
        self.info.float_type.c_name()
    }

    pub fn literal(&self, value: f64) -> String {
        let mut text = literal(value, self.info.float_type);
        // ISPC reads unsuffixed constants as float
        if self.backend == Backend::Ispc && self.info.float_type == FloatType::Double {
            text.push('d');
        }
        text
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    /// Arguments every helper receives before its own parameters
    pub fn context_args() -> &'static str {
        "inst, glob, id, v"
    }

    pub fn name(&self, name: &str) -> String {
        if self.function.as_deref() == Some(name) && !self.is_local(name) {
            return format!("ret_{}", name);
        }
        if name == "v" || self.is_local(name) {
            return name.to_string();
        }
        match self.info.storage(name) {
            Some(Storage::Instance) => {
                let dimension = self.info.dimension(name);
                if dimension > 0 {
                    format!("inst->{}[{}*id]", name, dimension)
                } else {
                    format!("inst->{}[id]", name)
                }
            }
            Some(Storage::Global | Storage::Constant) => format!("glob->{}", name),
            _ => name.to_string(),
        }
    }

    /// Array subscripts are integers, literal indices print without a fraction
    fn index(&self, index: &Expression) -> Result<String, CodegenError> {
        match index.as_integer() {
            Some(i) => Ok(i.to_string()),
            None => Ok(format!("(int) ({})", self.expr(index)?)),
        }
    }

    fn indexed(&self, name: &str, index: &Expression) -> Result<String, CodegenError> {
        let index = self.index(index)?;
        if !self.is_local(name) && self.info.storage(name) == Some(Storage::Instance) {
            let dimension = self.info.dimension(name).max(1);
            return Ok(format!("inst->{}[{}*id + {}]", name, dimension, index));
        }
        if !self.is_local(name) && matches!(self.info.storage(name), Some(Storage::Global | Storage::Constant)) {
            return Ok(format!("glob->{}[{}]", name, index));
        }
        Ok(format!("{}[{}]", name, index))
    }

    fn operand(&self, child: &Expression, op: BinaryOp, right: bool) -> Result<String, CodegenError> {
        let text = self.expr(child)?;
        Ok(if needs_parens(child, op, right) {
            format!("({})", text)
        } else {
            text
        })
    }

    fn math_function<'n>(&self, name: &'n str) -> &'n str {
        if self.backend == Backend::Ispc {
            return match name {
                "fabs" => "abs",
                "fmin" => "min",
                "fmax" => "max",
                other => other,
            };
        }
        if self.info.float_type == FloatType::Float {
            if let Some(single) = FLOAT_MATH.get(name) {
                return *single;
            }
        }
        name
    }

    pub fn expr(&self, expr: &Expression) -> Result<String, CodegenError> {
        Ok(match expr {
            Expression::Number(v) => self.literal(*v),
            Expression::Name(name) => self.name(&name.value),
            Expression::Indexed { name, index } => self.indexed(&name.value, index)?,
            Expression::PrimeName { name, index, .. } => match index {
                Some(index) => format!("D_{}[{}]", name.value, self.index(index)?),
                None => format!("D_{}", name.value),
            },
            Expression::Unary { op, operand } => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                let text = self.expr(operand)?;
                if operand.precedence() < 7 || text.starts_with('-') {
                    format!("{}({})", symbol, text)
                } else {
                    format!("{}{}", symbol, text)
                }
            }
            Expression::Binary {
                lhs,
                op: BinaryOp::Pow,
                rhs,
            } => format!(
                "{}({}, {})",
                self.math_function("pow"),
                self.expr(lhs)?,
                self.expr(rhs)?
            ),
            Expression::Binary { lhs, op, rhs } => format!(
                "{} {} {}",
                self.operand(lhs, *op, false)?,
                op.symbol(),
                self.operand(rhs, *op, true)?
            ),
            Expression::Paren(inner) => format!("({})", self.expr(inner)?),
            Expression::Call(call) => {
                let mut args = Vec::with_capacity(call.args.len() + 4);
                let name = if self.info.helper(&call.name.value).is_some() {
                    args.push(Self::context_args().to_string());
                    format!("{}_{}", call.name.value, self.info.mech)
                } else {
                    self.math_function(&call.name.value).to_string()
                };
                for arg in &call.args {
                    args.push(self.expr(arg)?);
                }
                format!("{}({})", name, args.join(", "))
            }
        })
    }

    fn local_list(&mut self, names: &[Name], p: &mut CodePrinter) {
        if names.is_empty() {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.extend(names.iter().map(|n| n.value.clone()));
        }
        let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        p.line(format!("{} {};", self.float(), names.join(", ")));
    }

    /// `head` is `"} else "` when this `if` continues an else-if chain
    fn if_statement(&mut self, statement: &IfStatement, p: &mut CodePrinter, head: &str) -> Result<(), CodegenError> {
        p.open(format!("{}if ({}) {{", head, self.expr(&statement.condition)?));
        self.statements(&statement.then_block, p)?;
        match &statement.else_block {
            Some(else_block) => match else_block.statements.as_slice() {
                [Statement::If(nested)] => {
                    p.dedent();
                    self.if_statement(nested, p, "} else ")?;
                }
                _ => {
                    p.dedent();
                    p.open("} else {");
                    self.statements(else_block, p)?;
                    p.close("}");
                }
            },
            None => p.close("}"),
        }
        Ok(())
    }

    pub fn statement(&mut self, statement: &Statement, p: &mut CodePrinter) -> Result<(), CodegenError> {
        match statement {
            Statement::Expression(expr) => match expr.as_assignment() {
                Some((lhs, rhs)) => p.line(format!("{} = {};", self.expr(lhs)?, self.expr(rhs)?)),
                None => p.line(format!("{};", self.expr(expr)?)),
            },
            Statement::LocalList(names) => self.local_list(names, p),
            Statement::If(s) => self.if_statement(s, p, "")?,
            Statement::Block(block) => {
                p.open("{");
                self.statements(block, p)?;
                p.close("}");
            }
            Statement::Verbatim(text) => {
                for line in text.trim_matches('\n').lines() {
                    p.raw(line);
                }
            }
            Statement::Table(table) => {
                let names: Vec<&str> = table.names.iter().map(|n| n.as_str()).collect();
                p.line(format!("/* TABLE {} evaluated directly */", names.join(", ")));
            }
            Statement::Solve(_) => {}
            Statement::Reaction(_) | Statement::Compartment(_) | Statement::Conserve(_) => {
                return Err(CodegenError::unsupported(
                    self.backend.name(),
                    statement.to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Statements of `block` in a new C scope (braces are the caller's)
    pub fn statements(&mut self, block: &StatementBlock, p: &mut CodePrinter) -> Result<(), CodegenError> {
        self.scopes.push(HashSet::new());
        let result = block
            .statements
            .iter()
            .try_for_each(|s| self.statement(s, p));
        self.scopes.pop();
        result
    }

    /// Body of a DERIVATIVE block; ODEs that are still present become an
    /// explicit Euler step applied after the whole block ran.
    pub fn derivative(&mut self, block: &StatementBlock, p: &mut CodePrinter) -> Result<(), CodegenError> {
        let mut primes: Vec<(String, Option<Expression>)> = Vec::new();
        collect_primes(block, &mut primes);

        let mut declared = HashSet::new();
        for (name, _) in &primes {
            if !declared.insert(name.clone()) {
                continue;
            }
            let dimension = self.info.dimension(name);
            if dimension > 0 {
                p.line(format!("{} D_{}[{}] = {{0}};", self.float(), name, dimension));
            } else {
                p.line(format!("{} D_{} = {};", self.float(), name, self.literal(0.0)));
            }
        }

        p.open("{");
        self.statements(block, p)?;
        p.close("}");

        for (name, index) in &primes {
            let (state, derivative) = match index {
                Some(index) => (self.indexed(name, index)?, format!("D_{}[{}]", name, self.index(index)?)),
                None => (self.name(name), format!("D_{}", name)),
            };
            p.line(format!("{} = {} + {} * {};", state, state, self.name("dt"), derivative));
        }
        Ok(())
    }
}

fn collect_primes(block: &StatementBlock, out: &mut Vec<(String, Option<Expression>)>) {
    for statement in &block.statements {
        if let Some((lhs, _)) = statement.as_assignment() {
            if let Expression::PrimeName { name, index, .. } = lhs {
                let entry = (name.value.clone(), index.as_ref().map(|i| i.as_ref().clone()));
                if !out.contains(&entry) {
                    out.push(entry);
                }
            }
        }
        for nested in crate::ast::walk::nested_blocks(statement) {
            collect_primes(nested, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::{parse_expression, parse_statements};
    use crate::symtab;
    use crate::visitors::PerfVisitor;

    fn info(breakpoint: &str, float_type: FloatType) -> CodegenInfo {
        let mut program = Program::new(vec![
            Block::Neuron(NeuronBlock {
                suffix: Name::new("test"),
                range: vec![Name::new("g")],
                ..Default::default()
            }),
            Block::Parameter(vec![VarDecl::with_value("gbar", 0.1)]),
            Block::Assigned(vec![VarDecl::scalar("x"), VarDecl::scalar("g")]),
            Block::Breakpoint(parse_statements(breakpoint).unwrap()),
        ]);
        symtab::build(&mut program).unwrap();
        let mut perf = PerfVisitor::new();
        let report = perf.analyze(&program).unwrap();
        CodegenInfo::new(&program, report, float_type).unwrap()
    }

    fn translate(source: &str, float_type: FloatType) -> String {
        let info = info("g = x", float_type);
        let translator = Translator::new(&info, Backend::C);
        translator.expr(&parse_expression(source).unwrap()).unwrap()
    }

    #[test]
    fn test_names_resolve_to_storage() {
        assert_eq!(
            translate("gbar * x ^ 2", FloatType::Double),
            "glob->gbar * pow(inst->x[id], 2.0)"
        );
        assert_eq!(translate("v + dt", FloatType::Double), "v + glob->dt");
    }

    #[test]
    fn test_single_precision_math() {
        assert_eq!(translate("exp(x) * 0.5", FloatType::Float), "expf(inst->x[id]) * 0.5f");
    }

    #[test]
    fn test_negated_group_keeps_parens() {
        assert_eq!(translate("-(x + 1)", FloatType::Double), "-(inst->x[id] + 1.0)");
    }

    #[test]
    fn test_locals_stay_bare() {
        let info = info("g = x", FloatType::Double);
        let mut translator = Translator::new(&info, Backend::C);
        let mut p = CodePrinter::new();
        let block = parse_statements("LOCAL a\na = x\ng = a").unwrap();
        translator.statements(&block, &mut p).unwrap();
        assert_eq!(p.finish(), "double a;\na = inst->x[id];\ninst->g[id] = a;\n");
    }

    #[test]
    fn test_else_if_chain() {
        let info = info("g = x", FloatType::Double);
        let mut translator = Translator::new(&info, Backend::C);
        let mut p = CodePrinter::new();
        let block =
            parse_statements("IF (x > 0) { g = 1 } ELSE IF (x < 0) { g = 2 } ELSE { g = 3 }").unwrap();
        translator.statements(&block, &mut p).unwrap();
        let expected = "\
if (inst->x[id] > 0.0) {
    inst->g[id] = 1.0;
} else if (inst->x[id] < 0.0) {
    inst->g[id] = 2.0;
} else {
    inst->g[id] = 3.0;
}
";
        assert_eq!(p.finish(), expected);
    }

    #[test]
    fn test_reaction_is_unsupported() {
        let info = info("g = x", FloatType::Double);
        let mut translator = Translator::new(&info, Backend::Cuda);
        let mut p = CodePrinter::new();
        let block = parse_statements("~ A <-> B (1, 2)").unwrap();
        let err = translator.statements(&block, &mut p).unwrap_err();
        assert!(matches!(err, CodegenError::Unsupported { .. }));
    }

    #[test]
    fn test_array_state_euler_step() {
        let mut program = Program::new(vec![
            Block::Neuron(NeuronBlock {
                suffix: Name::new("cad"),
                ..Default::default()
            }),
            Block::State(vec![VarDecl::array("ca", 3)]),
            Block::Derivative(RoutineBlock::new(
                "diffuse",
                &[],
                parse_statements("ca'[1] = -ca[1]").unwrap(),
            )),
        ]);
        symtab::build(&mut program).unwrap();
        let mut perf = PerfVisitor::new();
        let report = perf.analyze(&program).unwrap();
        let info = CodegenInfo::new(&program, report, FloatType::Double).unwrap();

        let mut translator = Translator::new(&info, Backend::C);
        let mut p = CodePrinter::new();
        let body = &program.derivative_block("diffuse").unwrap().body;
        translator.derivative(body, &mut p).unwrap();
        let code = p.finish();
        assert!(code.starts_with("double D_ca[3] = {0};\n"));
        assert!(code.contains("    D_ca[1] = -inst->ca[3*id + 1];\n"));
        assert!(code.ends_with("inst->ca[3*id + 1] = inst->ca[3*id + 1] + glob->dt * D_ca[1];\n"));
    }
}
