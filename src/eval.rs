//! Reference interpreter for statement blocks
//!
//! Executes the NMODL subset the passes produce (assignments, LOCAL scopes,
//! IF chains and calls) on plain `f64` values. It exists to check that a
//! rewrite keeps the numbers a block computes, e.g. that an inlined
//! BREAKPOINT assigns the same currents as the original one.
//!
//! ```
//! use modlgen::ast::parser::parse_statements;
//! use modlgen::eval::{Env, Interpreter};
//!
//! let block = parse_statements("LOCAL a\na = 2\nb = a ^ 3 + exp(0)").unwrap();
//! let mut env = Env::new();
//! Interpreter::default().exec_block(&block, &mut env).unwrap();
//! assert_eq!(env.get("b"), Some(9.0));
//! assert_eq!(env.get("a"), None);
//! ```

use std::collections::HashMap;

use crate::ast::*;
use crate::error::ModlError;

const NAME: &str = "Eval";
const MAX_CALL_DEPTH: usize = 64;

/// Evaluate a builtin math function
pub fn eval_call(name: &str, args: &[f64]) -> Option<f64> {
    let arg = |i: usize| args.get(i).copied().unwrap_or(0.0);
    let value = match (name, args.len()) {
        ("exp", 1) => arg(0).exp(),
        ("log", 1) => arg(0).ln(),
        ("log10", 1) => arg(0).log10(),
        ("sqrt", 1) => arg(0).sqrt(),
        ("fabs", 1) => arg(0).abs(),
        ("floor", 1) => arg(0).floor(),
        ("ceil", 1) => arg(0).ceil(),
        ("sin", 1) => arg(0).sin(),
        ("cos", 1) => arg(0).cos(),
        ("tan", 1) => arg(0).tan(),
        ("tanh", 1) => arg(0).tanh(),
        ("pow", 2) => arg(0).powf(arg(1)),
        ("fmin", 2) => arg(0).min(arg(1)),
        ("fmax", 2) => arg(0).max(arg(1)),
        _ => return None,
    };
    Some(value)
}

/// Whether `name` is a builtin [`eval_call`] understands
pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "exp" | "log" | "log10" | "sqrt" | "fabs" | "floor" | "ceil" | "sin" | "cos" | "tan" | "tanh" | "pow" | "fmin" | "fmax"
    )
}

/// Variable bindings, innermost scope last
///
/// Assigning a name that no scope declares creates it in the outermost
/// scope, the way an undeclared model variable behaves.
#[derive(Debug, Clone)]
pub struct Env {
    scopes: Vec<HashMap<String, f64>>,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        let mut env = Self::new();
        for (name, value) in values {
            env.set(name, value);
        }
        env
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    pub fn set(&mut self, name: &str, value: f64) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return;
            }
        }
        if let Some(global) = self.scopes.first_mut() {
            global.insert(name.to_string(), value);
        }
    }

    fn declare(&mut self, name: &str, value: f64) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Statement interpreter, optionally resolving calls against a program
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter<'a> {
    program: Option<&'a Program>,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program: Some(program),
        }
    }

    /// Execute `block` in a fresh scope of `env`
    pub fn exec_block(&self, block: &StatementBlock, env: &mut Env) -> Result<(), ModlError> {
        self.exec_scoped(block, env, 0)
    }

    pub fn eval(&self, expr: &Expression, env: &mut Env) -> Result<f64, ModlError> {
        self.eval_at(expr, env, 0)
    }

    fn exec_scoped(&self, block: &StatementBlock, env: &mut Env, depth: usize) -> Result<(), ModlError> {
        env.push();
        let result = block
            .statements
            .iter()
            .try_for_each(|s| self.exec_statement(s, env, depth));
        env.pop();
        result
    }

    fn exec_statement(&self, statement: &Statement, env: &mut Env, depth: usize) -> Result<(), ModlError> {
        match statement {
            Statement::Expression(expr) => self.eval_at(expr, env, depth).map(|_| ()),
            Statement::LocalList(names) => {
                for name in names {
                    env.declare(&name.value, 0.0);
                }
                Ok(())
            }
            Statement::If(s) => {
                if self.eval_at(&s.condition, env, depth)? != 0.0 {
                    self.exec_scoped(&s.then_block, env, depth)
                } else if let Some(else_block) = &s.else_block {
                    self.exec_scoped(else_block, env, depth)
                } else {
                    Ok(())
                }
            }
            Statement::Block(block) => self.exec_scoped(block, env, depth),
            Statement::Solve(_) | Statement::Table(_) => Ok(()),
            other => Err(ModlError::invalid_model(format!(
                "cannot evaluate '{}'",
                other.to_string().lines().next().unwrap_or_default()
            ))),
        }
    }

    /// Storage key of an assignable expression: `x`, `ca[1]`, `m'`
    fn target_key(&self, target: &Expression, env: &mut Env, depth: usize) -> Result<String, ModlError> {
        match target {
            Expression::Name(name) => Ok(name.value.clone()),
            Expression::Indexed { name, index } => {
                let index = self.eval_at(index, env, depth)?;
                Ok(format!("{}[{}]", name.value, index as i64))
            }
            Expression::PrimeName { name, order, index } => {
                let primes = "'".repeat(*order as usize);
                match index {
                    Some(index) => {
                        let index = self.eval_at(index, env, depth)?;
                        Ok(format!("{}{}[{}]", name.value, primes, index as i64))
                    }
                    None => Ok(format!("{}{}", name.value, primes)),
                }
            }
            other => Err(ModlError::invalid_model(format!("cannot assign to '{}'", other))),
        }
    }

    fn lookup(&self, key: &str, name: &Name, env: &Env) -> Result<f64, ModlError> {
        env.get(key)
            .ok_or_else(|| ModlError::unresolved(NAME, key, name.token))
    }

    fn eval_at(&self, expr: &Expression, env: &mut Env, depth: usize) -> Result<f64, ModlError> {
        match expr {
            Expression::Number(v) => Ok(*v),
            Expression::Name(name) => self.lookup(&name.value, name, env),
            Expression::Indexed { name, .. } | Expression::PrimeName { name, .. } => {
                let key = self.target_key(expr, env, depth)?;
                self.lookup(&key, name, env)
            }
            Expression::Unary { op, operand } => {
                let value = self.eval_at(operand, env, depth)?;
                Ok(match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Not => truth(value == 0.0),
                })
            }
            Expression::Binary {
                lhs,
                op: BinaryOp::Assign,
                rhs,
            } => {
                let value = self.eval_at(rhs, env, depth)?;
                let key = self.target_key(lhs, env, depth)?;
                env.set(&key, value);
                Ok(value)
            }
            Expression::Binary { lhs, op, rhs } => {
                let l = self.eval_at(lhs, env, depth)?;
                let r = self.eval_at(rhs, env, depth)?;
                Ok(match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Pow => l.powf(r),
                    BinaryOp::Lt => truth(l < r),
                    BinaryOp::Gt => truth(l > r),
                    BinaryOp::Le => truth(l <= r),
                    BinaryOp::Ge => truth(l >= r),
                    BinaryOp::Eq => truth(l == r),
                    BinaryOp::Ne => truth(l != r),
                    BinaryOp::And => truth(l != 0.0 && r != 0.0),
                    BinaryOp::Or => truth(l != 0.0 || r != 0.0),
                    BinaryOp::Assign => r,
                })
            }
            Expression::Paren(inner) => self.eval_at(inner, env, depth),
            Expression::Call(call) => self.call(call, env, depth),
        }
    }

    fn call(&self, call: &FunctionCall, env: &mut Env, depth: usize) -> Result<f64, ModlError> {
        let args = call
            .args
            .iter()
            .map(|a| self.eval_at(a, env, depth))
            .collect::<Result<Vec<f64>, ModlError>>()?;
        let name = call.name.value.as_str();

        let callee = self.program.and_then(|p| p.callable(name));
        let Some(block) = callee else {
            return eval_call(name, &args)
                .ok_or_else(|| ModlError::unresolved(NAME, name, call.name.token));
        };
        let Some(routine) = block.routine() else {
            return Err(ModlError::unresolved(NAME, name, call.name.token));
        };
        if depth >= MAX_CALL_DEPTH {
            return Err(ModlError::invalid_model(format!(
                "call depth limit reached in '{}'",
                name
            )));
        }
        if routine.parameters.len() != args.len() {
            return Err(ModlError::invalid_model(format!(
                "'{}' expects {} arguments, got {}",
                name,
                routine.parameters.len(),
                args.len()
            )));
        }

        env.push();
        for (parameter, value) in routine.parameters.iter().zip(&args) {
            env.declare(&parameter.value, *value);
        }
        if matches!(block, Block::Function(_)) {
            env.declare(name, 0.0);
        }
        let result = self.exec_scoped(&routine.body, env, depth + 1);
        let value = match block {
            Block::Function(_) => env.get(name).unwrap_or(0.0),
            _ => 0.0,
        };
        env.pop();
        result.map(|_| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::{parse_expression, parse_statements};
    use approx::assert_relative_eq;

    fn run(source: &str, env: &mut Env) -> Result<(), ModlError> {
        Interpreter::default().exec_block(&parse_statements(source).unwrap(), env)
    }

    #[test]
    fn test_arithmetic_and_builtins() {
        let mut env = Env::with_values([("v", -65.0)]);
        run("x = exp(0.1 * (v + 65)) + 2 ^ 3 - 10 / 4", &mut env).unwrap();
        assert_relative_eq!(env.get("x").unwrap(), 1.0 + 8.0 - 2.5);
    }

    #[test]
    fn test_if_chain_and_locals() {
        let mut env = Env::with_values([("v", 5.0)]);
        run(
            "LOCAL tmp\ntmp = v * 2\nIF (tmp > 20) { r = 1 } ELSE IF (tmp > 5) { r = 2 } ELSE { r = 3 }",
            &mut env,
        )
        .unwrap();
        assert_eq!(env.get("r"), Some(2.0));
        assert_eq!(env.get("tmp"), None);
    }

    #[test]
    fn test_primes_and_indices() {
        let mut env = Env::with_values([("ca[0]", 1.0), ("ca[1]", 3.0)]);
        run("ca'[1] = ca[0] - ca[1]\nm' = -1", &mut env).unwrap();
        assert_eq!(env.get("ca'[1]"), Some(-2.0));
        assert_eq!(env.get("m'"), Some(-1.0));
    }

    #[test]
    fn test_user_functions_and_procedures() {
        let program = Program::new(vec![
            Block::Function(RoutineBlock::new(
                "square",
                &["x"],
                parse_statements("square = x * x").unwrap(),
            )),
            Block::Procedure(RoutineBlock::new(
                "rates",
                &["v"],
                parse_statements("LOCAL a\na = square(v)\nminf = a + 1").unwrap(),
            )),
        ]);
        let mut env = Env::new();
        let block = parse_statements("rates(3)\ny = square(2)").unwrap();
        Interpreter::new(&program).exec_block(&block, &mut env).unwrap();
        assert_eq!(env.get("minf"), Some(10.0));
        assert_eq!(env.get("y"), Some(4.0));
        assert_eq!(env.get("a"), None);
    }

    #[test]
    fn test_errors() {
        let mut env = Env::new();
        assert!(matches!(
            Interpreter::default().eval(&parse_expression("q + 1").unwrap(), &mut env),
            Err(ModlError::UnresolvedName { .. })
        ));
        assert!(matches!(
            Interpreter::default().eval(&parse_expression("nope(1)").unwrap(), &mut env),
            Err(ModlError::UnresolvedName { .. })
        ));

        let program = Program::new(vec![Block::Function(RoutineBlock::new(
            "f",
            &["x"],
            parse_statements("f = f(x)").unwrap(),
        ))]);
        let result = Interpreter::new(&program).eval(&parse_expression("f(1)").unwrap(), &mut env);
        assert!(matches!(result, Err(ModlError::InvalidModel(_))));
    }
}
