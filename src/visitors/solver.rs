//! Integration of ODEs selected by `SOLVE ... METHOD`
//!
//! The actual algebra lives behind [`SymbolicSolver`], a synchronous
//! request/response boundary: the pass sends one ODE at a time and gets back
//! either a replacement assignment or a failure. Failures leave the ODE in
//! place, where code generation falls back to an explicit Euler step.
//!
//! Two implementations ship with the crate:
//!
//! - [`NativeSolver`]: Euler steps for any right-hand side and the exact
//!   exponential update for `cnexp` when the right-hand side is linear in the
//!   state variable.
//! - [`CommandSolver`]: an external symbolic service speaking JSON over
//!   stdin/stdout, one request per process.

use std::collections::HashSet;
use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::ast::parser::parse_statement;
use crate::ast::walk::{nested_blocks, nested_blocks_mut, walk_expr};
use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::error::ModlError;
use crate::symtab;
use crate::visitors::Pass;

/// One ODE handed to the symbolic solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRequest {
    /// `x' = f(x)` in NMODL syntax
    pub equation: String,
    /// `cnexp` or `euler`
    pub method: String,
    /// Names in scope at the equation
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveResponse {
    pub success: bool,
    /// Replacement assignment when `success` is set
    pub statement: String,
    pub diagnostic: String,
}

impl SolveResponse {
    pub fn solved(statement: impl Into<String>) -> Self {
        Self {
            success: true,
            statement: statement.into(),
            diagnostic: String::new(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            statement: String::new(),
            diagnostic: diagnostic.into(),
        }
    }
}

/// Boundary to the symbolic algebra used for integrating ODEs
///
/// `Err` is reserved for a solver that cannot be reached at all; an equation
/// it cannot handle is an unsuccessful [`SolveResponse`].
pub trait SymbolicSolver {
    fn solve(&mut self, request: &SolveRequest) -> Result<SolveResponse, ModlError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Native solver
// ═══════════════════════════════════════════════════════════════════════════════

/// `a + b*x` decomposition of a right-hand side; `None` parts are zero
type Linear = (Option<Expression>, Option<Expression>);

/// Parenthesize anything that is not already an atom
fn group(expr: Expression) -> Expression {
    if expr.precedence() >= 10 {
        expr
    } else {
        Expression::paren(expr)
    }
}

fn negate(expr: Expression) -> Expression {
    match expr {
        Expression::Number(v) => Expression::number(-v),
        other => Expression::neg(group(other)),
    }
}

fn combine(lhs: Option<Expression>, op: BinaryOp, rhs: Option<Expression>) -> Option<Expression> {
    match (lhs, rhs) {
        (Some(l), Some(r)) => Some(Expression::binary(l, op, r)),
        (Some(l), None) => Some(l),
        (None, Some(r)) if op == BinaryOp::Sub => Some(negate(r)),
        (None, r) => r,
    }
}

fn scale(part: Option<Expression>, op: BinaryOp, factor: &Expression) -> Option<Expression> {
    part.map(|p| match p {
        Expression::Number(v) if v == 1.0 && op == BinaryOp::Mul => factor.clone(),
        p => Expression::binary(p, op, factor.clone()),
    })
}

fn mentions(expr: &Expression, target: &str) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| {
        if is_target(e, target) {
            found = true;
        }
    });
    found
}

fn is_target(expr: &Expression, target: &str) -> bool {
    matches!(expr, Expression::Name(_) | Expression::Indexed { .. }) && expr.to_string() == target
}

/// Split `expr` into `a + b*x` with `a` and `b` free of `x`
fn linear_parts(expr: &Expression, target: &str) -> Option<Linear> {
    if !mentions(expr, target) {
        return Some((Some(expr.clone()), None));
    }
    match expr {
        e if is_target(e, target) => Some((None, Some(Expression::number(1.0)))),
        Expression::Paren(inner) => linear_parts(inner, target),
        Expression::Unary {
            op: UnaryOp::Neg,
            operand,
        } => {
            let (a, b) = linear_parts(operand, target)?;
            Some((a.map(negate), b.map(negate)))
        }
        Expression::Binary { lhs, op, rhs } => match op {
            BinaryOp::Add | BinaryOp::Sub => {
                let (a1, b1) = linear_parts(lhs, target)?;
                let (a2, b2) = linear_parts(rhs, target)?;
                Some((combine(a1, *op, a2), combine(b1, *op, b2)))
            }
            BinaryOp::Mul if !mentions(lhs, target) => {
                let (a, b) = linear_parts(rhs, target)?;
                let factor = group(lhs.as_ref().clone());
                Some((scale(a, BinaryOp::Mul, &factor), scale(b, BinaryOp::Mul, &factor)))
            }
            BinaryOp::Mul | BinaryOp::Div if !mentions(rhs, target) => {
                let (a, b) = linear_parts(lhs, target)?;
                let factor = group(rhs.as_ref().clone());
                Some((scale(a, *op, &factor), scale(b, *op, &factor)))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Built-in solver without any symbolic algebra
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSolver;

impl NativeSolver {
    pub fn new() -> Self {
        Self
    }

    fn euler(target: &Expression, rhs: &Expression) -> Expression {
        Expression::assign(
            target.clone(),
            Expression::binary(
                target.clone(),
                BinaryOp::Add,
                Expression::binary(Expression::name("dt"), BinaryOp::Mul, Expression::paren(rhs.clone())),
            ),
        )
    }

    /// `x = x + (1 - exp(dt*b)) * (-(a)/(b) - x)` for `x' = a + b*x`
    fn cnexp(target: &Expression, rhs: &Expression) -> Option<Expression> {
        let key = target.to_string();
        let (a, b) = linear_parts(rhs, &key)?;
        let Some(b) = b else {
            // x does not appear, so the explicit step is exact
            return Some(Self::euler(target, rhs));
        };
        let a = a.unwrap_or_else(|| Expression::number(0.0));
        let b = group(b);
        let decay = Expression::paren(Expression::binary(
            Expression::number(1.0),
            BinaryOp::Sub,
            Expression::call(
                "exp",
                vec![Expression::binary(Expression::name("dt"), BinaryOp::Mul, b.clone())],
            ),
        ));
        let steady = Expression::paren(Expression::binary(
            Expression::binary(negate(a), BinaryOp::Div, b),
            BinaryOp::Sub,
            target.clone(),
        ));
        Some(Expression::assign(
            target.clone(),
            Expression::binary(
                target.clone(),
                BinaryOp::Add,
                Expression::binary(decay, BinaryOp::Mul, steady),
            ),
        ))
    }
}

impl SymbolicSolver for NativeSolver {
    fn solve(&mut self, request: &SolveRequest) -> Result<SolveResponse, ModlError> {
        let statement = parse_statement(&request.equation)?;
        let Some((lhs, rhs)) = statement.as_assignment() else {
            return Ok(SolveResponse::failed("not an assignment"));
        };
        let target = match lhs {
            Expression::PrimeName {
                name,
                index: Some(index),
                ..
            } => Expression::Indexed {
                name: name.clone(),
                index: index.clone(),
            },
            Expression::PrimeName { name, .. } => Expression::Name(name.clone()),
            _ => return Ok(SolveResponse::failed("left-hand side is not a derivative")),
        };
        let solved = match request.method.as_str() {
            "euler" => Some(Self::euler(&target, rhs)),
            "cnexp" => Self::cnexp(&target, rhs),
            other => return Ok(SolveResponse::failed(format!("method '{}' is not supported", other))),
        };
        Ok(match solved {
            Some(expr) => SolveResponse::solved(expr.to_string()),
            None => SolveResponse::failed(format!(
                "right-hand side is not linear in {}",
                target
            )),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// External solver
// ═══════════════════════════════════════════════════════════════════════════════

/// Symbolic service run as a child process per request
#[derive(Debug, Clone)]
pub struct CommandSolver {
    program: String,
    args: Vec<String>,
}

impl CommandSolver {
    pub fn new(command: &[String]) -> Result<Self, ModlError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ModlError::Config("solver command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl SymbolicSolver for CommandSolver {
    fn solve(&mut self, request: &SolveRequest) -> Result<SolveResponse, ModlError> {
        let failure = |message: String| ModlError::solver(&request.method, message);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| failure(format!("cannot start '{}': {}", self.program, e)))?;

        let payload = serde_json::to_vec(request)?;
        match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&payload)?,
            None => return Err(failure("solver stdin is not available".into())),
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(failure(format!("'{}' exited with {}", self.program, output.status)));
        }
        let response: SolveResponse = serde_json::from_slice(&output.stdout)?;
        tracing::debug!(
            equation = %request.equation,
            success = response.success,
            "symbolic solver replied"
        );
        Ok(response)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pass
// ═══════════════════════════════════════════════════════════════════════════════

fn collect_solves(block: &StatementBlock, out: &mut Vec<SolveStatement>) {
    for statement in &block.statements {
        if let Statement::Solve(solve) = statement {
            out.push(solve.clone());
        }
        for nested in nested_blocks(statement) {
            collect_solves(nested, out);
        }
    }
}

pub struct SolveBlockVisitor {
    solver: Box<dyn SymbolicSolver>,
    solved: usize,
}

impl Default for SolveBlockVisitor {
    fn default() -> Self {
        Self::new(NativeSolver)
    }
}

impl SolveBlockVisitor {
    pub fn new(solver: impl SymbolicSolver + 'static) -> Self {
        Self {
            solver: Box::new(solver),
            solved: 0,
        }
    }

    /// Number of ODEs replaced by the last run
    pub fn solved(&self) -> usize {
        self.solved
    }

    fn solve_block(
        &mut self,
        block: &mut StatementBlock,
        method: &str,
        scope: &[String],
        diagnostics: &mut Diagnostics,
    ) -> Result<(), ModlError> {
        let mut variables = scope.to_vec();
        variables.extend(block.local_names().into_iter().map(|n| n.value.clone()));

        for statement in block.statements.iter_mut() {
            if statement.as_ode().is_none() {
                for nested in nested_blocks_mut(statement) {
                    self.solve_block(nested, method, &variables, diagnostics)?;
                }
                continue;
            }
            let request = SolveRequest {
                equation: statement.to_string(),
                method: method.to_string(),
                variables: variables.clone(),
            };
            let token = statement.as_ode().and_then(|(name, _)| name.token);
            let response = self.solver.solve(&request)?;
            if !response.success {
                diagnostics.warn(
                    "SolveBlock",
                    format!(
                        "cannot solve '{}' with {}: {}; left for the numeric solver",
                        request.equation, method, response.diagnostic
                    ),
                    token,
                );
                continue;
            }
            match parse_statement(&response.statement) {
                Ok(solved) => {
                    tracing::debug!(from = %request.equation, to = %solved, "ODE solved");
                    *statement = solved;
                    self.solved += 1;
                }
                Err(e) => diagnostics.warn(
                    "SolveBlock",
                    format!("solver reply '{}' is not a statement: {}", response.statement, e),
                    token,
                ),
            }
        }
        Ok(())
    }
}

impl Pass for SolveBlockVisitor {
    fn name(&self) -> &'static str {
        "SolveBlock"
    }

    fn run(&mut self, mut program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError> {
        let scope: Vec<String> = symtab::require(&program, self.name())?
            .iter()
            .map(|s| s.name.clone())
            .collect();
        self.solved = 0;

        let mut solves = Vec::new();
        if let Some(breakpoint) = program.breakpoint() {
            collect_solves(breakpoint, &mut solves);
        }

        let mut visited = HashSet::new();
        for solve in solves {
            let name = solve.block_name.value.clone();
            let position = program
                .blocks
                .iter()
                .position(|b| matches!(b, Block::Derivative(r) if r.name.value == name));
            let Some(position) = position else {
                if program.callable(&name).is_some() {
                    // SOLVE of a PROCEDURE just calls it every step
                    continue;
                }
                return Err(ModlError::unresolved(self.name(), &name, solve.block_name.token));
            };
            let Block::Derivative(block) = &mut program.blocks[position] else {
                continue;
            };
            if !visited.insert(name.clone()) {
                continue;
            }

            let method = solve.method.as_ref().map(|m| m.value.as_str()).unwrap_or("");
            match method {
                "cnexp" | "euler" => {
                    let mut params: Vec<String> = scope.clone();
                    params.extend(block.parameters.iter().map(|p| p.value.clone()));
                    self.solve_block(&mut block.body, method, &params, diagnostics)?;
                }
                other => diagnostics.info(
                    self.name(),
                    format!(
                        "DERIVATIVE {} uses METHOD '{}', ODEs are left for the generic solver",
                        name, other
                    ),
                    solve.block_name.token,
                ),
            }
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::parse_statements;

    fn request(equation: &str, method: &str) -> SolveRequest {
        SolveRequest {
            equation: equation.to_string(),
            method: method.to_string(),
            variables: vec![],
        }
    }

    #[test]
    fn test_native_euler() {
        let response = NativeSolver
            .solve(&request("m' = (minf - m) / mtau", "euler"))
            .unwrap();
        assert!(response.success);
        assert_eq!(response.statement, "m = m + dt * ((minf - m) / mtau)");
    }

    #[test]
    fn test_native_cnexp_linear() {
        let response = NativeSolver
            .solve(&request("m' = (minf - m) / mtau", "cnexp"))
            .unwrap();
        assert!(response.success);
        assert_eq!(
            response.statement,
            "m = m + (1 - exp(dt * (-1 / mtau))) * (-(minf / mtau) / (-1 / mtau) - m)"
        );
    }

    #[test]
    fn test_native_cnexp_rejects_nonlinear() {
        let response = NativeSolver.solve(&request("m' = m * m", "cnexp")).unwrap();
        assert!(!response.success);
        assert!(response.diagnostic.contains("not linear in m"));

        let response = NativeSolver.solve(&request("m' = m", "sparse")).unwrap();
        assert!(!response.success);
    }

    #[test]
    fn test_indexed_state_is_the_target() {
        let response = NativeSolver
            .solve(&request("ca'[1] = -k * ca[1] + ca[0]", "cnexp"))
            .unwrap();
        assert!(response.success);
        assert!(response.statement.starts_with("ca[1] = ca[1] + (1 - exp(dt * "));
    }

    fn program(method: &str) -> Program {
        let mut program = Program::new(vec![
            Block::State(vec![VarDecl::scalar("m"), VarDecl::scalar("n")]),
            Block::Breakpoint(parse_statements(&format!("SOLVE states METHOD {}", method)).unwrap()),
            Block::Derivative(RoutineBlock::new(
                "states",
                &[],
                parse_statements("m' = (minf - m) / mtau\nn' = n * n").unwrap(),
            )),
        ]);
        symtab::build(&mut program).unwrap();
        program
    }

    #[test]
    fn test_failed_ode_is_left_with_one_warning() {
        let mut pass = SolveBlockVisitor::default();
        let mut diagnostics = Diagnostics::new();
        let program = pass.run(program("cnexp"), &mut diagnostics).unwrap();
        let body = &program.derivative_block("states").unwrap().body;

        assert_eq!(pass.solved(), 1);
        assert!(body.statements[0].as_ode().is_none());
        assert_eq!(body.statements[1].to_string(), "n' = n * n");
        assert_eq!(
            diagnostics
                .at_least(crate::diagnostics::Severity::Warning)
                .count(),
            1
        );
    }

    #[test]
    fn test_other_methods_are_left_alone() {
        let mut pass = SolveBlockVisitor::default();
        let mut diagnostics = Diagnostics::new();
        let program = pass.run(program("derivimplicit"), &mut diagnostics).unwrap();
        assert_eq!(pass.solved(), 0);
        assert!(program.derivative_block("states").unwrap().body.statements[0]
            .as_ode()
            .is_some());
        assert!(diagnostics.iter().any(|d| d.message.contains("derivimplicit")));
    }

    #[test]
    fn test_missing_block_is_fatal() {
        let mut program = Program::new(vec![Block::Breakpoint(
            parse_statements("SOLVE nothing METHOD cnexp").unwrap(),
        )]);
        symtab::build(&mut program).unwrap();
        let result = SolveBlockVisitor::default().run(program, &mut Diagnostics::new());
        assert!(matches!(result, Err(ModlError::UnresolvedName { name, .. }) if name == "nothing"));
    }

    struct Canned(SolveResponse);

    impl SymbolicSolver for Canned {
        fn solve(&mut self, _: &SolveRequest) -> Result<SolveResponse, ModlError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_unparsable_reply_keeps_the_ode() {
        let mut pass = SolveBlockVisitor::new(Canned(SolveResponse::solved("m = = 1")));
        let mut diagnostics = Diagnostics::new();
        let program = pass.run(program("cnexp"), &mut diagnostics).unwrap();
        assert_eq!(pass.solved(), 0);
        let body = &program.derivative_block("states").unwrap().body;
        assert!(body.statements.iter().all(|s| s.as_ode().is_some()));
        assert_eq!(diagnostics.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_solver_round_trip() {
        let reply = r#"{"success": true, "statement": "m = minf"}"#;
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > /dev/null; echo '{}'", reply),
        ];
        let mut solver = CommandSolver::new(&command).unwrap();
        let response = solver.solve(&request("m' = 0", "cnexp")).unwrap();
        assert!(response.success);
        assert_eq!(response.statement, "m = minf");
        assert!(response.diagnostic.is_empty());

        assert!(matches!(CommandSolver::new(&[]), Err(ModlError::Config(_))));
    }
}
