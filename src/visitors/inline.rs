//! Inline FUNCTION and PROCEDURE calls into their callers
//!
//! ```text
//! PROCEDURE rates_1() {               PROCEDURE rates_1() {
//!     LOCAL x                             LOCAL x, rates_2_in_0
//!     rates_2(23.1)          ==>          {
//! }                                           LOCAL x, y_in_0
//!                                             y_in_0 = 23.1
//! PROCEDURE rates_2(y) {                      x = 21.1 * v + y_in_0
//!     LOCAL x                                 rates_2_in_0 = 0
//!     x = 21.1 * v + y                    }
//! }                                   }
//! ```
//!
//! A call that is a statement of its own is replaced by the inlined block.
//! Any other call is hoisted: the inlined block is placed before the calling
//! statement and the call expression becomes a reference to the return local.
//! Callees containing TABLE or VERBATIM, recursive calls and calls with the
//! wrong number of arguments are left alone with one diagnostic each.

use std::collections::{HashMap, HashSet};

use crate::ast::walk::{called_functions, nested_blocks, statement_exprs_mut, walk_expr};
use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::error::ModlError;
use crate::symtab;
use crate::visitors::rename::{all_names, NameGenerator, RenameVisitor};
use crate::visitors::Pass;

/// Value every inlined PROCEDURE "returns"
const PROCEDURE_STATUS: f64 = 0.0;

#[derive(Debug, Clone)]
struct Callee {
    routine: RoutineBlock,
    is_function: bool,
}

#[derive(Debug, Default)]
pub struct InlineVisitor {
    generator: NameGenerator,
    callees: HashMap<String, Callee>,
    taken: HashSet<String>,
    inlined: usize,
}

/// Reason a callee body cannot be duplicated into its caller
fn blocking_construct(block: &StatementBlock) -> Option<&'static str> {
    for statement in &block.statements {
        match statement {
            Statement::Table(_) => return Some("TABLE"),
            Statement::Verbatim(_) => return Some("VERBATIM"),
            _ => {
                for nested in nested_blocks(statement) {
                    if let Some(reason) = blocking_construct(nested) {
                        return Some(reason);
                    }
                }
            }
        }
    }
    None
}

impl InlineVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of call sites inlined by the last run
    pub fn inlined(&self) -> usize {
        self.inlined
    }

    /// Whether `name` reaches itself through the call graph of the callees
    fn is_recursive(&self, name: &str) -> bool {
        let mut stack: Vec<String> = vec![name.to_string()];
        let mut seen: HashSet<String> = HashSet::new();
        while let Some(current) = stack.pop() {
            let Some(callee) = self.callees.get(&current) else {
                continue;
            };
            for called in called_functions(&callee.routine.body) {
                if called == name {
                    return true;
                }
                if seen.insert(called.clone()) {
                    stack.push(called);
                }
            }
        }
        false
    }

    /// Build the block replacing one call, or `None` when the call stays
    fn inline_call(
        &mut self,
        call: &FunctionCall,
        caller: &mut Vec<String>,
        diagnostics: &mut Diagnostics,
    ) -> Option<(StatementBlock, String)> {
        let callee = self.callees.get(&call.name.value)?.clone();
        let name = call.name.value.as_str();

        if self.is_recursive(name) {
            diagnostics.warn(
                self.name(),
                format!("recursive call to '{}' is not inlined", name),
                call.name.token,
            );
            return None;
        }
        if let Some(construct) = blocking_construct(&callee.routine.body) {
            diagnostics.warn(
                self.name(),
                format!("'{}' contains {} and is not inlined", name, construct),
                call.name.token,
            );
            return None;
        }
        if callee.routine.parameters.len() != call.args.len() {
            diagnostics.warn(
                self.name(),
                format!(
                    "'{}' expects {} arguments but is called with {}, not inlined",
                    name,
                    callee.routine.parameters.len(),
                    call.args.len()
                ),
                call.name.token,
            );
            return None;
        }

        let return_name = self.generator.fresh(&format!("{}_in", name), &mut self.taken);
        let mut body = callee.routine.body.clone();
        body.symtab = None;
        RenameVisitor::new(name, &return_name).rename_block(&mut body);

        // callee locals must not capture names the actual arguments refer to
        let mut argument_names: HashSet<String> = HashSet::new();
        for arg in &call.args {
            walk_expr(arg, &mut |e| {
                if let Some(n) = e.base_name() {
                    argument_names.insert(n.value.clone());
                }
            });
        }
        let callee_locals: Vec<String> = body.local_names().iter().map(|n| n.value.clone()).collect();
        for local in callee_locals {
            if argument_names.contains(&local) {
                let fresh = self.generator.fresh(&format!("{}_in", local), &mut self.taken);
                RenameVisitor::new(&local, &fresh).rename_block(&mut body);
            }
        }

        let mut assignments = Vec::new();
        let mut argument_locals = Vec::new();
        for (parameter, arg) in callee.routine.parameters.iter().zip(call.args.iter()) {
            let local = self
                .generator
                .fresh(&format!("{}_in", parameter.value), &mut self.taken);
            RenameVisitor::new(&parameter.value, &local).rename_block(&mut body);
            assignments.push(Statement::assign(Expression::name(&local), arg.clone()));
            argument_locals.push(local);
        }
        let position = body
            .statements
            .iter()
            .take_while(|s| matches!(s, Statement::LocalList(_)))
            .count();
        body.statements.splice(position..position, assignments);
        for local in argument_locals {
            body.add_local(local);
        }
        if !callee.is_function {
            body.statements.push(Statement::assign(
                Expression::name(&return_name),
                Expression::number(PROCEDURE_STATUS),
            ));
        }

        // calls inside the copied body are inlined as well
        let mut inner_locals = Vec::new();
        self.inline_block(&mut body, &mut inner_locals, diagnostics);
        for local in inner_locals {
            body.add_local(local);
        }

        caller.push(return_name.clone());
        self.inlined += 1;
        diagnostics.debug(
            self.name(),
            format!("inlined call to '{}' as '{}'", name, return_name),
            call.name.token,
        );
        Some((body, return_name))
    }

    /// Inline calls inside `expr`, innermost first, pushing the inlined blocks to `hoisted`
    fn inline_expr(
        &mut self,
        expr: &mut Expression,
        hoisted: &mut Vec<Statement>,
        caller: &mut Vec<String>,
        diagnostics: &mut Diagnostics,
    ) {
        match expr {
            Expression::Number(_) | Expression::Name(_) => {}
            Expression::Indexed { index, .. } => self.inline_expr(index, hoisted, caller, diagnostics),
            Expression::PrimeName { index, .. } => {
                if let Some(index) = index {
                    self.inline_expr(index, hoisted, caller, diagnostics);
                }
            }
            Expression::Unary { operand, .. } => {
                self.inline_expr(operand, hoisted, caller, diagnostics)
            }
            Expression::Binary { lhs, rhs, .. } => {
                self.inline_expr(lhs, hoisted, caller, diagnostics);
                self.inline_expr(rhs, hoisted, caller, diagnostics);
            }
            Expression::Paren(inner) => self.inline_expr(inner, hoisted, caller, diagnostics),
            Expression::Call(call) => {
                for arg in call.args.iter_mut() {
                    self.inline_expr(arg, hoisted, caller, diagnostics);
                }
                if let Some((block, return_name)) = self.inline_call(call, caller, diagnostics) {
                    hoisted.push(Statement::Block(block));
                    *expr = Expression::name(return_name);
                }
            }
        }
    }

    /// Inline every call in `block`; return locals are collected in `caller`
    fn inline_block(
        &mut self,
        block: &mut StatementBlock,
        caller: &mut Vec<String>,
        diagnostics: &mut Diagnostics,
    ) {
        let statements = std::mem::take(&mut block.statements);
        let mut rewritten = Vec::with_capacity(statements.len());

        for mut statement in statements {
            match &mut statement {
                Statement::Expression(Expression::Call(call))
                    if self.callees.contains_key(&call.name.value) =>
                {
                    let mut call = call.clone();
                    for arg in call.args.iter_mut() {
                        self.inline_expr(arg, &mut rewritten, caller, diagnostics);
                    }
                    match self.inline_call(&call, caller, diagnostics) {
                        Some((inlined, _)) => rewritten.push(Statement::Block(inlined)),
                        None => rewritten.push(Statement::Expression(Expression::Call(call))),
                    }
                    continue;
                }
                Statement::If(s) => {
                    self.inline_expr(&mut s.condition, &mut rewritten, caller, diagnostics);
                    self.inline_nested(&mut s.then_block, diagnostics);
                    if let Some(else_block) = s.else_block.as_mut() {
                        self.inline_nested(else_block, diagnostics);
                    }
                }
                Statement::Block(nested) => self.inline_nested(nested, diagnostics),
                other => {
                    for expr in statement_exprs_mut(other) {
                        self.inline_expr(expr, &mut rewritten, caller, diagnostics);
                    }
                }
            }
            rewritten.push(statement);
        }
        block.statements = rewritten;
    }

    /// Nested blocks declare the return locals of their own calls
    fn inline_nested(&mut self, block: &mut StatementBlock, diagnostics: &mut Diagnostics) {
        let mut locals = Vec::new();
        self.inline_block(block, &mut locals, diagnostics);
        for local in locals {
            block.add_local(local);
        }
    }
}

impl Pass for InlineVisitor {
    fn name(&self) -> &'static str {
        "Inline"
    }

    fn run(&mut self, mut program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError> {
        symtab::require(&program, self.name())?;
        self.taken = all_names(&program);
        self.inlined = 0;
        self.callees = program
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Procedure(r) => Some((r.name.value.clone(), Callee { routine: r.clone(), is_function: false })),
                Block::Function(r) => Some((r.name.value.clone(), Callee { routine: r.clone(), is_function: true })),
                _ => None,
            })
            .collect();

        for block in program.blocks.iter_mut() {
            // definitions keep their original bodies, so codegen can still emit them
            if block.is_callable() {
                continue;
            }
            if let Some(body) = block.body_mut() {
                self.inline_nested(body, diagnostics);
            }
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::parse_statements;

    fn with_routines(breakpoint: &str, routines: Vec<Block>) -> Program {
        let mut blocks = vec![
            Block::Neuron(NeuronBlock {
                suffix: Name::new("test"),
                range: vec![Name::new("tau"), Name::new("y")],
                ..Default::default()
            }),
            Block::Assigned(vec![VarDecl::scalar("tau"), VarDecl::scalar("y")]),
            Block::Breakpoint(parse_statements(breakpoint).unwrap()),
        ];
        blocks.extend(routines);
        let mut program = Program::new(blocks);
        symtab::build(&mut program).unwrap();
        program
    }

    fn procedure(name: &str, params: &[&str], body: &str) -> Block {
        Block::Procedure(RoutineBlock::new(name, params, parse_statements(body).unwrap()))
    }

    fn function(name: &str, params: &[&str], body: &str) -> Block {
        Block::Function(RoutineBlock::new(name, params, parse_statements(body).unwrap()))
    }

    fn breakpoint_text(program: &Program) -> String {
        program.breakpoint().unwrap().to_string()
    }

    #[test]
    fn test_bare_procedure_call_is_replaced() {
        let program = with_routines(
            "rates(v)",
            vec![procedure("rates", &["x"], "LOCAL a\na = x * 2\ntau = a")],
        );
        let mut diagnostics = Diagnostics::new();
        let program = InlineVisitor::new().run(program, &mut diagnostics).unwrap();
        let expected = "{
    LOCAL rates_in_0
    {
        LOCAL a, x_in_0
        x_in_0 = v
        a = x_in_0 * 2
        tau = a
        rates_in_0 = 0
    }
}";
        assert_eq!(breakpoint_text(&program), expected);
    }

    #[test]
    fn test_function_call_in_expression_is_hoisted() {
        let program = with_routines(
            "y = 1 + f(v, 2)",
            vec![function("f", &["a", "b"], "f = a * b")],
        );
        let mut diagnostics = Diagnostics::new();
        let program = InlineVisitor::new().run(program, &mut diagnostics).unwrap();
        let expected = "{
    LOCAL f_in_0
    {
        LOCAL a_in_0, b_in_0
        a_in_0 = v
        b_in_0 = 2
        f_in_0 = a_in_0 * b_in_0
    }
    y = 1 + f_in_0
}";
        assert_eq!(breakpoint_text(&program), expected);
    }

    #[test]
    fn test_repeated_calls_get_distinct_names() {
        let program = with_routines(
            "y = f(1) + f(2)",
            vec![function("f", &["a"], "f = a + 1")],
        );
        let mut diagnostics = Diagnostics::new();
        let mut pass = InlineVisitor::new();
        let program = pass.run(program, &mut diagnostics).unwrap();
        let text = breakpoint_text(&program);
        assert!(text.contains("LOCAL f_in_0, f_in_1"));
        assert!(text.contains("y = f_in_0 + f_in_1"));
        assert_eq!(pass.inlined(), 2);
    }

    #[test]
    fn test_nested_calls_are_inlined_transitively() {
        let program = with_routines(
            "outer()",
            vec![
                procedure("outer", &[], "tau = inner(3)"),
                function("inner", &["q"], "inner = q * q"),
            ],
        );
        let mut diagnostics = Diagnostics::new();
        let program = InlineVisitor::new().run(program, &mut diagnostics).unwrap();
        let text = breakpoint_text(&program);
        assert!(!text.contains("inner("));
        assert!(text.contains("tau = inner_in_0"));
        // the definitions themselves are untouched
        let outer = program.callable("outer").and_then(|b| b.body()).unwrap();
        assert_eq!(outer.statements[0].to_string(), "tau = inner(3)");
    }

    #[test]
    fn test_blocked_calls_produce_one_diagnostic_each() {
        let program = with_routines(
            "y = fact(3) + g(1, 2)\nh()",
            vec![
                function("fact", &["n"], "IF (n > 1) { fact = n * fact(n - 1) } ELSE { fact = 1 }"),
                function("g", &["a"], "g = a"),
                procedure("h", &[], "VERBATIM\nreturn 0;\nENDVERBATIM"),
            ],
        );
        let mut diagnostics = Diagnostics::new();
        let program = InlineVisitor::new().run(program, &mut diagnostics).unwrap();
        let text = breakpoint_text(&program);
        assert!(text.contains("y = fact(3) + g(1, 2)"));
        assert!(text.contains("h()"));
        let warnings: Vec<_> = diagnostics
            .at_least(crate::diagnostics::Severity::Warning)
            .map(|d| d.message.clone())
            .collect();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("recursive"));
        assert!(warnings[1].contains("expects 1 arguments"));
        assert!(warnings[2].contains("VERBATIM"));
    }

    #[test]
    fn test_callee_locals_do_not_capture_arguments() {
        let program = with_routines(
            "LOCAL t\nt = 4\ny = sq(t)",
            vec![function("sq", &["a"], "LOCAL t\nt = a * a\nsq = t")],
        );
        let mut diagnostics = Diagnostics::new();
        let program = InlineVisitor::new().run(program, &mut diagnostics).unwrap();
        let text = breakpoint_text(&program);
        assert!(text.contains("a_in_0 = t"));
        assert!(text.contains("t_in_0 = a_in_0 * a_in_0"));
    }
}
