//! Generic traversal helpers shared by the passes
//!
//! Passes that only care about expressions use [`walk_expr`] /
//! [`walk_expr_mut`]; passes that rewrite statement lists recurse through
//! [`nested_blocks_mut`] themselves.

use super::*;

/// Visit `expr` and all of its sub-expressions, parents before children
pub fn walk_expr<'a>(expr: &'a Expression, f: &mut impl FnMut(&'a Expression)) {
    f(expr);
    match expr {
        Expression::Number(_) | Expression::Name(_) => {}
        Expression::Indexed { index, .. } => walk_expr(index, f),
        Expression::PrimeName { index, .. } => {
            if let Some(index) = index {
                walk_expr(index, f);
            }
        }
        Expression::Unary { operand, .. } => walk_expr(operand, f),
        Expression::Binary { lhs, rhs, .. } => {
            walk_expr(lhs, f);
            walk_expr(rhs, f);
        }
        Expression::Paren(inner) => walk_expr(inner, f),
        Expression::Call(call) => {
            for arg in &call.args {
                walk_expr(arg, f);
            }
        }
    }
}

/// Visit `expr` mutably, children before parents, so `f` may replace a node
/// after its operands have already been rewritten.
pub fn walk_expr_mut(expr: &mut Expression, f: &mut impl FnMut(&mut Expression)) {
    match expr {
        Expression::Number(_) | Expression::Name(_) => {}
        Expression::Indexed { index, .. } => walk_expr_mut(index, f),
        Expression::PrimeName { index, .. } => {
            if let Some(index) = index {
                walk_expr_mut(index, f);
            }
        }
        Expression::Unary { operand, .. } => walk_expr_mut(operand, f),
        Expression::Binary { lhs, rhs, .. } => {
            walk_expr_mut(lhs, f);
            walk_expr_mut(rhs, f);
        }
        Expression::Paren(inner) => walk_expr_mut(inner, f),
        Expression::Call(call) => {
            for arg in call.args.iter_mut() {
                walk_expr_mut(arg, f);
            }
        }
    }
    f(expr);
}

/// Expressions owned directly by a statement (not those of nested blocks)
pub fn statement_exprs(statement: &Statement) -> Vec<&Expression> {
    match statement {
        Statement::Expression(e) => vec![e],
        Statement::Reaction(r) => {
            let mut exprs: Vec<&Expression> = r
                .lhs
                .iter()
                .chain(r.rhs.iter())
                .filter_map(|v| v.index.as_deref())
                .collect();
            exprs.push(&r.rate_forward);
            exprs.extend(r.rate_backward.iter());
            exprs
        }
        Statement::Compartment(c) => vec![&c.volume],
        Statement::Conserve(c) => {
            let mut exprs: Vec<&Expression> =
                c.react.iter().filter_map(|v| v.index.as_deref()).collect();
            exprs.push(&c.expr);
            exprs
        }
        Statement::If(s) => vec![&s.condition],
        Statement::Table(t) => vec![&t.from, &t.to],
        Statement::LocalList(_)
        | Statement::Block(_)
        | Statement::Solve(_)
        | Statement::Verbatim(_) => Vec::new(),
    }
}

pub fn statement_exprs_mut(statement: &mut Statement) -> Vec<&mut Expression> {
    match statement {
        Statement::Expression(e) => vec![e],
        Statement::Reaction(r) => {
            let mut exprs: Vec<&mut Expression> = r
                .lhs
                .iter_mut()
                .chain(r.rhs.iter_mut())
                .filter_map(|v| v.index.as_deref_mut())
                .collect();
            exprs.push(&mut r.rate_forward);
            exprs.extend(r.rate_backward.iter_mut());
            exprs
        }
        Statement::Compartment(c) => vec![&mut c.volume],
        Statement::Conserve(c) => {
            let mut exprs: Vec<&mut Expression> = c
                .react
                .iter_mut()
                .filter_map(|v| v.index.as_deref_mut())
                .collect();
            exprs.push(&mut c.expr);
            exprs
        }
        Statement::If(s) => vec![&mut s.condition],
        Statement::Table(t) => vec![&mut t.from, &mut t.to],
        Statement::LocalList(_)
        | Statement::Block(_)
        | Statement::Solve(_)
        | Statement::Verbatim(_) => Vec::new(),
    }
}

/// Blocks nested directly inside a statement
pub fn nested_blocks(statement: &Statement) -> Vec<&StatementBlock> {
    match statement {
        Statement::If(s) => {
            let mut blocks = vec![&s.then_block];
            blocks.extend(s.else_block.iter());
            blocks
        }
        Statement::Block(b) => vec![b],
        _ => Vec::new(),
    }
}

pub fn nested_blocks_mut(statement: &mut Statement) -> Vec<&mut StatementBlock> {
    match statement {
        Statement::If(s) => {
            let mut blocks = vec![&mut s.then_block];
            blocks.extend(s.else_block.iter_mut());
            blocks
        }
        Statement::Block(b) => vec![b],
        _ => Vec::new(),
    }
}

/// Visit every expression in a block, nested blocks included, in document order
pub fn walk_block<'a>(block: &'a StatementBlock, f: &mut impl FnMut(&'a Expression)) {
    for statement in &block.statements {
        for expr in statement_exprs(statement) {
            walk_expr(expr, f);
        }
        for nested in nested_blocks(statement) {
            walk_block(nested, f);
        }
    }
}

pub fn walk_block_mut(block: &mut StatementBlock, f: &mut impl FnMut(&mut Expression)) {
    for statement in block.statements.iter_mut() {
        for expr in statement_exprs_mut(statement) {
            walk_expr_mut(expr, f);
        }
        for nested in nested_blocks_mut(statement) {
            walk_block_mut(nested, f);
        }
    }
}

/// Whether `name` occurs anywhere in the block (as a variable, call, prime or species)
pub fn contains_name(block: &StatementBlock, name: &str) -> bool {
    let mut found = false;
    walk_block(block, &mut |e| {
        if e.base_name().map(|n| n.value == name) == Some(true) {
            found = true;
        }
        if let Expression::Call(call) = e {
            found |= call.name.value == name;
        }
    });
    found || block_mentions_species(block, name)
}

fn block_mentions_species(block: &StatementBlock, name: &str) -> bool {
    block.statements.iter().any(|s| match s {
        Statement::Reaction(r) => r.lhs.iter().chain(r.rhs.iter()).any(|v| v.name.value == name),
        Statement::Compartment(c) => c.species.iter().any(|n| n.value == name),
        Statement::Conserve(c) => c.react.iter().any(|v| v.name.value == name),
        Statement::LocalList(names) => names.iter().any(|n| n.value == name),
        _ => nested_blocks(s)
            .into_iter()
            .any(|b| block_mentions_species(b, name)),
    })
}

/// Names of all functions called in the block, in first-call order
pub fn called_functions(block: &StatementBlock) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    walk_block(block, &mut |e| {
        if let Expression::Call(call) = e {
            if !names.contains(&call.name.value) {
                names.push(call.name.value.clone());
            }
        }
    });
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::parse_statements;

    #[test]
    fn test_walk_block_visits_nested_blocks() {
        let block = parse_statements("IF (a > 0) { b = c } ELSE { d = f(e) }").unwrap();
        let mut names = Vec::new();
        walk_block(&block, &mut |e| {
            if let Expression::Name(n) = e {
                names.push(n.value.clone());
            }
        });
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(called_functions(&block), vec!["f"]);
    }

    #[test]
    fn test_walk_expr_mut_rewrites_children_first() {
        let mut block = parse_statements("x = a + a * 2").unwrap();
        walk_block_mut(&mut block, &mut |e| {
            if let Expression::Name(n) = e {
                if n.value == "a" {
                    *e = Expression::number(3.0);
                }
            }
        });
        assert_eq!(block.statements[0].to_string(), "x = 3 + 3 * 2");
    }

    #[test]
    fn test_contains_name_sees_species() {
        let block = parse_statements("~ A <-> B (kf, kb)\nCOMPARTMENT v {C}").unwrap();
        assert!(contains_name(&block, "kf"));
        assert!(contains_name(&block, "B"));
        assert!(contains_name(&block, "C"));
        assert!(!contains_name(&block, "D"));
    }
}
