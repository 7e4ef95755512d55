//! Abstract syntax tree for kinetic/derivative model descriptions
//!
//! The tree is handed to this crate already validated by an external parser
//! (usually as JSON, see [`Program::from_json`]). Every node owns its children;
//! the only extra association is the optional [`SymbolTable`] stored on the
//! scope-introducing nodes ([`Program`] and [`StatementBlock`]), which is filled
//! in by [`crate::symtab::build`] and never serialized.
//!
//! # Node overview
//!
//! | Node | Role |
//! |------|------|
//! | [`Program`] | Ordered list of top-level [`Block`]s |
//! | [`Block`] | NEURON/PARAMETER/STATE/ASSIGNED declarations and executable blocks |
//! | [`StatementBlock`] | `{ ... }` body, introduces a scope |
//! | [`Statement`] | expression, LOCAL list, reaction, COMPARTMENT, CONSERVE, IF, ... |
//! | [`Expression`] | numbers, names, primes, unary/binary operations, calls |

pub mod parser;
pub mod printer;
pub mod walk;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModlError;
use crate::symtab::SymbolTable;

// ═══════════════════════════════════════════════════════════════════════════════
// Tokens and names
// ═══════════════════════════════════════════════════════════════════════════════

/// Source provenance carried over from the model file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModToken {
    pub line: u32,
    pub column: u32,
}

impl ModToken {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for ModToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// An identifier together with its (optional) source location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Name {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ModToken>,
}

impl Name {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            token: None,
        }
    }

    pub fn with_token(value: impl Into<String>, token: ModToken) -> Self {
        Self {
            value: value.into(),
            token: Some(token),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Assign,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    /// Binding strength used by the printers; higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Assign => 0,
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div => 6,
            BinaryOp::Pow => 8,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Assign => "=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

/// Call to a builtin, FUNCTION or PROCEDURE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: Name,
    pub args: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Number(f64),
    Name(Name),
    /// `ca[1]`
    Indexed {
        name: Name,
        index: Box<Expression>,
    },
    /// `m'` or `ca'[1]`
    PrimeName {
        name: Name,
        order: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<Box<Expression>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        lhs: Box<Expression>,
        op: BinaryOp,
        rhs: Box<Expression>,
    },
    Paren(Box<Expression>),
    Call(FunctionCall),
}

impl Expression {
    pub fn number(value: f64) -> Self {
        Expression::Number(value)
    }

    pub fn name(value: impl Into<String>) -> Self {
        Expression::Name(Name::new(value))
    }

    pub fn indexed(name: impl Into<String>, index: usize) -> Self {
        Expression::Indexed {
            name: Name::new(name),
            index: Box::new(Expression::Number(index as f64)),
        }
    }

    pub fn prime(name: impl Into<String>, index: Option<usize>) -> Self {
        Expression::PrimeName {
            name: Name::new(name),
            order: 1,
            index: index.map(|i| Box::new(Expression::Number(i as f64))),
        }
    }

    pub fn binary(lhs: Expression, op: BinaryOp, rhs: Expression) -> Self {
        Expression::Binary {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    pub fn assign(lhs: Expression, rhs: Expression) -> Self {
        Expression::binary(lhs, BinaryOp::Assign, rhs)
    }

    pub fn paren(inner: Expression) -> Self {
        Expression::Paren(Box::new(inner))
    }

    pub fn neg(operand: Expression) -> Self {
        Expression::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(operand),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call(FunctionCall {
            name: Name::new(name),
            args,
        })
    }

    /// Left and right side when this expression is an assignment
    pub fn as_assignment(&self) -> Option<(&Expression, &Expression)> {
        match self {
            Expression::Binary {
                lhs,
                op: BinaryOp::Assign,
                rhs,
            } => Some((lhs, rhs)),
            _ => None,
        }
    }

    pub fn as_assignment_mut(&mut self) -> Option<(&mut Expression, &mut Expression)> {
        match self {
            Expression::Binary {
                lhs,
                op: BinaryOp::Assign,
                rhs,
            } => Some((lhs.as_mut(), rhs.as_mut())),
            _ => None,
        }
    }

    /// Base identifier of a name-like expression (`x`, `x[i]`, `x'`)
    pub fn base_name(&self) -> Option<&Name> {
        match self {
            Expression::Name(name)
            | Expression::Indexed { name, .. }
            | Expression::PrimeName { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Strip any number of enclosing parentheses
    pub fn unparen(&self) -> &Expression {
        let mut expr = self;
        while let Expression::Paren(inner) = expr {
            expr = inner;
        }
        expr
    }

    /// Literal integer value of this expression, if it has one
    pub fn as_integer(&self) -> Option<i64> {
        match self.unparen() {
            Expression::Number(v) if v.fract() == 0.0 => Some(*v as i64),
            Expression::Unary {
                op: UnaryOp::Neg,
                operand,
            } => operand.as_integer().map(|v| -v),
            _ => None,
        }
    }

    /// Binding strength of the root of this expression
    pub fn precedence(&self) -> u8 {
        match self {
            Expression::Binary { op, .. } => op.precedence(),
            Expression::Unary { .. } => 7,
            _ => 10,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Statements
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReactionOp {
    /// `->`
    Forward,
    /// `<->`
    Reversible,
    /// `<<`
    Source,
}

impl ReactionOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ReactionOp::Forward => "->",
            ReactionOp::Reversible => "<->",
            ReactionOp::Source => "<<",
        }
    }
}

fn unit_coefficient() -> u32 {
    1
}

/// One species term of a reaction, e.g. `2A` or `ca[0]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactVar {
    #[serde(default = "unit_coefficient")]
    pub coefficient: u32,
    pub name: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Box<Expression>>,
}

impl ReactVar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            coefficient: 1,
            name: Name::new(name),
            index: None,
        }
    }

    pub fn with_coefficient(coefficient: u32, name: impl Into<String>) -> Self {
        Self {
            coefficient,
            ..Self::new(name)
        }
    }

    /// Key used to look the species up among the (expanded) state variables
    pub fn key(&self) -> String {
        match &self.index {
            Some(index) => format!("{}[{}]", self.name.value, index),
            None => self.name.value.clone(),
        }
    }
}

/// `~ A + B <-> C (kf, kb)`, `~ A -> B (kf)` or `~ X << (expr)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionStatement {
    pub lhs: Vec<ReactVar>,
    pub op: ReactionOp,
    #[serde(default)]
    pub rhs: Vec<ReactVar>,
    pub rate_forward: Expression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_backward: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ModToken>,
}

/// `COMPARTMENT vol {A B}` or `COMPARTMENT i, vol[i] {ca}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compartment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<Name>,
    pub volume: Expression,
    pub species: Vec<Name>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ModToken>,
}

/// `CONSERVE A + B = total`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conserve {
    pub react: Vec<ReactVar>,
    pub expr: Expression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ModToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStatement {
    pub condition: Expression,
    pub then_block: StatementBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_block: Option<StatementBlock>,
}

/// `SOLVE states METHOD cnexp`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveStatement {
    pub block_name: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Name>,
}

/// `TABLE minf, mtau DEPEND celsius FROM -100 TO 100 WITH 200`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatement {
    pub names: Vec<Name>,
    #[serde(default)]
    pub depend: Vec<Name>,
    pub from: Expression,
    pub to: Expression,
    pub with: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Expression(Expression),
    LocalList(Vec<Name>),
    Reaction(ReactionStatement),
    Compartment(Compartment),
    Conserve(Conserve),
    If(IfStatement),
    Block(StatementBlock),
    Solve(SolveStatement),
    Table(TableStatement),
    Verbatim(String),
}

impl Statement {
    pub fn assign(lhs: Expression, rhs: Expression) -> Self {
        Statement::Expression(Expression::assign(lhs, rhs))
    }

    /// Assigned expression when the statement is `lhs = rhs`
    pub fn as_assignment(&self) -> Option<(&Expression, &Expression)> {
        match self {
            Statement::Expression(expr) => expr.as_assignment(),
            _ => None,
        }
    }

    /// `x' = f(x)` with the base name of `x`
    pub fn as_ode(&self) -> Option<(&Name, &Expression)> {
        let (lhs, rhs) = self.as_assignment()?;
        match lhs {
            Expression::PrimeName { name, .. } => Some((name, rhs)),
            _ => None,
        }
    }
}

/// A `{ ... }` body, the scope-introducing node for LOCAL declarations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatementBlock {
    pub statements: Vec<Statement>,
    #[serde(skip)]
    pub symtab: Option<SymbolTable>,
}

impl PartialEq for StatementBlock {
    fn eq(&self, other: &Self) -> bool {
        self.statements == other.statements
    }
}

impl StatementBlock {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            statements,
            symtab: None,
        }
    }

    /// Names declared by the LOCAL lists directly inside this block
    pub fn local_names(&self) -> Vec<&Name> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::LocalList(names) => Some(names.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Declare `name` in the first LOCAL list of this block, creating the
    /// list at the top of the block when there is none yet.
    pub fn add_local(&mut self, name: impl Into<String>) {
        let name = name.into();
        for statement in self.statements.iter_mut() {
            if let Statement::LocalList(names) = statement {
                if !names.iter().any(|n| n.value == name) {
                    names.push(Name::new(name));
                }
                return;
            }
        }
        self.statements
            .insert(0, Statement::LocalList(vec![Name::new(name)]));
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Blocks
// ═══════════════════════════════════════════════════════════════════════════════

/// Variable declaration inside PARAMETER, STATE or ASSIGNED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: Name,
    #[serde(default)]
    pub dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl VarDecl {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: Name::new(name),
            dimension: 0,
            value: None,
            unit: None,
        }
    }

    pub fn array(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::scalar(name)
        }
    }

    pub fn with_value(name: impl Into<String>, value: f64) -> Self {
        Self {
            value: Some(value),
            ..Self::scalar(name)
        }
    }
}

/// `USEION na READ ena WRITE ina VALENCE 1`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UseIon {
    pub ion: Name,
    #[serde(default)]
    pub read: Vec<Name>,
    #[serde(default)]
    pub write: Vec<Name>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NeuronBlock {
    pub suffix: Name,
    #[serde(default)]
    pub point_process: bool,
    #[serde(default)]
    pub range: Vec<Name>,
    #[serde(default)]
    pub global: Vec<Name>,
    #[serde(default)]
    pub ions: Vec<UseIon>,
    #[serde(default)]
    pub nonspecific_currents: Vec<Name>,
}

/// Named executable block: DERIVATIVE, KINETIC, PROCEDURE or FUNCTION
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineBlock {
    pub name: Name,
    #[serde(default)]
    pub parameters: Vec<Name>,
    pub body: StatementBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ModToken>,
}

impl RoutineBlock {
    pub fn new(name: impl Into<String>, parameters: &[&str], body: StatementBlock) -> Self {
        Self {
            name: Name::new(name),
            parameters: parameters.iter().map(|p| Name::new(*p)).collect(),
            body,
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Neuron(NeuronBlock),
    Parameter(Vec<VarDecl>),
    State(Vec<VarDecl>),
    Assigned(Vec<VarDecl>),
    Initial(StatementBlock),
    Breakpoint(StatementBlock),
    Derivative(RoutineBlock),
    Kinetic(RoutineBlock),
    Procedure(RoutineBlock),
    Function(RoutineBlock),
    Verbatim(String),
}

impl Block {
    /// NMODL keyword introducing this block
    pub fn keyword(&self) -> &'static str {
        match self {
            Block::Neuron(_) => "NEURON",
            Block::Parameter(_) => "PARAMETER",
            Block::State(_) => "STATE",
            Block::Assigned(_) => "ASSIGNED",
            Block::Initial(_) => "INITIAL",
            Block::Breakpoint(_) => "BREAKPOINT",
            Block::Derivative(_) => "DERIVATIVE",
            Block::Kinetic(_) => "KINETIC",
            Block::Procedure(_) => "PROCEDURE",
            Block::Function(_) => "FUNCTION",
            Block::Verbatim(_) => "VERBATIM",
        }
    }

    pub fn routine(&self) -> Option<&RoutineBlock> {
        match self {
            Block::Derivative(r) | Block::Kinetic(r) | Block::Procedure(r) | Block::Function(r) => {
                Some(r)
            }
            _ => None,
        }
    }

    pub fn routine_mut(&mut self) -> Option<&mut RoutineBlock> {
        match self {
            Block::Derivative(r) | Block::Kinetic(r) | Block::Procedure(r) | Block::Function(r) => {
                Some(r)
            }
            _ => None,
        }
    }

    /// Executable body of the block, if it has one
    pub fn body(&self) -> Option<&StatementBlock> {
        match self {
            Block::Initial(body) | Block::Breakpoint(body) => Some(body),
            _ => self.routine().map(|r| &r.body),
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut StatementBlock> {
        match self {
            Block::Initial(body) | Block::Breakpoint(body) => Some(body),
            _ => self.routine_mut().map(|r| &mut r.body),
        }
    }

    /// Label used in diagnostics and performance reports, e.g. `DERIVATIVE states`
    pub fn label(&self) -> String {
        match self.routine() {
            Some(r) => format!("{} {}", self.keyword(), r.name.value),
            None => self.keyword().to_string(),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Block::Procedure(_) | Block::Function(_))
    }
}

/// Root of the tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub blocks: Vec<Block>,
    #[serde(skip)]
    pub symtab: Option<SymbolTable>,
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks
    }
}

impl Program {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            symtab: None,
        }
    }

    /// Deserialize a program handed over by the external parser
    pub fn from_json(json: &str) -> Result<Self, ModlError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ModlError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn neuron(&self) -> Option<&NeuronBlock> {
        self.blocks.iter().find_map(|b| match b {
            Block::Neuron(n) => Some(n),
            _ => None,
        })
    }

    /// Mechanism suffix, `"unnamed"` when no NEURON block is present
    pub fn suffix(&self) -> &str {
        self.neuron()
            .map(|n| n.suffix.as_str())
            .unwrap_or("unnamed")
    }

    pub fn is_point_process(&self) -> bool {
        self.neuron().map(|n| n.point_process).unwrap_or(false)
    }

    /// STATE declarations in declaration order
    pub fn state_decls(&self) -> Vec<&VarDecl> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::State(decls) => Some(decls.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// PROCEDURE or FUNCTION with the given name
    pub fn callable(&self, name: &str) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.is_callable() && b.routine().map(|r| r.name.value == name) == Some(true))
    }

    pub fn derivative_block(&self, name: &str) -> Option<&RoutineBlock> {
        self.blocks.iter().find_map(|b| match b {
            Block::Derivative(r) if r.name.value == name => Some(r),
            _ => None,
        })
    }

    pub fn breakpoint(&self) -> Option<&StatementBlock> {
        self.blocks.iter().find_map(|b| match b {
            Block::Breakpoint(body) => Some(body),
            _ => None,
        })
    }

    pub fn initial(&self) -> Option<&StatementBlock> {
        self.blocks.iter().find_map(|b| match b {
            Block::Initial(body) => Some(body),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_local_creates_list_once() {
        let mut block = StatementBlock::new(vec![Statement::assign(
            Expression::name("x"),
            Expression::number(1.0),
        )]);
        block.add_local("tmp");
        block.add_local("tmp");
        block.add_local("other");

        assert!(matches!(block.statements[0], Statement::LocalList(_)));
        let locals: Vec<_> = block.local_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(locals, vec!["tmp", "other"]);
    }

    #[test]
    fn test_program_json_roundtrip_drops_symtab() {
        let mut program = Program::new(vec![Block::State(vec![VarDecl::scalar("m")])]);
        program.symtab = Some(SymbolTable::new("program"));
        let json = program.to_json().unwrap();
        let back = Program::from_json(&json).unwrap();
        assert_eq!(back, program);
        assert!(back.symtab.is_none());
    }

    #[test]
    fn test_react_var_key() {
        let mut var = ReactVar::new("ca");
        assert_eq!(var.key(), "ca");
        var.index = Some(Box::new(Expression::number(2.0)));
        assert_eq!(var.key(), "ca[2]");
    }

    #[test]
    fn test_block_label() {
        let block = Block::Derivative(RoutineBlock::new("states", &[], StatementBlock::default()));
        assert_eq!(block.label(), "DERIVATIVE states");
        assert_eq!(Block::Breakpoint(StatementBlock::default()).label(), "BREAKPOINT");
    }
}
