//! Everything a backend needs to know about a finished model
//!
//! Collected once per model from the transformed program and its
//! [`PerfReport`], then shared by all backends.

use std::collections::BTreeSet;

use crate::ast::walk::nested_blocks;
use crate::ast::*;
use crate::config::FloatType;
use crate::error::ModlError;
use crate::symtab::{self, Property, Storage, SymbolKind, SymbolTable};
use crate::visitors::PerfReport;

/// A variable stored in the global or instance struct
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    /// Array length, 0 for scalars
    pub dimension: usize,
    /// Declared default
    pub value: Option<f64>,
    /// Never written by any kernel
    pub read_only: bool,
}

/// A block integrated by `nrn_state`
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// DERIVATIVE block, already solved or left with ODEs
    Derivative { name: String, body: StatementBlock },
    /// `SOLVE proc` just calls the procedure every step
    Procedure { name: String },
}

/// A FUNCTION or PROCEDURE emitted as a helper
#[derive(Debug, Clone, PartialEq)]
pub struct Helper {
    pub name: String,
    pub is_function: bool,
    pub parameters: Vec<String>,
    pub body: StatementBlock,
}

#[derive(Debug, Clone)]
pub struct CodegenInfo {
    /// Mechanism suffix used in every generated identifier
    pub mech: String,
    pub point_process: bool,
    pub float_type: FloatType,
    pub globals: Vec<Variable>,
    pub instance: Vec<Variable>,
    pub states: Vec<Variable>,
    pub currents: Vec<String>,
    pub helpers: Vec<Helper>,
    pub initial: Option<StatementBlock>,
    pub breakpoint: Option<StatementBlock>,
    pub state_updates: Vec<StateUpdate>,
    /// Top-level VERBATIM text
    pub verbatim: Vec<String>,
    /// Constructs present in the model that some targets cannot express
    pub constructs: BTreeSet<String>,
    pub symbols: SymbolTable,
}

fn variable(symbol: &symtab::Symbol, report: &PerfReport) -> Variable {
    Variable {
        name: symbol.name.clone(),
        dimension: symbol.dimension,
        value: symbol.value,
        read_only: !report.is_written(&symbol.name),
    }
}

fn scan_constructs(block: &StatementBlock, constructs: &mut BTreeSet<String>) {
    for statement in &block.statements {
        match statement {
            Statement::Verbatim(_) => {
                constructs.insert("VERBATIM".to_string());
            }
            Statement::Table(_) => {
                constructs.insert("TABLE".to_string());
            }
            _ => {}
        }
        for nested in nested_blocks(statement) {
            scan_constructs(nested, constructs);
        }
    }
}

impl CodegenInfo {
    pub fn new(program: &Program, report: &PerfReport, float_type: FloatType) -> Result<Self, ModlError> {
        let symbols = symtab::require(program, "Codegen")?.clone();

        let globals = symbols
            .iter()
            .filter(|s| matches!(s.storage, Some(Storage::Global | Storage::Constant)))
            .map(|s| variable(s, report))
            .collect();
        let instance = symbols
            .with_storage(Storage::Instance)
            .filter(|s| s.name != "v")
            .map(|s| variable(s, report))
            .collect();
        let states = symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::StateVar)
            .map(|s| variable(s, report))
            .collect();
        let currents = symbols
            .iter()
            .filter(|s| s.has(Property::Current))
            .map(|s| s.name.clone())
            .collect();

        let helpers = program
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::Function(r) | Block::Procedure(r) => Some(Helper {
                    name: r.name.value.clone(),
                    is_function: matches!(b, Block::Function(_)),
                    parameters: r.parameters.iter().map(|p| p.value.clone()).collect(),
                    body: r.body.clone(),
                }),
                _ => None,
            })
            .collect();

        let mut state_updates = Vec::new();
        if let Some(breakpoint) = program.breakpoint() {
            let mut solves = Vec::new();
            collect_solves(breakpoint, &mut solves);
            for name in solves {
                if let Some(block) = program.derivative_block(&name) {
                    state_updates.push(StateUpdate::Derivative {
                        name,
                        body: block.body.clone(),
                    });
                } else if program.callable(&name).is_some() {
                    state_updates.push(StateUpdate::Procedure { name });
                } else {
                    return Err(ModlError::unresolved("Codegen", name, None));
                }
            }
        }

        let mut constructs = BTreeSet::new();
        let mut verbatim = Vec::new();
        for block in &program.blocks {
            match block {
                Block::Verbatim(text) => {
                    verbatim.push(text.clone());
                    constructs.insert("VERBATIM".to_string());
                }
                other => {
                    if let Some(body) = other.body() {
                        scan_constructs(body, &mut constructs);
                    }
                }
            }
        }

        Ok(Self {
            mech: program.suffix().to_string(),
            point_process: program.is_point_process(),
            float_type,
            globals,
            instance,
            states,
            currents,
            helpers,
            initial: program.initial().cloned(),
            breakpoint: program.breakpoint().cloned(),
            state_updates,
            verbatim,
            constructs,
            symbols,
        })
    }

    pub fn helper(&self, name: &str) -> Option<&Helper> {
        self.helpers.iter().find(|h| h.name == name)
    }

    pub fn storage(&self, name: &str) -> Option<Storage> {
        self.symbols.lookup(name).and_then(|s| s.storage)
    }

    pub fn dimension(&self, name: &str) -> usize {
        self.symbols.lookup(name).map(|s| s.dimension).unwrap_or(0)
    }

    /// `hh_Instance`, `hh_Global`, ...
    pub fn type_name(&self, kind: &str) -> String {
        format!("{}_{}", self.mech, kind)
    }
}

fn collect_solves(block: &StatementBlock, out: &mut Vec<String>) {
    for statement in &block.statements {
        if let Statement::Solve(solve) = statement {
            if !out.contains(&solve.block_name.value) {
                out.push(solve.block_name.value.clone());
            }
        }
        for nested in nested_blocks(statement) {
            collect_solves(nested, out);
        }
    }
}
