//! Symbol tables for the program scope and every statement block
//!
//! Tables are owned by the scope node ([`Program`] or [`StatementBlock`]).
//! Structural passes invalidate them, so the pipeline calls [`build`] again
//! after each pass that adds or removes declarations.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::ast::walk::nested_blocks_mut;
use crate::ast::*;
use crate::error::ModlError;

/// Names every mechanism can read without declaring them
pub const BUILTINS: [&str; 4] = ["v", "t", "dt", "celsius"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    StateVar,
    Parameter,
    Assigned,
    Local,
    Argument,
    Function,
    Procedure,
    Builtin,
    Ion,
}

/// Where the value of a variable lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Storage {
    /// Block-local temporary
    Local,
    /// One value per mechanism instance (SoA array)
    Instance,
    /// One mutable value shared by all instances
    Global,
    /// Read-only shared value
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Property {
    Range,
    Global,
    ReadIon,
    WriteIon,
    Current,
    /// Global promoted to a block-local variable
    Localized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub storage: Option<Storage>,
    /// Array length, 0 for scalars
    pub dimension: usize,
    pub token: Option<ModToken>,
    pub properties: BTreeSet<Property>,
    /// Declared default value
    pub value: Option<f64>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, storage: Option<Storage>) -> Self {
        Self {
            name: name.into(),
            kind,
            storage,
            dimension: 0,
            token: None,
            properties: BTreeSet::new(),
            value: None,
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, SymbolKind::Local, Some(Storage::Local))
    }

    pub fn has(&self, property: Property) -> bool {
        self.properties.contains(&property)
    }

    pub fn is_variable(&self) -> bool {
        self.storage.is_some()
    }

    pub fn is_array(&self) -> bool {
        self.dimension > 0
    }
}

/// Insertion-ordered table of the symbols declared in one scope
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    name: String,
    symbols: Vec<Symbol>,
    index: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a symbol; returns `false` and leaves the table untouched when
    /// the name is already present.
    pub fn insert(&mut self, symbol: Symbol) -> bool {
        if self.index.contains_key(&symbol.name) {
            return false;
        }
        self.index.insert(symbol.name.clone(), self.symbols.len());
        self.symbols.push(symbol);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        match self.index.get(name) {
            Some(&i) => self.symbols.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Variables with the given storage, in declaration order
    pub fn with_storage(&self, storage: Storage) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |s| s.storage == Some(storage))
    }
}

impl fmt::Display for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SYMBOL TABLE {}", self.name)?;
        for symbol in &self.symbols {
            let storage = symbol
                .storage
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|| "-".to_string());
            let properties: Vec<String> =
                symbol.properties.iter().map(|p| format!("{:?}", p)).collect();
            writeln!(
                f,
                "  {:<16} {:<10?} {:<9} {:>3}  {}",
                symbol.name,
                symbol.kind,
                storage,
                symbol.dimension,
                properties.join(" ")
            )?;
        }
        Ok(())
    }
}

/// Stack of owned scope tables, innermost last
///
/// Passes clone the block table when they enter a block so they can keep
/// mutating the tree while resolving names.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    scopes: Vec<SymbolTable>,
}

impl ScopeStack {
    pub fn new(global: SymbolTable) -> Self {
        Self {
            scopes: vec![global],
        }
    }

    pub fn push(&mut self, table: SymbolTable) {
        self.scopes.push(table);
    }

    pub fn pop(&mut self) -> Option<SymbolTable> {
        self.scopes.pop()
    }

    /// Resolve `name`, innermost scope first
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|t| t.lookup(name))
    }

    /// Resolve `name` in every scope except the innermost one
    pub fn lookup_enclosing(&self, name: &str) -> Option<&Symbol> {
        let n = self.scopes.len().saturating_sub(1);
        self.scopes[..n].iter().rev().find_map(|t| t.lookup(name))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Building
// ═══════════════════════════════════════════════════════════════════════════════

struct NeuronInfo {
    range: HashSet<String>,
    global: HashSet<String>,
    read_ion: HashSet<String>,
    write_ion: HashSet<String>,
    currents: HashSet<String>,
}

impl NeuronInfo {
    fn from_program(program: &Program) -> Self {
        let mut info = NeuronInfo {
            range: HashSet::new(),
            global: HashSet::new(),
            read_ion: HashSet::new(),
            write_ion: HashSet::new(),
            currents: HashSet::new(),
        };
        if let Some(neuron) = program.neuron() {
            info.range = neuron.range.iter().map(|n| n.value.clone()).collect();
            info.global = neuron.global.iter().map(|n| n.value.clone()).collect();
            for ion in &neuron.ions {
                for name in &ion.read {
                    info.read_ion.insert(name.value.clone());
                }
                for name in &ion.write {
                    info.write_ion.insert(name.value.clone());
                    // ina, ik, ica, ... are currents, the concentrations are not
                    if name.value.starts_with('i') && name.value.len() > 1 {
                        info.currents.insert(name.value.clone());
                    }
                }
            }
            for name in &neuron.nonspecific_currents {
                info.currents.insert(name.value.clone());
            }
        }
        info
    }

    fn decorate(&self, symbol: &mut Symbol) {
        let name = symbol.name.as_str();
        if self.range.contains(name) {
            symbol.properties.insert(Property::Range);
        }
        if self.global.contains(name) {
            symbol.properties.insert(Property::Global);
        }
        if self.read_ion.contains(name) {
            symbol.properties.insert(Property::ReadIon);
        }
        if self.write_ion.contains(name) {
            symbol.properties.insert(Property::WriteIon);
        }
        if self.currents.contains(name) {
            symbol.properties.insert(Property::Current);
        }
    }

    fn is_instance(&self, name: &str) -> bool {
        self.range.contains(name)
            || self.read_ion.contains(name)
            || self.write_ion.contains(name)
            || self.currents.contains(name)
    }
}

fn declare(table: &mut SymbolTable, symbol: Symbol) -> Result<(), ModlError> {
    let name = symbol.name.clone();
    if !table.insert(symbol) {
        return Err(ModlError::invalid_model(format!(
            "'{}' is declared more than once",
            name
        )));
    }
    Ok(())
}

fn global_table(program: &Program) -> Result<SymbolTable, ModlError> {
    let info = NeuronInfo::from_program(program);
    let mut table = SymbolTable::new("program");

    for builtin in BUILTINS {
        let storage = if builtin == "v" {
            Storage::Instance
        } else {
            Storage::Global
        };
        table.insert(Symbol::new(builtin, SymbolKind::Builtin, Some(storage)));
    }

    for block in &program.blocks {
        let (decls, kind) = match block {
            Block::Parameter(decls) => (decls, SymbolKind::Parameter),
            Block::State(decls) => (decls, SymbolKind::StateVar),
            Block::Assigned(decls) => (decls, SymbolKind::Assigned),
            _ => continue,
        };
        for decl in decls {
            let name = decl.name.value.as_str();
            let storage = match kind {
                SymbolKind::StateVar => Storage::Instance,
                _ if info.is_instance(name) => Storage::Instance,
                _ if info.global.contains(name) => Storage::Global,
                SymbolKind::Parameter => Storage::Constant,
                _ => Storage::Instance,
            };
            let mut symbol = Symbol::new(name, kind, Some(storage));
            symbol.dimension = decl.dimension;
            symbol.token = decl.name.token;
            symbol.value = decl.value;
            info.decorate(&mut symbol);
            declare(&mut table, symbol)?;
        }
    }

    // ion variables and currents that are not declared explicitly
    if let Some(neuron) = program.neuron() {
        let listed = neuron
            .ions
            .iter()
            .flat_map(|ion| ion.read.iter().chain(ion.write.iter()))
            .chain(neuron.nonspecific_currents.iter());
        for name in listed {
            if table.contains(&name.value) {
                continue;
            }
            let mut symbol = Symbol::new(name.value.clone(), SymbolKind::Ion, Some(Storage::Instance));
            symbol.token = name.token;
            info.decorate(&mut symbol);
            table.insert(symbol);
        }
    }

    for block in &program.blocks {
        let kind = match block {
            Block::Procedure(_) => SymbolKind::Procedure,
            Block::Function(_) => SymbolKind::Function,
            _ => continue,
        };
        if let Some(routine) = block.routine() {
            let mut symbol = Symbol::new(routine.name.value.clone(), kind, None);
            symbol.token = routine.token;
            declare(&mut table, symbol)?;
        }
    }

    Ok(table)
}

fn build_block(block: &mut StatementBlock, name: &str, leading: Vec<Symbol>) {
    let mut table = SymbolTable::new(name);
    for symbol in leading {
        table.insert(symbol);
    }
    for local in block.local_names() {
        let mut symbol = Symbol::local(local.value.clone());
        symbol.token = local.token;
        table.insert(symbol);
    }
    let mut counter = 0usize;
    for statement in block.statements.iter_mut() {
        for nested in nested_blocks_mut(statement) {
            counter += 1;
            build_block(nested, &format!("{}.{}", name, counter), Vec::new());
        }
    }
    block.symtab = Some(table);
}

/// Build (or rebuild) every symbol table of the program
pub fn build(program: &mut Program) -> Result<(), ModlError> {
    let global = global_table(program)?;
    for block in program.blocks.iter_mut() {
        let label = block.label();
        let mut leading = Vec::new();
        if let Some(routine) = block.routine() {
            for parameter in &routine.parameters {
                let mut symbol =
                    Symbol::new(parameter.value.clone(), SymbolKind::Argument, Some(Storage::Local));
                symbol.token = parameter.token;
                leading.push(symbol);
            }
            if matches!(block, Block::Function(_)) {
                leading.push(Symbol::local(routine.name.value.clone()));
            }
        }
        if let Some(body) = block.body_mut() {
            build_block(body, &label, leading);
        }
    }
    program.symtab = Some(global);
    Ok(())
}

/// Global table of a program, or the error a pass reports when it is missing
pub fn require<'a>(program: &'a Program, pass: &str) -> Result<&'a SymbolTable, ModlError> {
    program
        .symtab
        .as_ref()
        .ok_or_else(|| ModlError::missing_symtab(pass, "program"))
}
