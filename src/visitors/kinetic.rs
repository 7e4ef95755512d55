//! KINETIC reaction networks to DERIVATIVE blocks
//!
//! Every reaction `i` contributes a row to the stoichiometric matrices
//! `nu_L` (reactants) and `nu_R` (products). The forward flux is the forward
//! rate times each reactant state once per unit of stoichiometry, the
//! backward flux likewise from the products. The ODE of state `j` is
//!
//! ```text
//! x_j' = sum_sources(<<) + sum_i (nu_R[i][j] - nu_L[i][j]) * (fflux[i] - bflux[i])
//! ```
//!
//! divided by the COMPARTMENT volume of `j` when one is given. States with
//! no contribution get no ODE at all.
//!
//! ```
//! use modlgen::ast::parser::parse_statements;
//! use modlgen::ast::*;
//! use modlgen::diagnostics::Diagnostics;
//! use modlgen::visitors::{KineticBlockVisitor, Pass};
//!
//! let mut program = Program::new(vec![
//!     Block::State(vec![VarDecl::scalar("A"), VarDecl::scalar("B")]),
//!     Block::Kinetic(RoutineBlock::new("kin", &[], parse_statements("~ A <-> B (kf, kb)").unwrap())),
//! ]);
//! modlgen::symtab::build(&mut program).unwrap();
//! let program = KineticBlockVisitor::new(false).run(program, &mut Diagnostics::new()).unwrap();
//! let odes = program.derivative_block("kin").unwrap().body.to_string();
//! assert!(odes.contains("A' = (-1 * (kf * A - kb * B))"));
//! assert!(odes.contains("B' = (1 * (kf * A - kb * B))"));
//! ```

use std::collections::{HashMap, HashSet};

use ndarray::Array2;

use crate::ast::walk::{nested_blocks, nested_blocks_mut, statement_exprs_mut, walk_expr_mut};
use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::error::ModlError;
use crate::symtab;
use crate::visitors::rename::all_names;
use crate::visitors::Pass;

const FORWARD_FLUX: &str = "f_flux";
const BACKWARD_FLUX: &str = "b_flux";

/// Expanded state variables: `ca[3]` becomes `ca[0]`, `ca[1]`, `ca[2]`
#[derive(Debug, Clone)]
struct StateVars {
    keys: Vec<String>,
    exprs: Vec<Expression>,
    index: HashMap<String, usize>,
    /// base name → element indices, for array states
    arrays: HashMap<String, Vec<usize>>,
}

impl StateVars {
    fn from_program(program: &Program) -> Self {
        let mut vars = StateVars {
            keys: Vec::new(),
            exprs: Vec::new(),
            index: HashMap::new(),
            arrays: HashMap::new(),
        };
        for decl in program.state_decls() {
            let base = decl.name.value.as_str();
            if decl.dimension == 0 {
                vars.push(base.to_string(), Expression::name(base));
                continue;
            }
            for k in 0..decl.dimension {
                let j = vars.keys.len();
                vars.arrays.entry(base.to_string()).or_default().push(j);
                vars.push(format!("{}[{}]", base, k), Expression::indexed(base, k));
            }
        }
        vars
    }

    fn push(&mut self, key: String, expr: Expression) {
        self.index.insert(key.clone(), self.keys.len());
        self.keys.push(key);
        self.exprs.push(expr);
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    /// `x'` or `ca'[k]` for state `j`
    fn prime(&self, j: usize) -> Expression {
        match &self.exprs[j] {
            Expression::Indexed { name, index } => Expression::PrimeName {
                name: name.clone(),
                order: 1,
                index: Some(index.clone()),
            },
            other => Expression::PrimeName {
                name: other.base_name().cloned().unwrap_or_else(|| Name::new(&self.keys[j])),
                order: 1,
                index: None,
            },
        }
    }
}

fn react_var_expr(var: &ReactVar) -> Expression {
    match &var.index {
        Some(index) => Expression::Indexed {
            name: var.name.clone(),
            index: index.clone(),
        },
        None => Expression::Name(var.name.clone()),
    }
}

fn multiply(lhs: Expression, rhs: Expression) -> Expression {
    Expression::binary(lhs, BinaryOp::Mul, rhs)
}

fn count_reactions(block: &StatementBlock) -> usize {
    block
        .statements
        .iter()
        .map(|s| match s {
            Statement::Reaction(r) if r.op != ReactionOp::Source => 1,
            _ => nested_blocks(s).into_iter().map(count_reactions).sum(),
        })
        .sum()
}

/// Stoichiometric system of one KINETIC block
struct ReactionSystem<'a> {
    states: &'a StateVars,
    nu_l: Array2<i32>,
    nu_r: Array2<i32>,
    k_f: Vec<Expression>,
    k_b: Vec<Option<Expression>>,
    fflux: Vec<Expression>,
    bflux: Vec<Option<Expression>>,
    additive: Vec<Vec<Expression>>,
    compartment: Vec<Option<Expression>>,
    /// Fluxes of the most recent reaction, substituted for `f_flux`/`b_flux`
    current_fflux: Expression,
    current_bflux: Expression,
    block: String,
}

impl<'a> ReactionSystem<'a> {
    fn new(states: &'a StateVars, n_reactions: usize, block: &str) -> Self {
        let n_states = states.len();
        Self {
            states,
            nu_l: Array2::zeros((n_reactions, n_states)),
            nu_r: Array2::zeros((n_reactions, n_states)),
            k_f: Vec::with_capacity(n_reactions),
            k_b: Vec::with_capacity(n_reactions),
            fflux: Vec::with_capacity(n_reactions),
            bflux: Vec::with_capacity(n_reactions),
            additive: vec![Vec::new(); n_states],
            compartment: vec![None; n_states],
            current_fflux: Expression::number(0.0),
            current_bflux: Expression::number(0.0),
            block: block.to_string(),
        }
    }

    fn add_source(&mut self, reaction: ReactionStatement, diagnostics: &mut Diagnostics) {
        let target = match reaction.lhs.as_slice() {
            [var] if var.coefficient == 1 => self.states.index.get(&var.key()).copied(),
            _ => None,
        };
        match target {
            Some(j) => {
                tracing::debug!(
                    block = %self.block,
                    "'<<' reaction statement: {}' += {}",
                    self.states.keys[j],
                    reaction.rate_forward
                );
                self.additive[j].push(reaction.rate_forward);
            }
            None => diagnostics.warn(
                KineticBlockVisitor::NAME,
                format!(
                    "LHS of \"<<\" reaction statement must be a single state variable, ignoring '{}'",
                    reaction
                ),
                reaction.token,
            ),
        }
    }

    fn add_reaction(&mut self, reaction: ReactionStatement) {
        let i = self.k_f.len();
        tracing::debug!(block = %self.block, "k_f[{}] = {}", i, reaction.rate_forward);

        let mut non_state_f = Vec::new();
        let mut non_state_b = Vec::new();
        for (vars, lhs) in [(&reaction.lhs, true), (&reaction.rhs, false)] {
            for var in vars.iter() {
                match self.states.index.get(&var.key()) {
                    Some(&j) => {
                        let coefficient = var.coefficient as i32;
                        if lhs {
                            self.nu_l[[i, j]] += coefficient;
                            tracing::debug!("nu_L[{}][{}] += {}", i, j, coefficient);
                        } else {
                            self.nu_r[[i, j]] += coefficient;
                            tracing::debug!("nu_R[{}][{}] += {}", i, j, coefficient);
                        }
                    }
                    None if lhs => non_state_f.push(react_var_expr(var)),
                    None => non_state_b.push(react_var_expr(var)),
                }
            }
        }

        let flux = |rate: Expression, nu: &Array2<i32>, non_state: Vec<Expression>| {
            let mut flux = rate;
            for (j, state) in self.states.exprs.iter().enumerate() {
                for _ in 0..nu[[i, j]].max(0) {
                    flux = multiply(flux, state.clone());
                }
            }
            non_state.into_iter().fold(flux, multiply)
        };
        let fflux = flux(reaction.rate_forward.clone(), &self.nu_l, non_state_f);
        let bflux = reaction
            .rate_backward
            .clone()
            .map(|kb| flux(kb, &self.nu_r, non_state_b));

        tracing::debug!(block = %self.block, "fflux[{}] = {}", i, fflux);
        if let Some(bflux) = &bflux {
            tracing::debug!(block = %self.block, "bflux[{}] = {}", i, bflux);
        }

        self.current_fflux = fflux.clone();
        self.current_bflux = bflux.clone().unwrap_or_else(|| Expression::number(0.0));
        self.k_f.push(reaction.rate_forward);
        self.k_b.push(reaction.rate_backward);
        self.fflux.push(fflux);
        self.bflux.push(bflux);
    }

    fn set_compartment(&mut self, j: usize, volume: Expression) -> Result<(), ModlError> {
        if self.compartment[j].is_some() {
            return Err(ModlError::DuplicateCompartment {
                variable: self.states.keys[j].clone(),
            });
        }
        tracing::debug!(
            block = %self.block,
            "COMPARTMENT factor {} for state var {} (index {})",
            volume,
            self.states.keys[j],
            j
        );
        self.compartment[j] = Some(volume);
        Ok(())
    }

    fn add_compartment(&mut self, compartment: Compartment, diagnostics: &mut Diagnostics) -> Result<(), ModlError> {
        for species in &compartment.species {
            let name = species.value.as_str();
            let targets: Vec<(usize, Expression)> = match (&compartment.index_name, self.states.arrays.get(name)) {
                (Some(index_name), Some(elements)) => elements
                    .iter()
                    .enumerate()
                    .map(|(k, &j)| {
                        let mut volume = compartment.volume.clone();
                        walk_expr_mut(&mut volume, &mut |e| {
                            if matches!(e, Expression::Name(n) if n.value == index_name.value) {
                                *e = Expression::number(k as f64);
                            }
                        });
                        (j, volume)
                    })
                    .collect(),
                (None, Some(elements)) => elements
                    .iter()
                    .map(|&j| (j, compartment.volume.clone()))
                    .collect(),
                (_, None) => match self.states.index.get(name) {
                    Some(&j) => vec![(j, compartment.volume.clone())],
                    None => Vec::new(),
                },
            };
            if targets.is_empty() {
                diagnostics.debug(
                    KineticBlockVisitor::NAME,
                    format!("COMPARTMENT specified volume for non-state variable {}", name),
                    species.token.or(compartment.token),
                );
            }
            for (j, volume) in targets {
                self.set_compartment(j, volume)?;
            }
        }
        Ok(())
    }

    fn substitute_fluxes(&self, statement: &mut Statement) {
        for expr in statement_exprs_mut(statement) {
            walk_expr_mut(expr, &mut |e| {
                if let Expression::Name(name) = e {
                    if name.value == FORWARD_FLUX {
                        tracing::debug!("replacing f_flux with {}", self.current_fflux);
                        *e = self.current_fflux.clone();
                    } else if name.value == BACKWARD_FLUX {
                        tracing::debug!("replacing b_flux with {}", self.current_bflux);
                        *e = self.current_bflux.clone();
                    }
                }
            });
        }
    }

    /// Record reactions, COMPARTMENT and CONSERVE statements and drop them
    /// from the block; everything else stays in document order.
    fn process(&mut self, block: &mut StatementBlock, diagnostics: &mut Diagnostics) -> Result<(), ModlError> {
        let statements = std::mem::take(&mut block.statements);
        let mut kept = Vec::with_capacity(statements.len());
        for mut statement in statements {
            match statement {
                Statement::Reaction(reaction) if reaction.op == ReactionOp::Source => {
                    self.add_source(reaction, diagnostics)
                }
                Statement::Reaction(reaction) => self.add_reaction(reaction),
                Statement::Compartment(compartment) => self.add_compartment(compartment, diagnostics)?,
                Statement::Conserve(conserve) => {
                    let text = Statement::Conserve(conserve.clone()).to_string();
                    diagnostics.debug(
                        KineticBlockVisitor::NAME,
                        format!("'{}' is not translated and was removed", text),
                        conserve.token,
                    );
                }
                _ => {
                    self.substitute_fluxes(&mut statement);
                    for nested in nested_blocks_mut(&mut statement) {
                        self.process(nested, diagnostics)?;
                    }
                    kept.push(statement);
                }
            }
        }
        block.statements = kept;
        Ok(())
    }

    /// ODE statements in state declaration order
    fn odes(&self) -> Vec<Statement> {
        let delta = &self.nu_r - &self.nu_l;
        let mut odes = Vec::new();
        for j in 0..self.states.len() {
            let mut terms: Vec<Expression> = self.additive[j]
                .iter()
                .map(|source| Expression::paren(source.clone()))
                .collect();
            for (i, fflux) in self.fflux.iter().enumerate() {
                let delta_nu = delta[[i, j]];
                if delta_nu == 0 {
                    continue;
                }
                let net = match &self.bflux[i] {
                    Some(bflux) => Expression::binary(fflux.clone(), BinaryOp::Sub, bflux.clone()),
                    None => fflux.clone(),
                };
                terms.push(Expression::paren(multiply(
                    Expression::number(delta_nu as f64),
                    Expression::paren(net),
                )));
            }
            let Some(mut rhs) = terms
                .into_iter()
                .reduce(|acc, term| Expression::binary(acc, BinaryOp::Add, term))
            else {
                continue;
            };
            if let Some(volume) = &self.compartment[j] {
                rhs = Expression::binary(
                    Expression::paren(rhs),
                    BinaryOp::Div,
                    Expression::paren(volume.clone()),
                );
            }
            let ode = Statement::assign(self.states.prime(j), rhs);
            tracing::debug!(block = %self.block, "ode : {}", ode);
            odes.push(ode);
        }
        odes
    }
}

/// Assign rate expressions to `kf<n>_`, `kb<n>_` and `source<n>_` locals
struct RateLocalizer<'a> {
    taken: &'a mut HashSet<String>,
    n_equations: usize,
    locals: Vec<String>,
}

impl RateLocalizer<'_> {
    fn local_name(&mut self, stem: &str) -> String {
        let unmangled = format!("{}{}_", stem, self.n_equations);
        let mut name = unmangled.clone();
        let mut attempt = 0;
        while self.taken.contains(&name) {
            name = format!("{}{:04}", unmangled, attempt);
            attempt += 1;
        }
        self.taken.insert(name.clone());
        self.locals.push(name.clone());
        name
    }

    fn localize(&mut self, rate: &mut Expression, stem: &str, out: &mut Vec<Statement>) {
        let name = self.local_name(stem);
        let value = std::mem::replace(rate, Expression::name(&name));
        out.push(Statement::assign(Expression::name(name), value));
    }

    fn process(&mut self, block: &mut StatementBlock) {
        let statements = std::mem::take(&mut block.statements);
        let mut rewritten = Vec::with_capacity(statements.len());
        for mut statement in statements {
            match &mut statement {
                Statement::Reaction(reaction) => {
                    if reaction.op == ReactionOp::Source {
                        self.localize(&mut reaction.rate_forward, "source", &mut rewritten);
                    } else {
                        self.localize(&mut reaction.rate_forward, "kf", &mut rewritten);
                        if let Some(kb) = reaction.rate_backward.as_mut() {
                            self.localize(kb, "kb", &mut rewritten);
                        }
                    }
                    self.n_equations += 1;
                }
                other => {
                    for nested in nested_blocks_mut(other) {
                        self.process(nested);
                    }
                }
            }
            rewritten.push(statement);
        }
        block.statements = rewritten;
    }
}

#[derive(Debug, Default)]
pub struct KineticBlockVisitor {
    localize_rates: bool,
    converted: Vec<String>,
}

impl KineticBlockVisitor {
    const NAME: &'static str = "KineticBlock";

    pub fn new(localize_rates: bool) -> Self {
        Self {
            localize_rates,
            converted: Vec::new(),
        }
    }

    /// Names of the blocks converted by the last run
    pub fn converted(&self) -> &[String] {
        &self.converted
    }

    fn transform(
        &self,
        mut routine: RoutineBlock,
        states: &StateVars,
        taken: &mut HashSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Result<RoutineBlock, ModlError> {
        let label = format!("KINETIC {}", routine.name.value);
        if self.localize_rates {
            let mut localizer = RateLocalizer {
                taken,
                n_equations: 0,
                locals: Vec::new(),
            };
            localizer.process(&mut routine.body);
            for local in localizer.locals {
                routine.body.add_local(local);
            }
        }

        let mut system = ReactionSystem::new(states, count_reactions(&routine.body), &label);
        system.process(&mut routine.body, diagnostics)?;
        let odes = system.odes();
        diagnostics.info(
            Self::NAME,
            format!("{} converted to DERIVATIVE with {} ODEs", label, odes.len()),
            routine.token,
        );
        routine.body.statements.extend(odes);
        routine.body.symtab = None;
        Ok(routine)
    }
}

impl Pass for KineticBlockVisitor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, mut program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError> {
        symtab::require(&program, self.name())?;
        let states = StateVars::from_program(&program);
        let mut taken = all_names(&program);
        self.converted.clear();

        let blocks = std::mem::take(&mut program.blocks);
        let mut converted = Vec::with_capacity(blocks.len());
        for block in blocks {
            match block {
                Block::Kinetic(routine) => {
                    self.converted.push(routine.name.value.clone());
                    let routine = self.transform(routine, &states, &mut taken, diagnostics)?;
                    converted.push(Block::Derivative(routine));
                }
                other => converted.push(other),
            }
        }
        program.blocks = converted;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::parse_statements;

    fn run(states: Vec<VarDecl>, body: &str, localize_rates: bool) -> (Result<Program, ModlError>, Diagnostics) {
        let mut program = Program::new(vec![
            Block::State(states),
            Block::Kinetic(RoutineBlock::new("kin", &[], parse_statements(body).unwrap())),
        ]);
        symtab::build(&mut program).unwrap();
        let mut diagnostics = Diagnostics::new();
        let result = KineticBlockVisitor::new(localize_rates).run(program, &mut diagnostics);
        (result, diagnostics)
    }

    fn body_lines(program: &Program) -> Vec<String> {
        program
            .derivative_block("kin")
            .unwrap()
            .body
            .statements
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn scalars(names: &[&str]) -> Vec<VarDecl> {
        names.iter().map(|n| VarDecl::scalar(*n)).collect()
    }

    #[test]
    fn test_bimolecular_reaction() {
        let (program, _) = run(scalars(&["A", "B", "C"]), "~ A + B <-> C (kf, kb)", false);
        assert_eq!(
            body_lines(&program.unwrap()),
            vec![
                "A' = (-1 * (kf * A * B - kb * C))",
                "B' = (-1 * (kf * A * B - kb * C))",
                "C' = (1 * (kf * A * B - kb * C))",
            ]
        );
    }

    #[test]
    fn test_stoichiometric_coefficients_and_forward_only() {
        let (program, _) = run(scalars(&["A", "B"]), "~ 2A -> B (k)", false);
        assert_eq!(
            body_lines(&program.unwrap()),
            vec!["A' = (-2 * (k * A * A))", "B' = (1 * (k * A * A))"]
        );
    }

    #[test]
    fn test_compartment_divides_rhs() {
        let (program, _) = run(
            scalars(&["A", "B", "C"]),
            "COMPARTMENT vol {C}\n~ A + B <-> C (kf, kb)",
            false,
        );
        let lines = body_lines(&program.unwrap());
        assert_eq!(lines[2], "C' = ((1 * (kf * A * B - kb * C))) / (vol)");
        assert_eq!(lines[0], "A' = (-1 * (kf * A * B - kb * C))");
    }

    #[test]
    fn test_source_term_and_unused_state() {
        let (program, _) = run(
            scalars(&["X", "Y", "Z"]),
            "~ X << (rate)\n~ X <-> Y (a, b)",
            false,
        );
        assert_eq!(
            body_lines(&program.unwrap()),
            vec!["X' = (rate) + (-1 * (a * X - b * Y))", "Y' = (1 * (a * X - b * Y))"]
        );
    }

    #[test]
    fn test_invalid_source_is_dropped_with_one_warning() {
        let (program, diagnostics) = run(scalars(&["X"]), "~ 2X << (rate)\n~ Q << (1)", false);
        assert!(body_lines(&program.unwrap()).is_empty());
        let warnings: Vec<_> = diagnostics
            .at_least(crate::diagnostics::Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.contains("single state variable"));
    }

    #[test]
    fn test_non_state_species_multiply_flux() {
        let (program, _) = run(scalars(&["A", "B"]), "~ A + E <-> B (kf, kb)", false);
        assert_eq!(
            body_lines(&program.unwrap())[0],
            "A' = (-1 * (kf * A * E - kb * B))"
        );
    }

    #[test]
    fn test_flux_placeholders_follow_document_order() {
        let (program, _) = run(
            scalars(&["A", "B"]),
            "x0 = f_flux\n~ A <-> B (kf, kb)\nx1 = f_flux - b_flux",
            false,
        );
        let lines = body_lines(&program.unwrap());
        assert_eq!(lines[0], "x0 = 0");
        assert_eq!(lines[1], "x1 = kf * A - kb * B");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_conserve_is_removed() {
        let (program, diagnostics) = run(
            scalars(&["A", "B"]),
            "~ A <-> B (kf, kb)\nCONSERVE A + B = 1",
            false,
        );
        let lines = body_lines(&program.unwrap());
        assert!(lines.iter().all(|l| !l.contains("CONSERVE")));
        assert!(diagnostics.iter().any(|d| d.message.contains("CONSERVE A + B = 1")));
    }

    #[test]
    fn test_array_states_and_indexed_compartment() {
        let (program, _) = run(
            vec![VarDecl::array("ca", 2)],
            "COMPARTMENT i, vol[i] {ca}\n~ ca[0] <-> ca[1] (a, b)",
            false,
        );
        assert_eq!(
            body_lines(&program.unwrap()),
            vec![
                "ca'[0] = ((-1 * (a * ca[0] - b * ca[1]))) / (vol[0])",
                "ca'[1] = ((1 * (a * ca[0] - b * ca[1]))) / (vol[1])",
            ]
        );
    }

    #[test]
    fn test_duplicate_compartment_is_fatal() {
        let (result, _) = run(scalars(&["A"]), "COMPARTMENT v1 {A}\nCOMPARTMENT v2 {A}", false);
        assert!(matches!(
            result,
            Err(ModlError::DuplicateCompartment { variable }) if variable == "A"
        ));
    }

    #[test]
    fn test_localized_rates() {
        let (program, _) = run(scalars(&["A", "B"]), "~ A <-> B (a * 2, b)\n~ A << (s)", true);
        let lines = body_lines(&program.unwrap());
        assert_eq!(lines[0], "LOCAL kf0_, kb0_, source1_");
        assert_eq!(lines[1], "kf0_ = a * 2");
        assert_eq!(lines[2], "kb0_ = b");
        assert_eq!(lines[3], "source1_ = s");
        assert_eq!(lines[4], "A' = (source1_) + (-1 * (kf0_ * A - kb0_ * B))");
    }

    #[test]
    fn test_block_keeps_name_position_and_token() {
        let mut routine = RoutineBlock::new("kin", &[], parse_statements("~ A -> B (k)").unwrap());
        routine.token = Some(ModToken::new(12, 1));
        let mut program = Program::new(vec![
            Block::State(scalars(&["A", "B"])),
            Block::Kinetic(routine),
            Block::Breakpoint(parse_statements("SOLVE kin METHOD sparse").unwrap()),
        ]);
        symtab::build(&mut program).unwrap();
        let mut pass = KineticBlockVisitor::new(false);
        let program = pass.run(program, &mut Diagnostics::new()).unwrap();
        match &program.blocks[1] {
            Block::Derivative(r) => {
                assert_eq!(r.name.value, "kin");
                assert_eq!(r.token, Some(ModToken::new(12, 1)));
            }
            other => panic!("unexpected block {:?}", other),
        }
        assert_eq!(pass.converted(), ["kin".to_string()]);
    }
}
