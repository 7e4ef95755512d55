//! Transformation and analysis passes
//!
//! Each pass takes the program by value and hands back the rewritten tree,
//! so the pipeline never holds on to a tree a later pass already consumed.
//!
//! | Pass | Effect |
//! |------|--------|
//! | [`LocalVarRenameVisitor`] | rename locals shadowing outer names |
//! | [`InlineVisitor`] | splice FUNCTION/PROCEDURE bodies into their callers |
//! | [`KineticBlockVisitor`] | KINETIC reaction network → DERIVATIVE ODEs |
//! | [`SolveBlockVisitor`] | integrate ODEs selected by `SOLVE ... METHOD` |
//! | [`LocalizeVisitor`] | demote write-before-read globals to LOCALs |
//! | [`PerfVisitor`] | classify memory accesses and count operations |

pub mod defuse;
pub mod inline;
pub mod kinetic;
pub mod local_var_rename;
pub mod localize;
pub mod perf;
pub mod rename;
pub mod solver;

pub use inline::InlineVisitor;
pub use kinetic::KineticBlockVisitor;
pub use local_var_rename::LocalVarRenameVisitor;
pub use localize::LocalizeVisitor;
pub use perf::{PerfReport, PerfStat, PerfVisitor};
pub use rename::{NameGenerator, RenameVisitor};
pub use solver::{CommandSolver, NativeSolver, SolveBlockVisitor, SymbolicSolver};

use crate::ast::Program;
use crate::diagnostics::Diagnostics;
use crate::error::ModlError;

/// A single step of the pipeline
pub trait Pass {
    /// Name used to tag diagnostics
    fn name(&self) -> &'static str;

    fn run(&mut self, program: Program, diagnostics: &mut Diagnostics) -> Result<Program, ModlError>;
}
