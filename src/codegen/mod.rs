//! Code generation for the C-like targets
//!
//! Every backend prints the same sequence of sections, in the same order:
//!
//! 1. header and includes (plus top-level VERBATIM text)
//! 2. global data structure
//! 3. per-instance data structure
//! 4. helper functions (surviving FUNCTION/PROCEDURE blocks, `nrn_current`)
//! 5. the `nrn_init`, `nrn_cur` and `nrn_state` kernels
//! 6. host/device transfer glue
//!
//! The sequence lives in [`CodegenBackend::generate`]; a backend only
//! overrides the hooks that differ for its execution model.
//!
//! # Parallel safety
//!
//! Instances of a point process may share a node, so their current
//! contributions alias the same `vec_rhs`/`vec_d` slot. See [`Accumulation`]
//! for how each backend resolves this.

pub mod acc;
pub mod c;
pub mod cuda;
pub mod info;
pub mod ispc;
pub mod omp;
pub mod printer;

pub use info::{CodegenInfo, Helper, StateUpdate, Variable};
pub use printer::{CodePrinter, Translator};

use serde::{Deserialize, Serialize};

use crate::config::CodegenConfig;
use crate::diagnostics::Diagnostics;
use crate::error::CodegenError;

const NAME: &str = "Codegen";

/// Step used for the numerical conductance `di/dv`
const DV: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    C,
    Omp,
    Acc,
    Cuda,
    Ispc,
}

impl Backend {
    pub fn all() -> [Backend; 5] {
        [
            Backend::C,
            Backend::Omp,
            Backend::Acc,
            Backend::Cuda,
            Backend::Ispc,
        ]
    }

    /// Suffix appended to the model's base name
    pub fn suffix(self) -> &'static str {
        match self {
            Backend::C => ".c",
            Backend::Omp => ".omp.c",
            Backend::Acc => ".acc.c",
            Backend::Cuda => ".cu",
            Backend::Ispc => ".ispc",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::C => "C",
            Backend::Omp => "OpenMP",
            Backend::Acc => "OpenACC",
            Backend::Cuda => "CUDA",
            Backend::Ispc => "ISPC",
        }
    }

    pub fn generator(self, config: &CodegenConfig) -> Box<dyn CodegenBackend> {
        let config = config.clone();
        match self {
            Backend::C => Box::new(c::CBackend::new(config)),
            Backend::Omp => Box::new(omp::OmpBackend::new(config)),
            Backend::Acc => Box::new(acc::AccBackend::new(config)),
            Backend::Cuda => Box::new(cuda::CudaBackend::new(config)),
            Backend::Ispc => Box::new(ispc::IspcBackend::new(config)),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Init,
    Cur,
    State,
}

impl Kernel {
    pub const ALL: [Kernel; 3] = [Kernel::Init, Kernel::Cur, Kernel::State];

    pub fn name(self, mech: &str) -> String {
        match self {
            Kernel::Init => format!("nrn_init_{}", mech),
            Kernel::Cur => format!("nrn_cur_{}", mech),
            Kernel::State => format!("nrn_state_{}", mech),
        }
    }
}

/// How `nrn_cur` adds an instance's contribution to its node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// Plain `+=`, no two instances can touch the same node concurrently
    Direct,
    /// Every update is an atomic read-modify-write
    Atomic,
    /// Contributions go to per-tile shadow arrays, reduced serially afterwards
    Shadow,
}

/// One emitted translation unit
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    pub backend: Backend,
    pub file_name: String,
    pub code: String,
    /// Emitted although the compatibility check failed
    pub forced: bool,
}

// ═════════════════════════════════════════════════════════════════════════════
// Backend hooks
// ═════════════════════════════════════════════════════════════════════════════

pub trait CodegenBackend {
    fn backend(&self) -> Backend;

    fn config(&self) -> &CodegenConfig;

    /// Constructs (as collected in [`CodegenInfo::constructs`]) the target cannot express
    fn unsupported_constructs(&self) -> &'static [&'static str] {
        &[]
    }

    fn accumulation(&self, info: &CodegenInfo) -> Accumulation {
        if !info.point_process {
            Accumulation::Direct
        } else if self.config().prefer_atomics {
            Accumulation::Atomic
        } else {
            Accumulation::Shadow
        }
    }

    /// Integer type of loop bounds shared by all lanes
    fn uniform_int(&self) -> &'static str {
        "int"
    }

    fn print_header(&self, info: &CodegenInfo, p: &mut CodePrinter) {
        p.line(format!(
            "/* {} code generated by modlgen {} for mechanism '{}' */",
            self.backend().name(),
            env!("CARGO_PKG_VERSION"),
            info.mech
        ));
        p.blank();
    }

    fn print_includes(&self, _info: &CodegenInfo, p: &mut CodePrinter) {
        p.raw("#include <math.h>");
    }

    fn print_verbatim(&self, info: &CodegenInfo, p: &mut CodePrinter) {
        for text in &info.verbatim {
            p.blank();
            for line in text.trim_matches('\n').lines() {
                p.raw(line);
            }
        }
    }

    /// Declaration of one struct member, `dimension > 0` for arrays
    fn field(&self, ty: &str, name: &str, dimension: usize) -> String {
        if dimension > 0 {
            format!("{} {}[{}];", ty, name, dimension)
        } else {
            format!("{} {};", ty, name)
        }
    }

    /// Declaration of one pointer member of the instance struct
    fn pointer_field(&self, ty: &str, name: &str, read_only: bool) -> String {
        let qualifier = if read_only { "const " } else { "" };
        format!("{}{} *{};", qualifier, ty, name)
    }

    fn print_global_struct(&self, info: &CodegenInfo, p: &mut CodePrinter) {
        let fl = info.float_type.c_name();
        p.open("typedef struct {");
        for global in &info.globals {
            p.line(self.field(fl, &global.name, global.dimension));
        }
        p.close(format!("}} {};", info.type_name("Global")));
    }

    fn print_instance_struct(&self, info: &CodegenInfo, p: &mut CodePrinter) {
        let fl = info.float_type.c_name();
        p.open("typedef struct {");
        p.line(self.field("int", "count", 0));
        p.line(self.pointer_field("int", "node_index", true));
        p.line(self.pointer_field(fl, "voltage", true));
        p.line(self.pointer_field(fl, "vec_rhs", false));
        p.line(self.pointer_field(fl, "vec_d", false));
        for variable in &info.instance {
            p.line(self.pointer_field(fl, &variable.name, variable.read_only));
        }
        if self.accumulation(info) == Accumulation::Shadow {
            p.line(format!("/* {} slots each */", self.config().tile_size));
            p.line(self.pointer_field(fl, "shadow_rhs", false));
            p.line(self.pointer_field(fl, "shadow_d", false));
        }
        p.close(format!("}} {};", info.type_name("Instance")));
    }

    /// Storage class and attributes of helper functions
    fn function_qualifier(&self) -> &'static str {
        "static inline"
    }

    /// Printed on its own line before every helper prototype
    fn helper_annotation(&self) -> Option<&'static str> {
        None
    }

    /// Parameters every helper takes before its own
    fn context_params(&self, info: &CodegenInfo) -> String {
        format!(
            "{} *inst, {} *glob, int id, {} v",
            info.type_name("Instance"),
            info.type_name("Global"),
            info.float_type.c_name()
        )
    }

    fn helper_signature(&self, info: &CodegenInfo, helper: &Helper) -> String {
        let fl = info.float_type.c_name();
        let mut params = vec![self.context_params(info)];
        params.extend(helper.parameters.iter().map(|p| format!("{} {}", fl, p)));
        format!(
            "{} {} {}_{}({})",
            self.function_qualifier(),
            if helper.is_function { fl } else { "void" },
            helper.name,
            info.mech,
            params.join(", ")
        )
    }

    fn current_signature(&self, info: &CodegenInfo) -> String {
        format!(
            "{} {} nrn_current_{}({})",
            self.function_qualifier(),
            info.float_type.c_name(),
            info.mech,
            self.context_params(info)
        )
    }

    fn print_helpers(&self, info: &CodegenInfo, p: &mut CodePrinter) -> Result<(), CodegenError> {
        let fl = info.float_type.c_name();
        let annotate = |p: &mut CodePrinter| {
            if let Some(annotation) = self.helper_annotation() {
                p.line(annotation);
            }
        };

        for helper in &info.helpers {
            annotate(p);
            p.line(format!("{};", self.helper_signature(info, helper)));
        }

        for helper in &info.helpers {
            p.blank();
            annotate(p);
            p.open(format!("{} {{", self.helper_signature(info, helper)));
            let mut translator = Translator::new(info, self.backend())
                .with_locals(helper.parameters.iter().map(String::as_str));
            if helper.is_function {
                translator = translator.in_function(&helper.name);
                p.line(format!("{} ret_{} = {};", fl, helper.name, translator.literal(0.0)));
            }
            p.open("{");
            translator.statements(&helper.body, p)?;
            p.close("}");
            if helper.is_function {
                p.line(format!("return ret_{};", helper.name));
            }
            p.close("}");
        }

        p.blank();
        annotate(p);
        p.open(format!("{} {{", self.current_signature(info)));
        let mut translator = Translator::new(info, self.backend());
        p.line(format!("{} current = {};", fl, translator.literal(0.0)));
        if let Some(breakpoint) = &info.breakpoint {
            p.open("{");
            translator.statements(breakpoint, p)?;
            p.close("}");
        }
        for current in &info.currents {
            p.line(format!("current += {};", translator.name(current)));
        }
        p.line("return current;");
        p.close("}");
        Ok(())
    }

    fn kernel_signature(&self, info: &CodegenInfo, kernel: Kernel) -> String {
        format!(
            "void {}({} *inst, {} *glob)",
            kernel.name(&info.mech),
            info.type_name("Instance"),
            info.type_name("Global")
        )
    }

    fn print_loop_begin(&self, _info: &CodegenInfo, _kernel: Kernel, start: &str, end: &str, p: &mut CodePrinter) {
        p.open(format!("for (int id = {}; id < {}; ++id) {{", start, end));
    }

    fn print_loop_end(&self, p: &mut CodePrinter) {
        p.close("}");
    }

    /// `target op= value` as one indivisible update
    fn atomic_update(&self, target: &str, op: &str, value: &str, p: &mut CodePrinter) {
        p.line(format!("{} {} {};", target, op, value));
    }

    fn print_accumulate(&self, info: &CodegenInfo, p: &mut CodePrinter) {
        match self.accumulation(info) {
            Accumulation::Direct => {
                p.line("inst->vec_rhs[node_id] -= rhs;");
                p.line("inst->vec_d[node_id] += g;");
            }
            Accumulation::Atomic => {
                self.atomic_update("inst->vec_rhs[node_id]", "-=", "rhs", p);
                self.atomic_update("inst->vec_d[node_id]", "+=", "g", p);
            }
            Accumulation::Shadow => {
                p.line("inst->shadow_rhs[id - tile] = rhs;");
                p.line("inst->shadow_d[id - tile] = g;");
            }
        }
    }

    /// Serialized pass adding one tile of shadow values into the node arrays
    fn print_shadow_reduction(&self, _info: &CodegenInfo, p: &mut CodePrinter) {
        p.open(format!(
            "for ({} id = tile; id < end; ++id) {{",
            self.uniform_int()
        ));
        p.line(format!("{} node_id = inst->node_index[id];", self.uniform_int()));
        p.line("inst->vec_rhs[node_id] -= inst->shadow_rhs[id - tile];");
        p.line("inst->vec_d[node_id] += inst->shadow_d[id - tile];");
        p.close("}");
    }

    /// Loop body shared by all targets, `id` is the instance being computed
    fn print_kernel_body(&self, info: &CodegenInfo, kernel: Kernel, p: &mut CodePrinter) -> Result<(), CodegenError> {
        let fl = info.float_type.c_name();
        let mut translator = Translator::new(info, self.backend());
        p.line("int node_id = inst->node_index[id];");
        p.line(format!("{} v = inst->voltage[node_id];", fl));
        match kernel {
            Kernel::Init => {
                if let Some(initial) = &info.initial {
                    p.open("{");
                    translator.statements(initial, p)?;
                    p.close("}");
                }
            }
            Kernel::Cur => {
                let dv = translator.literal(DV);
                p.line(format!(
                    "{} g = nrn_current_{}(inst, glob, id, v + {});",
                    fl, info.mech, dv
                ));
                p.line(format!(
                    "{} rhs = nrn_current_{}(inst, glob, id, v);",
                    fl, info.mech
                ));
                p.line(format!("g = (g - rhs) / {};", dv));
                self.print_accumulate(info, p);
            }
            Kernel::State => {
                for update in &info.state_updates {
                    match update {
                        StateUpdate::Derivative { body, .. } => {
                            p.open("{");
                            translator.derivative(body, p)?;
                            p.close("}");
                        }
                        StateUpdate::Procedure { name } => p.line(format!(
                            "{}_{}({});",
                            name,
                            info.mech,
                            Translator::context_args()
                        )),
                    }
                }
            }
        }
        Ok(())
    }

    fn print_kernel(&self, info: &CodegenInfo, kernel: Kernel, p: &mut CodePrinter) -> Result<(), CodegenError> {
        p.open(format!("{} {{", self.kernel_signature(info, kernel)));
        if kernel == Kernel::Cur && self.accumulation(info) == Accumulation::Shadow {
            let int = self.uniform_int();
            let tile = self.config().tile_size;
            p.open(format!(
                "for ({} tile = 0; tile < inst->count; tile += {}) {{",
                int, tile
            ));
            p.line(format!(
                "{} end = tile + {} < inst->count ? tile + {} : inst->count;",
                int, tile, tile
            ));
            self.print_loop_begin(info, kernel, "tile", "end", p);
            self.print_kernel_body(info, kernel, p)?;
            self.print_loop_end(p);
            self.print_shadow_reduction(info, p);
            p.close("}");
        } else {
            self.print_loop_begin(info, kernel, "0", "inst->count", p);
            self.print_kernel_body(info, kernel, p)?;
            self.print_loop_end(p);
        }
        p.close("}");
        Ok(())
    }

    /// Host/device data movement, nothing on shared-memory targets
    fn print_transfer(&self, _info: &CodegenInfo, _p: &mut CodePrinter) {}

    /// Print the whole translation unit
    fn generate(&self, info: &CodegenInfo) -> Result<String, CodegenError> {
        let mut p = CodePrinter::new();
        self.print_header(info, &mut p);
        self.print_includes(info, &mut p);
        self.print_verbatim(info, &mut p);
        p.blank();
        self.print_global_struct(info, &mut p);
        p.blank();
        self.print_instance_struct(info, &mut p);
        p.blank();
        self.print_helpers(info, &mut p)?;
        for kernel in Kernel::ALL {
            p.blank();
            self.print_kernel(info, kernel, &mut p)?;
        }
        self.print_transfer(info, &mut p);
        Ok(p.finish())
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Driver
// ═════════════════════════════════════════════════════════════════════════════

/// Constructs of `info` that `generator` cannot express
pub fn check_compatibility(generator: &dyn CodegenBackend, info: &CodegenInfo) -> Vec<String> {
    generator
        .unsupported_constructs()
        .iter()
        .filter(|c| info.constructs.contains(**c))
        .map(|c| c.to_string())
        .collect()
}

/// Check compatibility, then emit one file for `backend`.
///
/// An incompatible model is an error unless `config.force` is set, in which
/// case the code is printed anyway and a warning is recorded.
pub fn generate(
    backend: Backend,
    info: &CodegenInfo,
    config: &CodegenConfig,
    base: &str,
    diagnostics: &mut Diagnostics,
) -> Result<GeneratedFile, CodegenError> {
    let generator = backend.generator(config);
    let incompatible = check_compatibility(generator.as_ref(), info);
    let forced = !incompatible.is_empty();
    if forced {
        if !config.force {
            return Err(CodegenError::incompatible(backend.name(), incompatible));
        }
        diagnostics.warn(
            NAME,
            format!(
                "{} backend forced despite unsupported {}",
                backend.name(),
                incompatible.join(", ")
            ),
            None,
        );
    }

    let code = generator.generate(info)?;
    let file_name = format!("{}{}", base, backend.suffix());
    diagnostics.debug(
        NAME,
        format!("{} ({} lines)", file_name, code.lines().count()),
        None,
    );
    Ok(GeneratedFile {
        backend,
        file_name,
        code,
        forced,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ast::parser::parse_statements;
    use crate::ast::*;
    use crate::config::FloatType;
    use crate::symtab;
    use crate::visitors::PerfVisitor;

    /// Sodium channel with one solved gate
    pub(crate) fn model(point_process: bool, extra: Vec<Block>) -> Program {
        let mut blocks = vec![
            Block::Neuron(NeuronBlock {
                suffix: Name::new("na"),
                point_process,
                range: vec![Name::new("gbar")],
                ions: vec![UseIon {
                    ion: Name::new("na"),
                    read: vec![Name::new("ena")],
                    write: vec![Name::new("ina")],
                    valence: None,
                }],
                ..Default::default()
            }),
            Block::Parameter(vec![VarDecl::with_value("gbar", 0.12), VarDecl::with_value("tau", 2.0)]),
            Block::State(vec![VarDecl::scalar("m")]),
            Block::Assigned(vec![VarDecl::scalar("ena"), VarDecl::scalar("ina")]),
            Block::Initial(parse_statements("m = 0").unwrap()),
            Block::Breakpoint(
                parse_statements("SOLVE states METHOD euler\nina = gbar * m * (v - ena)").unwrap(),
            ),
            Block::Derivative(RoutineBlock::new(
                "states",
                &[],
                parse_statements("m' = (1 - m) / tau").unwrap(),
            )),
        ];
        blocks.extend(extra);
        let mut program = Program::new(blocks);
        symtab::build(&mut program).unwrap();
        program
    }

    pub(crate) fn info_for(program: &Program, float_type: FloatType) -> CodegenInfo {
        let mut perf = PerfVisitor::new();
        let report = perf.analyze(program).unwrap();
        CodegenInfo::new(program, report, float_type).unwrap()
    }

    #[test]
    fn test_file_names() {
        let names: Vec<String> = Backend::all()
            .iter()
            .map(|b| format!("hh{}", b.suffix()))
            .collect();
        assert_eq!(names, vec!["hh.c", "hh.omp.c", "hh.acc.c", "hh.cu", "hh.ispc"]);
    }

    #[test]
    fn test_hooks_print_in_fixed_order() {
        let info = info_for(&model(false, vec![]), FloatType::Double);
        for backend in Backend::all() {
            let code = backend.generator(&CodegenConfig::default()).generate(&info).unwrap();
            let positions: Vec<usize> = [
                "na_Global;",
                "na_Instance;",
                "nrn_current_na(",
                "nrn_init_na",
                "nrn_cur_na",
                "nrn_state_na",
            ]
            .iter()
            .map(|needle| code.find(needle).unwrap_or_else(|| panic!("{} missing {}", backend, needle)))
            .collect();
            let mut sorted = positions.clone();
            sorted.sort_unstable();
            assert_eq!(positions, sorted, "{} out of order", backend);
        }
    }

    #[test]
    fn test_incompatible_without_force_fails() {
        let program = model(false, vec![Block::Verbatim("#define EXTRA 1".into())]);
        let info = info_for(&program, FloatType::Double);
        let mut diagnostics = Diagnostics::new();
        let err = generate(Backend::Ispc, &info, &CodegenConfig::default(), "na", &mut diagnostics)
            .unwrap_err();
        assert_eq!(err, CodegenError::incompatible("ISPC", vec!["VERBATIM".into()]));

        // C accepts the same model
        let file = generate(Backend::C, &info, &CodegenConfig::default(), "na", &mut diagnostics).unwrap();
        assert!(!file.forced);
        assert!(file.code.contains("#define EXTRA 1"));
    }

    #[test]
    fn test_force_emits_with_warning() {
        let program = model(false, vec![Block::Verbatim("#define EXTRA 1".into())]);
        let info = info_for(&program, FloatType::Double);
        let config = CodegenConfig {
            force: true,
            ..Default::default()
        };
        let mut diagnostics = Diagnostics::new();
        let file = generate(Backend::Cuda, &info, &config, "na", &mut diagnostics).unwrap();
        assert!(file.forced);
        assert_eq!(file.file_name, "na.cu");
        assert_eq!(
            diagnostics
                .at_least(crate::diagnostics::Severity::Warning)
                .count(),
            1
        );
    }

    #[test]
    fn test_accumulation_policy() {
        let density = info_for(&model(false, vec![]), FloatType::Double);
        let point = info_for(&model(true, vec![]), FloatType::Double);
        let default = CodegenConfig::default();
        let atomics = CodegenConfig {
            prefer_atomics: true,
            ..Default::default()
        };

        for backend in Backend::all() {
            assert_eq!(backend.generator(&default).accumulation(&density), Accumulation::Direct);
        }
        assert_eq!(Backend::C.generator(&default).accumulation(&point), Accumulation::Direct);
        assert_eq!(Backend::Omp.generator(&default).accumulation(&point), Accumulation::Atomic);
        for backend in [Backend::Acc, Backend::Cuda, Backend::Ispc] {
            assert_eq!(backend.generator(&default).accumulation(&point), Accumulation::Shadow);
            assert_eq!(backend.generator(&atomics).accumulation(&point), Accumulation::Atomic);
        }
    }

    #[test]
    fn test_double_is_never_narrowed() {
        let info = info_for(&model(false, vec![]), FloatType::Double);
        for backend in Backend::all() {
            let code = backend.generator(&CodegenConfig::default()).generate(&info).unwrap();
            assert!(!code.contains("float"), "{} narrowed", backend);
        }
    }

    #[test]
    fn test_single_precision_everywhere() {
        let info = info_for(&model(false, vec![]), FloatType::Float);
        let code = Backend::C.generator(&CodegenConfig::default()).generate(&info).unwrap();
        assert!(code.contains("float *m;"));
        assert!(code.contains("float v = inst->voltage[node_id];"));
        assert!(code.contains("v + 0.001f"));
        assert!(!code.contains("double"));
    }
}
