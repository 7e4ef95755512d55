//! OpenACC offload
//!
//! The data structures are copied to the device once with
//! `nrn_acc_copyin_<mech>`; every kernel then runs with `present` clauses.
//! Point-process currents go through shadow arrays unless atomics are
//! preferred.

use super::{Backend, CodegenBackend, CodegenInfo, CodePrinter, Kernel};
use crate::config::CodegenConfig;

const PRESENT: &str = "present(inst[0:1], glob[0:1])";

pub struct AccBackend {
    config: CodegenConfig,
}

impl AccBackend {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }

    /// `inst->x[0:n]` sections for every array reachable from the instance struct
    fn sections(&self, info: &CodegenInfo, writable_only: bool) -> Vec<String> {
        let mut sections = Vec::new();
        if !writable_only {
            sections.push("inst->node_index[0:count]".to_string());
            sections.push("inst->voltage[0:node_count]".to_string());
        }
        sections.push("inst->vec_rhs[0:node_count]".to_string());
        sections.push("inst->vec_d[0:node_count]".to_string());
        for variable in &info.instance {
            if writable_only && variable.read_only {
                continue;
            }
            let length = if variable.dimension > 0 {
                format!("count*{}", variable.dimension)
            } else {
                "count".to_string()
            };
            sections.push(format!("inst->{}[0:{}]", variable.name, length));
        }
        if !writable_only && self.accumulation(info) == super::Accumulation::Shadow {
            let tile = self.config.tile_size;
            sections.push(format!("inst->shadow_rhs[0:{}]", tile));
            sections.push(format!("inst->shadow_d[0:{}]", tile));
        }
        sections
    }

    fn transfer_signature(&self, info: &CodegenInfo, name: &str) -> String {
        format!(
            "void nrn_acc_{}_{}({} *inst, {} *glob, int node_count)",
            name,
            info.mech,
            info.type_name("Instance"),
            info.type_name("Global")
        )
    }
}

impl CodegenBackend for AccBackend {
    fn backend(&self) -> Backend {
        Backend::Acc
    }

    fn config(&self) -> &CodegenConfig {
        &self.config
    }

    fn print_includes(&self, _info: &CodegenInfo, p: &mut CodePrinter) {
        p.raw("#include <math.h>");
        p.raw("#include <openacc.h>");
    }

    fn helper_annotation(&self) -> Option<&'static str> {
        Some("#pragma acc routine seq")
    }

    fn print_loop_begin(&self, _info: &CodegenInfo, _kernel: Kernel, start: &str, end: &str, p: &mut CodePrinter) {
        p.line(format!("#pragma acc parallel loop {}", PRESENT));
        p.open(format!("for (int id = {}; id < {}; ++id) {{", start, end));
    }

    fn atomic_update(&self, target: &str, op: &str, value: &str, p: &mut CodePrinter) {
        p.line("#pragma acc atomic update");
        p.line(format!("{} {} {};", target, op, value));
    }

    fn print_shadow_reduction(&self, _info: &CodegenInfo, p: &mut CodePrinter) {
        p.line("#pragma acc serial loop seq present(inst[0:1])");
        p.open("for (int id = tile; id < end; ++id) {");
        p.line("int node_id = inst->node_index[id];");
        p.line("inst->vec_rhs[node_id] -= inst->shadow_rhs[id - tile];");
        p.line("inst->vec_d[node_id] += inst->shadow_d[id - tile];");
        p.close("}");
    }

    fn print_transfer(&self, info: &CodegenInfo, p: &mut CodePrinter) {
        let all = self.sections(info, false).join(", ");
        let writable = self.sections(info, true).join(", ");

        p.blank();
        p.open(format!("{} {{", self.transfer_signature(info, "copyin")));
        p.line("int count = inst->count;");
        p.line("#pragma acc enter data copyin(inst[0:1], glob[0:1])");
        p.line(format!("#pragma acc enter data copyin({})", all));
        p.close("}");

        p.blank();
        p.open(format!("{} {{", self.transfer_signature(info, "update_host")));
        p.line("int count = inst->count;");
        p.line(format!("#pragma acc update self({})", writable));
        p.close("}");

        p.blank();
        p.open(format!("{} {{", self.transfer_signature(info, "delete")));
        p.line("int count = inst->count;");
        p.line(format!("#pragma acc exit data delete({})", all));
        p.line("#pragma acc exit data delete(inst[0:1], glob[0:1])");
        p.close("}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::{info_for, model};
    use crate::config::FloatType;

    fn code(point_process: bool, config: CodegenConfig) -> String {
        let info = info_for(&model(point_process, vec![]), FloatType::Double);
        AccBackend::new(config).generate(&info).unwrap()
    }

    #[test]
    fn test_kernels_use_present_data() {
        let code = code(false, CodegenConfig::default());
        assert_eq!(
            code.matches("#pragma acc parallel loop present(inst[0:1], glob[0:1])").count(),
            3
        );
        assert!(code.contains("#pragma acc routine seq\nstatic inline double nrn_current_na("));
    }

    #[test]
    fn test_point_process_uses_shadow_tiles() {
        let config = CodegenConfig {
            tile_size: 64,
            ..Default::default()
        };
        let code = code(true, config);
        assert!(code.contains("double *shadow_rhs;"));
        assert!(code.contains("for (int tile = 0; tile < inst->count; tile += 64) {"));
        assert!(code.contains("inst->shadow_rhs[id - tile] = rhs;"));
        assert!(code.contains("#pragma acc serial loop seq present(inst[0:1])"));
        assert!(code.contains("inst->vec_rhs[node_id] -= inst->shadow_rhs[id - tile];"));
        assert!(code.contains("inst->shadow_rhs[0:64]"));
        assert!(!code.contains("atomic"));
    }

    #[test]
    fn test_prefer_atomics() {
        let config = CodegenConfig {
            prefer_atomics: true,
            ..Default::default()
        };
        let code = code(true, config);
        assert!(code.contains("#pragma acc atomic update\n"));
        assert!(!code.contains("shadow"));
    }

    #[test]
    fn test_transfer_glue() {
        let code = code(false, CodegenConfig::default());
        assert!(code.contains("void nrn_acc_copyin_na(na_Instance *inst, na_Global *glob, int node_count) {"));
        assert!(code.contains("inst->ina[0:count]"));
        // read-only data is never copied back
        let update = code
            .lines()
            .find(|l| l.contains("acc update self"))
            .unwrap();
        assert!(update.contains("inst->m[0:count]"));
        assert!(!update.contains("inst->gbar"));
    }
}
