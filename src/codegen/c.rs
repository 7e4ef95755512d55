//! Plain serial C

use super::{Accumulation, CodegenBackend, CodegenInfo};
use crate::config::CodegenConfig;

use super::Backend;

/// Single-threaded reference target; instances run one after the other, so
/// node updates never race.
pub struct CBackend {
    config: CodegenConfig,
}

impl CBackend {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }
}

impl CodegenBackend for CBackend {
    fn backend(&self) -> Backend {
        Backend::C
    }

    fn config(&self) -> &CodegenConfig {
        &self.config
    }

    fn accumulation(&self, _info: &CodegenInfo) -> Accumulation {
        Accumulation::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::{info_for, model};
    use crate::config::FloatType;

    fn code(point_process: bool) -> String {
        let info = info_for(&model(point_process, vec![]), FloatType::Double);
        CBackend::new(CodegenConfig::default()).generate(&info).unwrap()
    }

    #[test]
    fn test_structs() {
        let code = code(false);
        assert!(code.contains("#include <math.h>"));
        assert!(code.contains("    double tau;\n"));
        assert!(code.contains("    double dt;\n"));
        assert!(code.contains("    const int *node_index;\n"));
        assert!(code.contains("    double *ina;\n"));
        // never written by a kernel
        assert!(code.contains("    const double *gbar;\n"));
        assert!(code.contains("    const double *ena;\n"));
        assert!(!code.contains("shadow"));
    }

    #[test]
    fn test_current_kernel() {
        let code = code(false);
        assert!(code.contains("inst->ina[id] = inst->gbar[id] * inst->m[id] * (v - inst->ena[id]);"));
        assert!(code.contains("current += inst->ina[id];"));
        assert!(code.contains("double g = nrn_current_na(inst, glob, id, v + 0.001);"));
        assert!(code.contains("g = (g - rhs) / 0.001;"));
        assert!(code.contains("inst->vec_rhs[node_id] -= rhs;"));
        assert!(code.contains("inst->vec_d[node_id] += g;"));
    }

    #[test]
    fn test_point_process_stays_direct() {
        let code = code(true);
        assert!(code.contains("inst->vec_rhs[node_id] -= rhs;"));
        assert!(!code.contains("shadow"));
        assert!(!code.contains("pragma"));
    }

    #[test]
    fn test_remaining_ode_is_euler_step() {
        let code = code(false);
        assert!(code.contains("double D_m = 0.0;"));
        assert!(code.contains("D_m = (1.0 - inst->m[id]) / glob->tau;"));
        assert!(code.contains("inst->m[id] = inst->m[id] + glob->dt * D_m;"));
    }
}
