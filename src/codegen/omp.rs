//! OpenMP: the C kernels with a parallel instance loop

use super::{Accumulation, Backend, CodegenBackend, CodegenInfo, CodePrinter, Kernel};
use crate::config::CodegenConfig;

pub struct OmpBackend {
    config: CodegenConfig,
}

impl OmpBackend {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }
}

impl CodegenBackend for OmpBackend {
    fn backend(&self) -> Backend {
        Backend::Omp
    }

    fn config(&self) -> &CodegenConfig {
        &self.config
    }

    /// Threads share node arrays, point processes always update atomically
    fn accumulation(&self, info: &CodegenInfo) -> Accumulation {
        if info.point_process {
            Accumulation::Atomic
        } else {
            Accumulation::Direct
        }
    }

    fn print_includes(&self, _info: &CodegenInfo, p: &mut CodePrinter) {
        p.raw("#include <math.h>");
        p.raw("#include <omp.h>");
    }

    fn print_loop_begin(&self, _info: &CodegenInfo, _kernel: Kernel, start: &str, end: &str, p: &mut CodePrinter) {
        p.line("#pragma omp parallel for");
        p.open(format!("for (int id = {}; id < {}; ++id) {{", start, end));
    }

    fn atomic_update(&self, target: &str, op: &str, value: &str, p: &mut CodePrinter) {
        p.line("#pragma omp atomic update");
        p.line(format!("{} {} {};", target, op, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::{info_for, model};
    use crate::config::FloatType;

    fn code(point_process: bool) -> String {
        let info = info_for(&model(point_process, vec![]), FloatType::Double);
        OmpBackend::new(CodegenConfig::default()).generate(&info).unwrap()
    }

    #[test]
    fn test_every_kernel_is_parallel() {
        let code = code(false);
        assert!(code.contains("#include <omp.h>"));
        assert_eq!(code.matches("#pragma omp parallel for").count(), 3);
        assert!(!code.contains("atomic"));
    }

    #[test]
    fn test_point_process_updates_atomically() {
        let code = code(true);
        let expected = "\
        #pragma omp atomic update
        inst->vec_rhs[node_id] -= rhs;
        #pragma omp atomic update
        inst->vec_d[node_id] += g;
";
        assert!(code.contains(expected), "{}", code);
    }
}
