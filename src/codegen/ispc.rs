//! ISPC
//!
//! Kernels are `export` functions over `foreach` gangs. Structs are reached
//! through `uniform` pointers; per-instance values are varying.

use super::{Backend, CodegenBackend, CodegenInfo, CodePrinter, Kernel};
use crate::config::CodegenConfig;

pub struct IspcBackend {
    config: CodegenConfig,
}

impl IspcBackend {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }

    fn struct_params(&self, info: &CodegenInfo) -> String {
        format!(
            "uniform {} * uniform inst, uniform {} * uniform glob",
            info.type_name("Instance"),
            info.type_name("Global")
        )
    }
}

impl CodegenBackend for IspcBackend {
    fn backend(&self) -> Backend {
        Backend::Ispc
    }

    fn config(&self) -> &CodegenConfig {
        &self.config
    }

    fn unsupported_constructs(&self) -> &'static [&'static str] {
        &["VERBATIM", "TABLE"]
    }

    fn uniform_int(&self) -> &'static str {
        "uniform int"
    }

    fn print_includes(&self, _info: &CodegenInfo, _p: &mut CodePrinter) {}

    fn pointer_field(&self, ty: &str, name: &str, read_only: bool) -> String {
        let qualifier = if read_only { "const " } else { "" };
        format!("{}uniform {} * uniform {};", qualifier, ty, name)
    }

    fn context_params(&self, info: &CodegenInfo) -> String {
        format!(
            "{}, int id, {} v",
            self.struct_params(info),
            info.float_type.c_name()
        )
    }

    fn kernel_signature(&self, info: &CodegenInfo, kernel: Kernel) -> String {
        format!(
            "export void {}({})",
            kernel.name(&info.mech),
            self.struct_params(info)
        )
    }

    fn print_loop_begin(&self, _info: &CodegenInfo, _kernel: Kernel, start: &str, end: &str, p: &mut CodePrinter) {
        p.open(format!("foreach (id = {} ... {}) {{", start, end));
    }

    fn atomic_update(&self, target: &str, op: &str, value: &str, p: &mut CodePrinter) {
        let value = if op == "-=" {
            format!("-{}", value)
        } else {
            value.to_string()
        };
        p.line(format!("atomic_add_global(&{}, {});", target, value));
    }
}
