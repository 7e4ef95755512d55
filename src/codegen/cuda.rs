//! CUDA
//!
//! Each kernel becomes a `__global__` function over an instance range plus a
//! host launcher `nrn_<kernel>_<mech>(inst, glob, count)`. Shadow arrays are
//! reduced by a single-thread kernel launched after every tile, so the
//! reduction is serialized by the stream.

use super::{Accumulation, Backend, CodegenBackend, CodegenInfo, CodePrinter, Kernel};
use crate::config::CodegenConfig;
use crate::error::CodegenError;

pub struct CudaBackend {
    config: CodegenConfig,
}

impl CudaBackend {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }

    fn launcher_signature(&self, info: &CodegenInfo, kernel: Kernel) -> String {
        format!(
            "void {}({} *inst, {} *glob, int count)",
            kernel.name(&info.mech),
            info.type_name("Instance"),
            info.type_name("Global")
        )
    }

    fn print_launcher(&self, info: &CodegenInfo, kernel: Kernel, shadow: bool, p: &mut CodePrinter) {
        let name = kernel.name(&info.mech);
        let block = self.config.cuda_block_size;
        p.open(format!("{} {{", self.launcher_signature(info, kernel)));
        if shadow {
            let tile = self.config.tile_size;
            p.open(format!("for (int tile = 0; tile < count; tile += {}) {{", tile));
            p.line(format!("int end = tile + {} < count ? tile + {} : count;", tile, tile));
            p.line(format!("int blocks = (end - tile + {}) / {};", block - 1, block));
            p.line(format!("{}_kernel<<<blocks, {}>>>(inst, glob, tile, end);", name, block));
            p.line(format!("{}_reduce<<<1, 1>>>(inst, tile, end);", name));
            p.close("}");
        } else {
            p.line(format!("int blocks = (count + {}) / {};", block - 1, block));
            p.line(format!("{}_kernel<<<blocks, {}>>>(inst, glob, 0, count);", name, block));
        }
        p.line("cudaDeviceSynchronize();");
        p.close("}");
    }

    fn copy_line(&self, field: &str, ty: &str, read_only: bool, length: &str) -> String {
        let qualifier = if read_only { "const " } else { "" };
        format!(
            "mirror->{} = ({}{} *) nrn_cuda_copy(host->{}, {} * sizeof({}));",
            field, qualifier, ty, field, length, ty
        )
    }
}

impl CodegenBackend for CudaBackend {
    fn backend(&self) -> Backend {
        Backend::Cuda
    }

    fn config(&self) -> &CodegenConfig {
        &self.config
    }

    fn unsupported_constructs(&self) -> &'static [&'static str] {
        &["VERBATIM"]
    }

    fn print_includes(&self, _info: &CodegenInfo, p: &mut CodePrinter) {
        p.raw("#include <math.h>");
        p.raw("#include <cuda_runtime.h>");
    }

    fn function_qualifier(&self) -> &'static str {
        "static __device__ inline"
    }

    fn kernel_signature(&self, info: &CodegenInfo, kernel: Kernel) -> String {
        format!(
            "__global__ void {}_kernel({} *inst, {} *glob, int tile, int end)",
            kernel.name(&info.mech),
            info.type_name("Instance"),
            info.type_name("Global")
        )
    }

    fn print_loop_begin(&self, _info: &CodegenInfo, _kernel: Kernel, _start: &str, _end: &str, p: &mut CodePrinter) {
        p.line("int id = tile + blockIdx.x * blockDim.x + threadIdx.x;");
        p.open("if (id < end) {");
    }

    fn atomic_update(&self, target: &str, op: &str, value: &str, p: &mut CodePrinter) {
        let value = if op == "-=" {
            format!("-{}", value)
        } else {
            value.to_string()
        };
        p.line(format!("atomicAdd(&{}, {});", target, value));
    }

    fn print_kernel(&self, info: &CodegenInfo, kernel: Kernel, p: &mut CodePrinter) -> Result<(), CodegenError> {
        let shadow = kernel == Kernel::Cur && self.accumulation(info) == Accumulation::Shadow;

        p.open(format!("{} {{", self.kernel_signature(info, kernel)));
        self.print_loop_begin(info, kernel, "tile", "end", p);
        self.print_kernel_body(info, kernel, p)?;
        self.print_loop_end(p);
        p.close("}");

        if shadow {
            p.blank();
            p.open(format!(
                "__global__ void {}_reduce({} *inst, int tile, int end) {{",
                kernel.name(&info.mech),
                info.type_name("Instance")
            ));
            self.print_shadow_reduction(info, p);
            p.close("}");
        }

        p.blank();
        self.print_launcher(info, kernel, shadow, p);
        Ok(())
    }

    fn print_transfer(&self, info: &CodegenInfo, p: &mut CodePrinter) {
        let fl = info.float_type.c_name();
        let instance = info.type_name("Instance");
        let global = info.type_name("Global");

        p.blank();
        p.open("static void *nrn_cuda_copy(const void *host, size_t bytes) {");
        p.line("void *device = NULL;");
        p.line("cudaMalloc(&device, bytes);");
        p.line("cudaMemcpy(device, host, bytes, cudaMemcpyHostToDevice);");
        p.line("return device;");
        p.close("}");

        p.blank();
        p.line("/* device copy of `host`, `mirror` receives the device array pointers */");
        p.open(format!(
            "{} *nrn_cuda_instance_{}(const {} *host, int node_count, {} *mirror) {{",
            instance, info.mech, instance, instance
        ));
        p.line("int count = host->count;");
        p.line("*mirror = *host;");
        p.line(self.copy_line("node_index", "int", true, "count"));
        p.line(self.copy_line("voltage", fl, true, "node_count"));
        p.line(self.copy_line("vec_rhs", fl, false, "node_count"));
        p.line(self.copy_line("vec_d", fl, false, "node_count"));
        for variable in &info.instance {
            let length = if variable.dimension > 0 {
                format!("count*{}", variable.dimension)
            } else {
                "count".to_string()
            };
            p.line(self.copy_line(&variable.name, fl, variable.read_only, &length));
        }
        if self.accumulation(info) == Accumulation::Shadow {
            let tile = self.config.tile_size;
            p.line(format!("cudaMalloc((void **) &mirror->shadow_rhs, {} * sizeof({}));", tile, fl));
            p.line(format!("cudaMalloc((void **) &mirror->shadow_d, {} * sizeof({}));", tile, fl));
        }
        p.line(format!("return ({} *) nrn_cuda_copy(mirror, sizeof({}));", instance, instance));
        p.close("}");

        p.blank();
        p.open(format!(
            "{} *nrn_cuda_global_{}(const {} *host) {{",
            global, info.mech, global
        ));
        p.line(format!("return ({} *) nrn_cuda_copy(host, sizeof({}));", global, global));
        p.close("}");

        p.blank();
        p.open(format!(
            "void nrn_cuda_update_host_{}({} *host, const {} *mirror, int node_count) {{",
            info.mech, instance, instance
        ));
        p.line("int count = host->count;");
        let mut writable = vec![
            ("vec_rhs".to_string(), "node_count".to_string()),
            ("vec_d".to_string(), "node_count".to_string()),
        ];
        for variable in info.instance.iter().filter(|v| !v.read_only) {
            let length = if variable.dimension > 0 {
                format!("count*{}", variable.dimension)
            } else {
                "count".to_string()
            };
            writable.push((variable.name.clone(), length));
        }
        for (field, length) in writable {
            p.line(format!(
                "cudaMemcpy(host->{}, mirror->{}, {} * sizeof({}), cudaMemcpyDeviceToHost);",
                field, field, length, fl
            ));
        }
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
        CudaBackend::new(config).generate(&info).unwrap()
    }

    #[test]
    fn test_kernels_and_launchers() {
        let code = code(false, CodegenConfig::default());
        assert!(code.contains(
            "__global__ void nrn_state_na_kernel(na_Instance *inst, na_Global *glob, int tile, int end) {"
        ));
        assert!(code.contains("int id = tile + blockIdx.x * blockDim.x + threadIdx.x;"));
        assert!(code.contains("void nrn_state_na(na_Instance *inst, na_Global *glob, int count) {"));
        assert!(code.contains("nrn_state_na_kernel<<<blocks, 128>>>(inst, glob, 0, count);"));
        assert!(code.contains("static __device__ inline double nrn_current_na("));
        assert!(!code.contains("_reduce"));
    }

    #[test]
    fn test_point_process_reduces_serially() {
        let config = CodegenConfig {
            cuda_block_size: 32,
            ..Default::default()
        };
        let code = code(true, config);
        assert!(code.contains("__global__ void nrn_cur_na_reduce(na_Instance *inst, int tile, int end) {"));
        assert!(code.contains("nrn_cur_na_kernel<<<blocks, 32>>>(inst, glob, tile, end);"));
        assert!(code.contains("nrn_cur_na_reduce<<<1, 1>>>(inst, tile, end);"));
        assert!(code.contains("cudaMalloc((void **) &mirror->shadow_rhs, 128 * sizeof(double));"));
        assert!(!code.contains("atomicAdd"));
    }

    #[test]
    fn test_prefer_atomics() {
        let config = CodegenConfig {
            prefer_atomics: true,
            ..Default::default()
        };
        let code = code(true, config);
        assert!(code.contains("atomicAdd(&inst->vec_rhs[node_id], -rhs);"));
        assert!(code.contains("atomicAdd(&inst->vec_d[node_id], g);"));
    }

    #[test]
    fn test_transfer_copies_writable_data_back() {
        let code = code(false, CodegenConfig::default());
        assert!(code.contains("mirror->gbar = (const double *) nrn_cuda_copy(host->gbar, count * sizeof(double));"));
        assert!(code.contains("cudaMemcpy(host->ina, mirror->ina, count * sizeof(double), cudaMemcpyDeviceToHost);"));
        assert!(!code.contains("cudaMemcpy(host->gbar"));
    }
}
