use std::fs;
use std::path::Path;
use std::process::Command;

use modlgen::ast::parser::parse_statements;
use modlgen::prelude::*;

fn synapse(verbatim: bool) -> Program {
    let mut blocks = vec![
        Block::Neuron(NeuronBlock {
            suffix: Name::new("syn"),
            point_process: true,
            range: vec![Name::new("gmax"), Name::new("e")],
            nonspecific_currents: vec![Name::new("i")],
            ..Default::default()
        }),
        Block::Parameter(vec![
            VarDecl::with_value("gmax", 0.01),
            VarDecl::with_value("e", 0.0),
            VarDecl::with_value("tau", 2.0),
        ]),
        Block::State(vec![VarDecl::scalar("g")]),
        Block::Assigned(vec![VarDecl::scalar("i")]),
        Block::Initial(parse_statements("g = 0").unwrap()),
        Block::Breakpoint(parse_statements("SOLVE decay METHOD cnexp\ni = gmax * g * (v - e)").unwrap()),
        Block::Derivative(RoutineBlock::new("decay", &[], parse_statements("g' = -g / tau").unwrap())),
    ];
    if verbatim {
        blocks.push(Block::Verbatim("static int calls;".into()));
    }
    Program::new(blocks)
}

fn run_pipeline(program: Program, config: PipelineConfig) -> PipelineOutput {
    Pipeline::new(config).unwrap().run(program, "syn").unwrap()
}

mod parallel_safety {
    use super::*;

    fn code(backend: Backend, prefer_atomics: bool) -> String {
        let mut config = PipelineConfig::default();
        config.codegen.backends = vec![backend];
        config.codegen.prefer_atomics = prefer_atomics;
        run_pipeline(synapse(false), config).files.remove(0).code
    }

    #[test]
    fn serial_c_updates_directly() {
        let code = code(Backend::C, false);
        assert!(code.contains("inst->vec_rhs[node_id] -= rhs;"));
    }

    #[test]
    fn openmp_uses_atomics() {
        let code = code(Backend::Omp, false);
        assert_eq!(code.matches("#pragma omp atomic update").count(), 2);
    }

    #[test]
    fn accelerators_default_to_shadow_arrays() {
        for backend in [Backend::Acc, Backend::Cuda, Backend::Ispc] {
            let code = code(backend, false);
            assert!(code.contains("inst->shadow_rhs[id - tile] = rhs;"), "{}", backend);
            assert!(code.contains("inst->vec_d[node_id] += inst->shadow_d[id - tile];"), "{}", backend);
        }
    }

    #[test]
    fn accelerators_can_prefer_atomics() {
        assert!(code(Backend::Cuda, true).contains("atomicAdd(&inst->vec_rhs[node_id], -rhs);"));
        assert!(code(Backend::Ispc, true).contains("atomic_add_global(&inst->vec_d[node_id], g);"));
        assert!(!code(Backend::Acc, true).contains("shadow"));
    }
}

mod compatibility {
    use super::*;

    #[test]
    fn verbatim_skips_cuda_and_ispc() {
        let mut config = PipelineConfig::default();
        config.codegen.backends = Backend::all().to_vec();
        let output = run_pipeline(synapse(true), config);
        let names: Vec<&str> = output.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["syn.c", "syn.omp.c", "syn.acc.c"]);
        let warnings = output.diagnostics.at_least(Severity::Warning).count();
        assert_eq!(warnings, 2);
    }

    #[test]
    fn force_emits_best_effort_code() {
        let mut config = PipelineConfig::default();
        config.codegen.backends = vec![Backend::Ispc];
        config.codegen.force = true;
        let output = run_pipeline(synapse(true), config);
        assert_eq!(output.files.len(), 1);
        assert!(output.files[0].forced);
        assert!(output.files[0].code.contains("static int calls;"));
    }
}

mod cli {
    use super::*;

    fn modlgen(dir: &Path, args: &[&str]) -> std::process::Output {
        Command::new(env!("CARGO_BIN_EXE_modlgen"))
            .current_dir(dir)
            .args(args)
            .output()
            .unwrap()
    }

    #[test]
    fn writes_transformed_model_report_and_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("syn.json"), synapse(false).to_json().unwrap()).unwrap();

        let output = modlgen(
            dir.path(),
            &["syn.json", "--backend", "c", "--backend", "cuda", "--output-dir", "out"],
        );
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

        let out = dir.path().join("out");
        for name in ["syn.transformed.mod", "syn.perf.json", "syn.c", "syn.cu"] {
            assert!(out.join(name).exists(), "{} missing", name);
        }
        let model = fs::read_to_string(out.join("syn.transformed.mod")).unwrap();
        assert!(model.contains("DERIVATIVE decay"));
        assert!(!model.contains("g'"));
    }

    #[test]
    fn dropped_statement_is_reported_once() {
        let program = Program::new(vec![
            Block::Neuron(NeuronBlock {
                suffix: Name::new("kin"),
                ..Default::default()
            }),
            Block::Parameter(vec![
                VarDecl::with_value("kf", 0.1),
                VarDecl::with_value("kb", 0.2),
                VarDecl::with_value("r", 1.0),
            ]),
            Block::State(vec![VarDecl::scalar("A"), VarDecl::scalar("B")]),
            Block::Breakpoint(parse_statements("SOLVE scheme METHOD euler").unwrap()),
            Block::Kinetic(RoutineBlock::new(
                "scheme",
                &[],
                parse_statements("~ A <-> B (kf, kb)\n~ 2A << (r)").unwrap(),
            )),
        ]);
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kin.json"), program.to_json().unwrap()).unwrap();

        let output = modlgen(dir.path(), &["kin.json"]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr
            .lines()
            .filter(|l| l.contains("single state variable"))
            .collect();
        assert_eq!(lines.len(), 1, "{}", stderr);
        assert!(lines[0].contains("KineticBlock"));
        assert!(lines[0].contains("2:3"));
    }

    #[test]
    fn single_precision_flag() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("syn.json"), synapse(false).to_json().unwrap()).unwrap();
        let output = modlgen(dir.path(), &["syn.json", "--single-precision"]);
        assert!(output.status.success());
        let code = fs::read_to_string(dir.path().join("syn.c")).unwrap();
        assert!(code.contains("float *g;"));
        assert!(code.contains("expf("));
    }

    #[test]
    fn incompatible_backend_fails_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("syn.json"), synapse(true).to_json().unwrap()).unwrap();

        let output = modlgen(dir.path(), &["syn.json", "--backend", "ispc"]);
        assert!(!output.status.success());
        assert!(!dir.path().join("syn.ispc").exists());

        let output = modlgen(dir.path(), &["syn.json", "--backend", "ispc", "--force"]);
        assert!(output.status.success());
        assert!(dir.path().join("syn.ispc").exists());
    }
}
