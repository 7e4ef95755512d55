use approx::assert_relative_eq;
use modlgen::ast::parser::parse_statements;
use modlgen::eval::{Env, Interpreter};
use modlgen::prelude::*;

/// Sodium activation gate with its rates in a PROCEDURE
fn hh_program() -> Program {
    Program::new(vec![
        Block::Neuron(NeuronBlock {
            suffix: Name::new("hh"),
            range: vec![Name::new("gnabar")],
            ions: vec![UseIon {
                ion: Name::new("na"),
                read: vec![Name::new("ena")],
                write: vec![Name::new("ina")],
                valence: None,
            }],
            ..Default::default()
        }),
        Block::Parameter(vec![VarDecl::with_value("gnabar", 0.12)]),
        Block::State(vec![VarDecl::scalar("m")]),
        Block::Assigned(vec![
            VarDecl::scalar("ena"),
            VarDecl::scalar("ina"),
            VarDecl::scalar("minf"),
            VarDecl::scalar("mtau"),
        ]),
        Block::Initial(parse_statements("rates(v)\nm = minf").unwrap()),
        Block::Breakpoint(
            parse_statements("SOLVE states METHOD cnexp\nina = gnabar * m * m * m * (v - ena)").unwrap(),
        ),
        Block::Derivative(RoutineBlock::new(
            "states",
            &[],
            parse_statements("rates(v)\nm' = (minf - m) / mtau").unwrap(),
        )),
        Block::Procedure(RoutineBlock::new(
            "rates",
            &["vm"],
            parse_statements("minf = 1 / (1 + exp(-(vm + 40) / 10))\nmtau = 1 + vm * vm / 1000").unwrap(),
        )),
    ])
}

#[test]
fn cnexp_gate_update_matches_exact_solution() {
    let json = hh_program().to_json().unwrap();
    let output = Pipeline::default().run_json(&json, "hh").unwrap();

    let states = &output.program.derivative_block("states").unwrap().body;
    assert!(!states.to_string().contains("m'"));

    let (v, m, dt) = (-50.0_f64, 0.2, 0.025);
    let mut env = Env::with_values([("v", v), ("m", m), ("dt", dt)]);
    Interpreter::new(&output.program)
        .exec_block(states, &mut env)
        .unwrap();

    let minf = 1.0 / (1.0 + (-(v + 40.0) / 10.0).exp());
    let mtau = 1.0 + v * v / 1000.0;
    let expected = minf + (m - minf) * (-dt / mtau).exp();
    assert_relative_eq!(env.get("m").unwrap(), expected, epsilon = 1e-12);
}

#[test]
fn inlining_preserves_initial_values() {
    let original = hh_program();
    let mut config = PipelineConfig::default();
    config.codegen.backends.clear();
    let output = Pipeline::new(config).unwrap().run(hh_program(), "hh").unwrap();

    let run = |program: &Program| {
        let mut env = Env::with_values([("v", -65.0)]);
        Interpreter::new(program)
            .exec_block(program.initial().unwrap(), &mut env)
            .unwrap();
        env.get("m").unwrap()
    };
    assert_relative_eq!(run(&output.program), run(&original));
    assert!(output.files.is_empty());
}

#[test]
fn every_backend_gets_a_file() {
    let mut config = PipelineConfig::default();
    config.codegen.backends = Backend::all().to_vec();
    let output = Pipeline::new(config).unwrap().run(hh_program(), "hh").unwrap();

    let names: Vec<&str> = output.files.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(names, vec!["hh.c", "hh.omp.c", "hh.acc.c", "hh.cu", "hh.ispc"]);
    for file in &output.files {
        assert!(!file.forced);
        assert!(file.code.contains("nrn_cur_hh"), "{}", file.file_name);
        assert!(file.code.contains("nrn_state_hh"), "{}", file.file_name);
    }
}

#[test]
fn surviving_procedure_becomes_a_helper() {
    let output = Pipeline::default().run(hh_program(), "hh").unwrap();
    let code = &output.files[0].code;
    assert!(code.contains(
        "static inline void rates_hh(hh_Instance *inst, hh_Global *glob, int id, double v, double vm)"
    ));
}

#[test]
fn perf_report_counts_blocks() {
    let output = Pipeline::default().run(hh_program(), "hh").unwrap();
    let perf = output.perf.unwrap();
    assert!(perf.blocks.contains_key("BREAKPOINT"));
    assert!(perf.blocks.contains_key("DERIVATIVE states"));
    assert!(perf.total.n_mul >= 4);

    let json: serde_json::Value = serde_json::from_str(&perf.to_json().unwrap()).unwrap();
    assert!(json["blocks"]["BREAKPOINT"]["n_instance_write"].as_u64().unwrap() >= 1);
}

#[test]
fn invalid_json_is_rejected() {
    let err = Pipeline::default().run_json("{ not json", "hh").unwrap_err();
    assert!(matches!(err, ModlError::Json(_)));
}
