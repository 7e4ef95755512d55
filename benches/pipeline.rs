use criterion::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use modlgen::ast::parser::parse_statements;
use modlgen::prelude::*;

/// Linear chain of `n` states, `S0 <-> S1 <-> ... <-> S{n-1}`
fn chain(n: usize) -> Program {
    let states: Vec<VarDecl> = (0..n).map(|i| VarDecl::scalar(format!("S{}", i))).collect();
    let reactions: Vec<String> = (1..n)
        .map(|i| format!("~ S{} <-> S{} (kf, kb)", i - 1, i))
        .collect();
    Program::new(vec![
        Block::Neuron(NeuronBlock {
            suffix: Name::new("chain"),
            ..Default::default()
        }),
        Block::Parameter(vec![VarDecl::with_value("kf", 0.3), VarDecl::with_value("kb", 0.1)]),
        Block::State(states),
        Block::Breakpoint(parse_statements("SOLVE scheme METHOD euler").unwrap()),
        Block::Kinetic(RoutineBlock::new(
            "scheme",
            &[],
            parse_statements(&reactions.join("\n")).unwrap(),
        )),
    ])
}

fn transform(program: Program, backends: Vec<Backend>) {
    let mut config = PipelineConfig::default();
    config.codegen.backends = backends;
    let pipeline = Pipeline::new(config).unwrap();
    black_box(pipeline.run(program, "chain").unwrap());
}

fn criterion_benchmark(c: &mut Criterion) {
    let small = chain(8);
    let large = chain(64);
    c.bench_function("kinetic_chain_8_c", |b| {
        b.iter(|| transform(small.clone(), vec![Backend::C]))
    });
    c.bench_function("kinetic_chain_64_c", |b| {
        b.iter(|| transform(large.clone(), vec![Backend::C]))
    });
    c.bench_function("kinetic_chain_8_all_backends", |b| {
        b.iter(|| transform(small.clone(), Backend::all().to_vec()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
