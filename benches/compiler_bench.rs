use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use t2sc::id::NameAllocator;
use t2sc::ir::Stmt;
use t2sc::pass::PassId;
use t2sc::pipeline::{run_pipeline, CompilationState, PipelineOptions};
use t2sc::struct_type::StructRegistry;
use t2sc::*;

// KPI-aligned benchmark scenarios.

/// `n_stages` producer/consumer pairs. Each pair moves one gathered array
/// (promotable) and two scalar streams (combinable).
fn generate_loop_nest(n_stages: usize, extent: usize) -> String {
    let mut src = String::new();
    for s in 0..n_stages {
        src.push_str(&format!(
            r#"
realize g{s}.channel<int32>([0, {extent}]) {{
realize a{s}.channel<int32>([0, 2]) {{
realize b{s}.channel<int32>([0, 2]) {{
  produce P{s} {{
    for (P{s}.s0.gather_iii, 0, {extent}) {{
      for (P{s}.s0.iii, 0, {extent}) {{
        if (P{s}.s0.gather_iii == P{s}.s0.iii) {{
          write_channel("g{s}.channel", P{s}.s0.iii, P{s}.s0.iii)
        }}
      }}
    }}
    for (P{s}.s0.k, 0, {extent}) {{
      write_channel("a{s}.channel", P{s}.s0.k)
      write_channel("b{s}.channel", P{s}.s0.k * 2)
    }}
  }}
  produce C{s} {{
    for (C{s}.s0.iii, 0, {extent}) {{
      C{s}(C{s}.s0.iii) = read_channel("g{s}.channel", C{s}.s0.iii)
    }}
    for (C{s}.s0.k, 0, {extent}) {{
      C{s}(C{s}.s0.k) = read_channel("a{s}.channel") + read_channel("b{s}.channel")
    }}
  }}
}}
}}
}}
"#
        ));
    }
    src
}

fn parsed(source: &str) -> Stmt {
    parser::parse(source)
        .stmt
        .expect("benchmark scenario must parse")
}

// KPI: parse latency vs number of stages.
fn bench_kpi_parse_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/parse_scaling");

    for n_stages in [1_usize, 10, 50] {
        let source = generate_loop_nest(n_stages, 16);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}stages", n_stages)),
            &source,
            |b, source| {
                b.iter(|| {
                    let r = parser::parse(black_box(source.as_str()));
                    black_box(&r.stmt);
                });
            },
        );
    }

    group.finish();
}

// KPI: per-pass latency on a non-trivial loop nest.
fn bench_kpi_phase_latency(c: &mut Criterion) {
    let input = parsed(&generate_loop_nest(20, 16));

    {
        let mut group = c.benchmark_group("kpi/phase_latency/promote");
        group.bench_function("20stages", |b| {
            b.iter(|| {
                let analysis = promotion::analyze_promotion(black_box(&input))
                    .expect("promotion analysis");
                let out = promotion::promote_channels(&input, &analysis.plan)
                    .expect("promotion rewrite");
                black_box(out);
            });
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("kpi/phase_latency/combine");
        group.bench_function("20stages", |b| {
            b.iter_batched(
                || (NameAllocator::new(), StructRegistry::new()),
                |(mut names, mut structs)| {
                    let analysis =
                        combine::analyze_combination(black_box(&input), &mut names, &mut structs)
                            .expect("combination analysis");
                    let out = combine::combine_channels(&input, &analysis.plan)
                        .expect("combination rewrite");
                    black_box(out);
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }
}

// KPI: full pipeline latency vs number of stages.
fn bench_kpi_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/full_pipeline");
    let options = PipelineOptions::default();

    for n_stages in [1_usize, 10, 50] {
        let input = parsed(&generate_loop_nest(n_stages, 16));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}stages", n_stages)),
            &input,
            |b, input| {
                b.iter_batched(
                    || CompilationState::new(input.clone()),
                    |mut state| {
                        run_pipeline(&mut state, PassId::Combine, &options, |_, _| {})
                            .expect("pipeline");
                        black_box(state.output().clone());
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_parse_scaling,
    bench_kpi_phase_latency,
    bench_kpi_full_pipeline,
);
criterion_main!(benches);
