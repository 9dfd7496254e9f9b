use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use zkinfer::circuit::CircuitCompiler;
use zkinfer::config::PipelineConfig;
use zkinfer::model::{builtin_graph, InferenceAdapter, ModelVariant};
use zkinfer::proof::{verify, Prover, PublicValues};
use zkinfer::witness;

fn sample_input(len: usize) -> Vec<i64> {
    (0..len as i64).map(|i| (i * 97) % 256 - 128).collect()
}

fn bench_compile(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let mut group = c.benchmark_group("compile");
    for variant in ModelVariant::ALL {
        let graph = builtin_graph(variant, 1, &config.quantization);
        group.bench_with_input(BenchmarkId::from_parameter(variant), &graph, |b, graph| {
            b.iter(|| CircuitCompiler::new(&config).compile(graph).unwrap());
        });
    }
    group.finish();
}

fn bench_prove_verify(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let adapter = InferenceAdapter::new(config.quantization);
    let prover = Prover::new(config.limits);

    for variant in ModelVariant::ALL {
        let graph = builtin_graph(variant, 1, &config.quantization);
        let artifact = CircuitCompiler::new(&config).compile(&graph).unwrap();
        let input = sample_input(graph.input_len());
        let output = adapter.forward(&graph, &input).unwrap();
        let public = PublicValues::new(input.clone(), output.clone());
        let wires = u64::from(artifact.description.layout.total);

        let mut group = c.benchmark_group("prove");
        group.throughput(Throughput::Elements(wires));
        group.bench_function(BenchmarkId::from_parameter(variant), |b| {
            b.iter_batched(
                || witness::build(&artifact.description, &input, &output).unwrap(),
                |witness| {
                    prover
                        .prove(&artifact.description, &witness, &artifact.proving_key)
                        .unwrap()
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();

        let witness = witness::build(&artifact.description, &input, &output).unwrap();
        let proof = prover
            .prove(&artifact.description, &witness, &artifact.proving_key)
            .unwrap();
        c.bench_with_input(BenchmarkId::new("verify", variant), &proof, |b, proof| {
            b.iter(|| assert!(verify(proof, &public, &artifact.verification_key).unwrap()));
        });
    }
}

fn pipeline_benches(c: &mut Criterion) {
    bench_compile(c);
    bench_prove_verify(c);
}

criterion_group!(benches, pipeline_benches);
criterion_main!(benches);
