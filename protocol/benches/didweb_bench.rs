// Identifier codec benchmarks.
//
// Covers parsing, canonical re-encoding, resolution URL construction, and
// inbound path mapping at increasing path depths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use didsrv_protocol::didweb::DidWebUrl;

fn bench_parse(c: &mut Criterion) {
    c.bench_function("didweb/parse", |b| {
        b.iter(|| DidWebUrl::parse("did:web:example.com:accounting:john"));
    });
}

fn bench_parse_escaped(c: &mut Criterion) {
    c.bench_function("didweb/parse_escaped", |b| {
        b.iter(|| DidWebUrl::parse("did:web:localhost%3A8443:path:some%2Bsubpath"));
    });
}

fn bench_did(c: &mut Criterion) {
    let parsed = DidWebUrl::parse("did:web:example.com:path:some%2Bsubpath").unwrap();

    c.bench_function("didweb/did", |b| {
        b.iter(|| parsed.did());
    });
}

fn bench_url(c: &mut Criterion) {
    let parsed = DidWebUrl::parse("did:web:localhost%3A8443:users:alice").unwrap();

    c.bench_function("didweb/url", |b| {
        b.iter(|| parsed.url());
    });
}

fn bench_parse_path(c: &mut Criterion) {
    c.bench_function("didweb/parse_path", |b| {
        b.iter(|| DidWebUrl::parse_path("example.com/accounting/john/did.json"));
    });
}

fn bench_parse_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("didweb/parse_depth");

    for depth in [1usize, 4, 16, 64] {
        let segments: Vec<String> = (0..depth).map(|i| format!("seg{i}")).collect();
        let did = format!("did:web:example.com:{}", segments.join(":"));

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &did, |b, did| {
            b.iter(|| DidWebUrl::parse(did));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_parse_escaped,
    bench_did,
    bench_url,
    bench_parse_path,
    bench_parse_depth,
);
criterion_main!(benches);
