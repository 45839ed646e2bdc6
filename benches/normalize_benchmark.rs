//! Normalization Benchmarks
//!
//! Measures the per-article CPU work: cleaning, sentence splitting,
//! fingerprinting, deduplication and prompt condensing.
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::collections::HashSet;
use std::sync::Arc;

use news_pipeline::dedup::{canonicalize_url, Deduplicator};
use news_pipeline::enrich::prompt::condense;
use news_pipeline::normalize::{clean_text, Normalizer, PunktModel, SentenceTokenizer};
use news_pipeline::schemas::{ArticleCandidate, Fingerprint};

const PARAGRAPH: &str = "<p>Shares of Acme Inc. rose 4% on Tuesday after the company \
    reported record quarterly revenue.</p> <p>Analysts at J. P. Morgan said the \
    results beat expectations (consensus was $1.2bn). The stock (ACME) has gained \
    30% this year... Investors now await the Fed decision on Wednesday!</p>";

fn model() -> PunktModel {
    PunktModel::from_parts(["inc", "u.s", "dr", "mr", "j", "p"], [("u.s", "government")], ["the", "investors"])
}

fn body(paragraphs: usize) -> String {
    PARAGRAPH.repeat(paragraphs)
}

/// Benchmark HTML cleaning with different body sizes
fn bench_clean_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("clean_text");

    for paragraphs in [1, 10, 100].iter() {
        let raw = body(*paragraphs);
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(format!("paragraphs_{}", paragraphs), &raw, |b, raw| {
            b.iter(|| black_box(clean_text(raw)))
        });
    }

    group.finish();
}

/// Benchmark sentence splitting
fn bench_sentence_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentence_split");
    let model = model();

    for paragraphs in [1, 10, 100].iter() {
        let text = clean_text(&body(*paragraphs));
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(format!("paragraphs_{}", paragraphs), &text, |b, text| {
            b.iter(|| black_box(model.split(text)))
        });
    }

    group.finish();
}

/// Benchmark full article normalization
fn bench_normalize(c: &mut Criterion) {
    let tokenizer = SentenceTokenizer::from_models([("english".to_string(), model())]);
    let normalizer = Normalizer::new(Arc::new(tokenizer));
    let candidate = ArticleCandidate::new(
        "wire",
        "https://news.example.com/markets/acme?utm_source=rss&id=7#top",
        "Acme <b>beats</b> estimates",
        body(10),
    );

    c.bench_function("normalize_article", |b| {
        b.iter(|| black_box(normalizer.normalize(&candidate, "english").unwrap()))
    });
}

/// Benchmark fingerprinting and in-run deduplication
fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup");

    let text = clean_text(&body(10));
    group.bench_function("fingerprint", |b| b.iter(|| black_box(Fingerprint::of_body(&text))));

    let known: HashSet<Fingerprint> = (0..10_000)
        .map(|i| Fingerprint::of_body(&format!("known article {i}")))
        .collect();
    let fingerprints: Vec<Fingerprint> = (0..1_000)
        .map(|i| Fingerprint::of_body(&format!("incoming article {}", i % 500)))
        .collect();

    group.throughput(Throughput::Elements(fingerprints.len() as u64));
    group.bench_function("check_and_mark_1000", |b| {
        b.iter(|| {
            let dedup = Deduplicator::new(known.clone());
            let duplicates = fingerprints.iter().filter(|f| dedup.check_and_mark(f)).count();
            black_box(duplicates)
        })
    });

    group.bench_function("canonicalize_url", |b| {
        b.iter(|| {
            black_box(canonicalize_url(
                "https://News.Example.com/a/B?utm_medium=x&z=1&a=2&fbclid=abc#frag",
            ))
        })
    });

    group.finish();
}

/// Benchmark prompt condensing
fn bench_condense(c: &mut Criterion) {
    let sentences = model().split(&clean_text(&body(50)));

    c.bench_function("condense_12000", |b| {
        b.iter(|| black_box(condense(&sentences, 12_000)))
    });
}

criterion_group!(
    benches,
    bench_clean_text,
    bench_sentence_split,
    bench_normalize,
    bench_dedup,
    bench_condense,
);

criterion_main!(benches);
