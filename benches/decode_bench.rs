//! Benchmarks for decoding with a small attachment-ambiguous grammar.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lexparse::{Decoder, RuleGrammar, Settings, Side};

/// NP and VP both accept PP modifiers, so every added PP doubles the
/// attachment ambiguity.
fn build_grammar(settings: &Settings) -> RuleGrammar {
    let mut grammar = RuleGrammar::new(settings);
    grammar
        .lexical("the", "DT", 1.0)
        .unwrap()
        .lexical("man", "NN", 0.3)
        .unwrap()
        .lexical("dog", "NN", 0.3)
        .unwrap()
        .lexical("telescope", "NN", 0.3)
        .unwrap()
        .lexical("saw", "VBD", 0.8)
        .unwrap()
        .lexical("saw", "NN", 0.1)
        .unwrap()
        .lexical("with", "IN", 1.0)
        .unwrap()
        .unary("NN", "NP", &["DT"], &[], 0.9)
        .unwrap()
        .unary("VBD", "VP", &[], &["NP"], 0.8)
        .unwrap()
        .unary("IN", "PP", &[], &["NP"], 1.0)
        .unwrap()
        .unary("VP", "S", &["NP"], &[], 0.9)
        .unwrap()
        .modifier("NP", "NN", "DT", Side::Left, 0.8)
        .unwrap()
        .modifier("NP", "NN", "PP", Side::Right, 0.3)
        .unwrap()
        .modifier("VP", "VBD", "NP", Side::Right, 0.7)
        .unwrap()
        .modifier("VP", "VBD", "PP", Side::Right, 0.3)
        .unwrap()
        .modifier("PP", "IN", "NP", Side::Right, 0.9)
        .unwrap()
        .modifier("S", "VP", "NP", Side::Left, 0.9)
        .unwrap()
        .top("S", 1.0)
        .unwrap();
    grammar
}

fn sentence(num_pps: usize) -> Vec<&'static str> {
    let mut words = vec!["the", "man", "saw", "the", "dog"];
    for _ in 0..num_pps {
        words.extend(["with", "the", "telescope"]);
    }
    words
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for num_pps in [1, 3, 5] {
        let settings = Settings::default();
        let mut decoder = Decoder::new(build_grammar(&settings), settings).unwrap();
        let words = sentence(num_pps);

        group.bench_with_input(BenchmarkId::from_parameter(words.len()), &words, |b, words| {
            b.iter(|| decoder.parse(black_box(words), None).unwrap())
        });
    }
    group.finish();
}

fn bench_decode_cell_limit(c: &mut Criterion) {
    let settings = Settings {
        cell_limit: 5,
        ..Settings::default()
    };
    let mut decoder = Decoder::new(build_grammar(&settings), settings).unwrap();
    let words = sentence(5);

    c.bench_function("decode_cell_limit_5", |b| {
        b.iter(|| decoder.parse(black_box(&words), None).unwrap())
    });
}

criterion_group!(benches, bench_decode, bench_decode_cell_limit);
criterion_main!(benches);
