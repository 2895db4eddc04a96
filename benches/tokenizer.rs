use std::fs;

use criterion::{Criterion, criterion_group, criterion_main};
use tmline::themes::RawTheme;
use tmline::{Registry, StateStack};

fn get_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .add_grammar_from_path("src/fixtures/grammars/mini.json")
        .unwrap();
    registry
        .add_grammar_from_path("src/fixtures/grammars/todo.json")
        .unwrap();
    let theme = RawTheme::load_from_file("src/fixtures/themes/mini-dark.json")
        .unwrap()
        .compile()
        .unwrap();
    registry.set_theme(theme);
    registry
}

fn criterion_benchmark(c: &mut Criterion) {
    let registry = get_registry();
    let grammar = registry.grammar("source.mini").unwrap();
    let sample = fs::read_to_string("src/fixtures/samples/sample.mini").unwrap();
    let lines: Vec<&str> = sample.lines().collect();

    c.bench_function("mini tokenization", |b| {
        b.iter(|| {
            let mut state: Option<StateStack> = None;
            for line in &lines {
                let result = grammar
                    .tokenize_line(line, state.as_ref())
                    .expect("Tokenization should succeed");
                state = Some(result.rule_stack);
                std::hint::black_box(result.tokens);
            }
        })
    });

    c.bench_function("mini binary tokenization", |b| {
        b.iter(|| {
            let mut state: Option<StateStack> = None;
            for line in &lines {
                let result = grammar
                    .tokenize_line_binary(line, state.as_ref())
                    .expect("Tokenization should succeed");
                state = Some(result.rule_stack);
                std::hint::black_box(result.tokens);
            }
        })
    });

    // re-tokenizing a line with the state of the previous one, what editors do on every keystroke
    let long_line = "let total = compute(1, 2, 3) // ".repeat(20);
    let prev = grammar.tokenize_line("{", None).unwrap().rule_stack;
    c.bench_function("long line in a block", |b| {
        b.iter(|| {
            let result = grammar
                .tokenize_line(&long_line, Some(&prev))
                .expect("Tokenization should succeed");
            std::hint::black_box(result);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
