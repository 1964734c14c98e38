use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use tinta::{GrammarConfiguration, RawGrammar, Registry, StateStack, Theme};

const JSON_GRAMMAR: &str = r##"{
    "scopeName": "source.json",
    "patterns": [{ "include": "#value" }],
    "repository": {
        "value": {
            "patterns": [
                { "include": "#constant" },
                { "include": "#number" },
                { "include": "#string" },
                { "include": "#array" },
                { "include": "#object" }
            ]
        },
        "constant": { "match": "\\b(?:true|false|null)\\b", "name": "constant.language.json" },
        "number": { "match": "-?(?:0|[1-9]\\d*)(?:\\.\\d+)?(?:[eE][+-]?\\d+)?", "name": "constant.numeric.json" },
        "string": {
            "begin": "\"",
            "beginCaptures": { "0": { "name": "punctuation.definition.string.begin.json" } },
            "end": "\"",
            "endCaptures": { "0": { "name": "punctuation.definition.string.end.json" } },
            "name": "string.quoted.double.json",
            "patterns": [{ "match": "\\\\(?:[\"\\\\/bfnrt]|u[0-9a-fA-F]{4})", "name": "constant.character.escape.json" }]
        },
        "array": {
            "begin": "\\[",
            "end": "\\]",
            "name": "meta.structure.array.json",
            "patterns": [{ "include": "#value" }, { "match": ",", "name": "punctuation.separator.array.json" }]
        },
        "object": {
            "begin": "\\{",
            "end": "\\}",
            "name": "meta.structure.dictionary.json",
            "patterns": [
                { "include": "#string" },
                { "match": ":", "name": "punctuation.separator.dictionary.key-value.json" },
                { "include": "#value" },
                { "match": ",", "name": "punctuation.separator.dictionary.pair.json" }
            ]
        }
    }
}"##;

const JSON_INPUT: &str = r#"{
  "name": "John",
  "age": 30,
  "active": true,
  "score": 95.5,
  "tags": ["developer", "rust", "escaped \"quote\""],
  "address": null
}"#;

fn criterion_benchmark(c: &mut Criterion) {
    let mut registry = Registry::new(Theme::default());
    registry.add_grammar(RawGrammar::from_json_str(JSON_GRAMMAR).unwrap());
    let grammar = registry
        .load_grammar("source.json", GrammarConfiguration::new(1))
        .unwrap();

    c.bench_function("json tokenize_line", |b| {
        b.iter(|| {
            let mut state: Option<Arc<StateStack>> = None;
            for line in JSON_INPUT.lines() {
                let result = grammar.tokenize_line(line, state.as_ref(), None);
                state = Some(result.rule_stack);
                std::hint::black_box(result.tokens);
            }
        })
    });

    c.bench_function("json tokenize_line2", |b| {
        b.iter(|| {
            let mut state: Option<Arc<StateStack>> = None;
            for line in JSON_INPUT.lines() {
                let result = grammar.tokenize_line2(line, state.as_ref(), None);
                state = Some(result.rule_stack);
                std::hint::black_box(result.tokens);
            }
        })
    });

    c.bench_function("json load_grammar", |b| {
        b.iter(|| {
            let mut registry = Registry::new(Theme::default());
            registry.add_grammar(RawGrammar::from_json_str(JSON_GRAMMAR).unwrap());
            let grammar = registry
                .load_grammar("source.json", GrammarConfiguration::new(1))
                .unwrap();
            std::hint::black_box(grammar);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
