use criterion::{black_box, criterion_group, criterion_main, Criterion};
use docgraph::embeddings::{entity_to_text, HashEmbedder};
use docgraph::extraction::{parse_records, RelationExtractor};
use docgraph::graph::{to_graphml, DocumentGraph, Entity, GraphStatistics, IdStrategy, Relation};
use docgraph::text::Chunker;
use serde_json::{json, Map, Value};

fn sample_entities(n: usize) -> Vec<Entity> {
    (0..n)
        .map(|i| {
            Entity::new(format!("e{}", i), format!("Entity {}", i), if i % 3 == 0 { "ORGANIZATION" } else { "PERSON" })
                .with_description("Party named in the agreement")
                .with_attribute("role", "signatory")
        })
        .collect()
}

fn sample_graph(n: usize) -> DocumentGraph {
    let relations = (1..n)
        .map(|i| {
            Relation::new(format!("r{}", i), format!("e{}", i - 1), format!("e{}", i), "RELATED_TO")
                .with_attribute("start_date", "2020-01-01")
        })
        .collect();
    DocumentGraph::new(sample_entities(n), relations).expect("sample graph is valid")
}

fn chunker_benchmark(c: &mut Criterion) {
    let chunker = Chunker::new(1000, 200);
    let text = "The Rider agrees to the Terms. Uber may amend these Terms at any time. ".repeat(400);

    c.bench_function("chunker_split_long_document", |b| {
        b.iter(|| {
            let chunks = chunker.chunk(black_box(text.as_str()), "bench");
            black_box(chunks.len());
        });
    });
}

fn parsing_benchmark(c: &mut Criterion) {
    let records: Vec<Value> = (0..200)
        .map(|i| json!({"source": format!("Entity {}", i), "target": format!("Entity {}", i + 1), "relation_type": "works with"}))
        .collect();
    let raw = format!("Sure, here you go:\n```json\n{}\n```", json!({ "relations": records }));

    c.bench_function("parse_fenced_relations", |b| {
        b.iter(|| {
            let parsed = parse_records(black_box(&raw), "relations").expect("valid");
            black_box(parsed.len());
        });
    });

    let entities = sample_entities(201);
    let parsed: Vec<Map<String, Value>> = parse_records(&raw, "relations").expect("valid");
    c.bench_function("validate_relations_by_name", |b| {
        b.iter(|| {
            let batch = RelationExtractor::validate(black_box(parsed.clone()), &entities, IdStrategy::Content);
            black_box(batch.relations.len());
        });
    });
}

fn graph_benchmark(c: &mut Criterion) {
    let graph = sample_graph(500);

    c.bench_function("graph_statistics_500", |b| {
        b.iter(|| black_box(GraphStatistics::compute(black_box(&graph))));
    });
    c.bench_function("graphml_500", |b| {
        b.iter(|| black_box(to_graphml(black_box(&graph), true).len()));
    });
}

fn embedding_benchmark(c: &mut Criterion) {
    let embedder = HashEmbedder::new(384);
    let texts: Vec<String> = sample_entities(100).iter().map(entity_to_text).collect();

    c.bench_function("hash_embed_100_entities", |b| {
        b.iter(|| {
            for text in &texts {
                black_box(embedder.embed_text(black_box(text)));
            }
        });
    });
}

criterion_group!(
    benches,
    chunker_benchmark,
    parsing_benchmark,
    graph_benchmark,
    embedding_benchmark
);
criterion_main!(benches);
