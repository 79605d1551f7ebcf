use docrag_core::types::{Chunk, ChunkMetadata};
use docrag_text::KeywordIndex;

fn topics() -> Vec<Chunk> {
    [
        ("astronomy", "Telescopes observe distant galaxies, nebulae and the orbit of planets around stars."),
        ("cooking", "Knead the dough, let the bread rise, then bake the loaf in a hot oven."),
        ("networking", "Routers forward packets between subnets using TCP and IP protocols."),
        ("biology", "Mitochondria produce energy for the cell through respiration."),
        ("finance", "Bonds pay interest while stocks pay dividends to their shareholders."),
    ]
    .iter()
    .map(|(topic, text)| {
        let mut meta = ChunkMetadata { source_name: format!("{topic}.txt"), ..Default::default() };
        meta.extra.insert("topic".into(), (*topic).into());
        Chunk::new(*text, meta)
    })
    .collect()
}

#[test]
fn keyword_full_flow() {
    let index = KeywordIndex::new();
    index.index(&topics());
    assert_eq!(index.stats().documents, 5);

    for (query, topic) in [
        ("galaxies planets telescopes", "astronomy"),
        ("bake bread dough", "cooking"),
        ("routers packets TCP", "networking"),
        ("mitochondria cell respiration", "biology"),
        ("bonds dividends stocks", "finance"),
    ] {
        let results = index.search(query, 5);
        eprintln!("q='{}' -> {} hits", query, results.len());
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.metadata.extra["topic"], topic);
        for pair in results.windows(2) { assert!(pair[0].score >= pair[1].score); }
    }
}

#[test]
fn mixed_query_is_sorted_non_increasing() {
    let index = KeywordIndex::new();
    index.index(&topics());
    let results = index.search("the cell and the bread and the stars", 10);
    assert!(results.len() >= 2);
    for pair in results.windows(2) { assert!(pair[0].score >= pair[1].score); }
    assert!(results.iter().all(|r| r.score > 0.0));
}

#[test]
fn top_k_limits_results() {
    let index = KeywordIndex::new();
    index.index(&topics());
    assert_eq!(index.search("the", 1).len(), 1);
}

#[test]
fn empty_query_and_empty_index() {
    let index = KeywordIndex::new();
    assert!(index.search("anything at all", 10).is_empty());

    index.index(&topics());
    assert!(index.search("", 10).is_empty());
    assert!(index.search("   ?!  ", 10).is_empty());
    assert!(index.search("zeppelin", 10).is_empty());
}
