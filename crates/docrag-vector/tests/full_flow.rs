use std::sync::Arc;

use docrag_core::traits::{Embedder, VectorStore};
use docrag_core::types::{Chunk, ChunkMetadata};
use docrag_embed::HashEmbedder;
use docrag_vector::{LanceVectorStore, MemoryVectorStore};

fn chunks() -> Vec<Chunk> {
    [
        "Telescopes observe distant galaxies and nebulae.",
        "Knead the dough and bake the bread in a hot oven.",
        "Routers forward packets between subnets.",
        "Mitochondria produce energy for the cell.",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| {
        let mut meta = ChunkMetadata { chunk_id: i, chunk_index: i, total_chunks: 4, source_name: "topics.txt".into(), page: 2, ..Default::default() };
        meta.extra.insert("course".into(), "GEN-100".into());
        Chunk::new(*text, meta)
    })
    .collect()
}

async fn exercise(store: &dyn VectorStore) {
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.similarity_search_with_score("anything", 3).await.unwrap().is_empty());

    let added = store.add(&chunks()).await.expect("add");
    assert_eq!(added, 4);
    assert_eq!(store.count().await.unwrap(), 4);

    let hits = store.similarity_search_with_score("mitochondria energy cell", 2).await.expect("search");
    eprintln!("hits: {:?}", hits.iter().map(|h| (&h.chunk.content, h.score)).collect::<Vec<_>>());
    assert_eq!(hits.len(), 2);
    assert!(hits[0].chunk.content.starts_with("Mitochondria"));
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].chunk.metadata.page, 2);
    assert_eq!(hits[0].chunk.metadata.extra["course"], "GEN-100");

    // appended rows keep insertion order in the snapshot
    store.add(&[Chunk::new("Bonds pay interest.", ChunkMetadata::default())]).await.unwrap();
    let snapshot = store.snapshot(100).await.unwrap();
    assert_eq!(snapshot.len(), 5);
    assert!(snapshot[0].content.starts_with("Telescopes"));
    assert_eq!(snapshot[4].content, "Bonds pay interest.");

    store.delete_collection().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.snapshot(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn lance_store_full_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));
    let store = LanceVectorStore::open(tmp.path(), "study_materials", embedder).await.expect("open");
    assert_eq!(store.collection_name(), "study_materials");
    exercise(&store).await;
}

#[tokio::test]
async fn memory_store_full_flow() {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));
    let store = MemoryVectorStore::new("scratch", embedder);
    exercise(&store).await;
}
