use std::sync::Arc;
use std::time::Duration;

use super::memory_harness::{
    ConceptEmbedding, FailingEmbedding, StalledEmbedding, concept_fixture, fast_timeout_config,
    hit_ids, hybrid_ids, sqlite_fixture, sqlite_with,
};
use hippocampus::MemoryConfig;
use hippocampus::error::{MemoryError, memory_error};
use hippocampus::memory::{
    FusionStrategy, Memory, MemoryLayer, NewMemory, SearchOptions, SqliteMemory,
};

async fn seed_fruit(mem: &SqliteMemory) -> (String, String, String) {
    // vector only: same topic, no shared word with the query
    let pears = mem
        .add(NewMemory::new("Orchard pears", MemoryLayer::Semantic))
        .await
        .expect("add");
    // both paths
    let harvest = mem
        .add(NewMemory::new("Apple harvest", MemoryLayer::Semantic))
        .await
        .expect("add");
    // lexical only: mentions the word, but is about databases
    let ticker = mem
        .add(NewMemory::new(
            "apple sqlite index schema query",
            MemoryLayer::Semantic,
        ))
        .await
        .expect("add");
    (pears.id, harvest.id, ticker.id)
}

#[tokio::test]
async fn writes_embed_content_when_provider_is_up() {
    let (_tmp, mem) = concept_fixture().await;
    let record = mem
        .add(NewMemory::new("rain forecast", MemoryLayer::Episodic))
        .await
        .expect("add");
    assert_eq!(record.embedding.as_deref(), Some(&[0.0, 0.0, 2.0, 0.0][..]));
    assert_eq!(record.embedding_model.as_deref(), Some("concept-v1"));
    assert_eq!(mem.stats().await.expect("stats").with_embedding, 1);
}

#[tokio::test]
async fn hybrid_search_is_a_union_of_both_paths() {
    let (_tmp, mem) = concept_fixture().await;
    let (pears, harvest, ticker) = seed_fruit(&mem).await;

    let lexical = hit_ids(
        &mem.search("apple", &SearchOptions::default())
            .await
            .expect("search"),
    );
    assert!(lexical.contains(&harvest) && lexical.contains(&ticker));
    assert!(!lexical.contains(&pears));

    let vector = hit_ids(
        &mem.search_by_vector(&ConceptEmbedding::vector("apple"), &SearchOptions::default())
            .await
            .expect("vector search"),
    );
    assert!(vector.contains(&pears) && vector.contains(&harvest));
    assert!(!vector.contains(&ticker));

    let hits = mem
        .hybrid_search("apple", &SearchOptions::default())
        .await
        .expect("hybrid");
    let ids = hybrid_ids(&hits);
    assert_eq!(ids.len(), 3);
    for id in [&pears, &harvest, &ticker] {
        assert!(ids.contains(id), "missing {id}");
    }
    // Present in both lists, so it outranks the single-path hits.
    assert_eq!(ids[0], harvest);

    let by_id = |id: &str| hits.iter().find(|h| h.record.id == id).expect("hit");
    assert!(by_id(&pears).lexical_score.is_none());
    assert!(by_id(&pears).vector_score.is_some());
    assert!(by_id(&ticker).vector_score.is_none());
    assert!(by_id(&ticker).lexical_score.is_some());
    assert!(hits.windows(2).all(|w| w[0].combined_score >= w[1].combined_score));
}

#[tokio::test]
async fn weighted_scores_follow_configured_weights() {
    let (_tmp, mem) = concept_fixture().await;
    let (pears, _, _) = seed_fruit(&mem).await;
    let hits = mem
        .hybrid_search("apple", &SearchOptions::default())
        .await
        .expect("hybrid");
    let pears_hit = hits.iter().find(|h| h.record.id == pears).expect("hit");
    // cosine 1.0 · 0.6, nothing from the lexical side
    assert!((pears_hit.combined_score - 0.6).abs() < 1e-6);
}

#[tokio::test]
async fn reciprocal_rank_fusion_keeps_the_union() {
    let config = MemoryConfig {
        fusion_strategy: FusionStrategy::ReciprocalRank,
        ..MemoryConfig::default()
    };
    let (_tmp, mem) = sqlite_with(Arc::new(ConceptEmbedding), config).await;
    let (pears, harvest, ticker) = seed_fruit(&mem).await;

    let ids = hybrid_ids(
        &mem.hybrid_search("apple", &SearchOptions::default())
            .await
            .expect("hybrid"),
    );
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], harvest);
    assert!(ids.contains(&pears) && ids.contains(&ticker));
}

async fn seed_notes(mem: &SqliteMemory) {
    for content in [
        "borrow checker notes",
        "notes about lifetimes and the borrow checker in depth",
        "meeting notes from a long and winding planning session about roadmaps",
    ] {
        mem.add(NewMemory::new(content, MemoryLayer::Episodic))
            .await
            .expect("add");
    }
}

#[tokio::test]
async fn hybrid_without_embeddings_equals_lexical_search() {
    let (_tmp, mem) = sqlite_fixture().await;
    seed_notes(&mem).await;

    let opts = SearchOptions::default();
    let lexical = hit_ids(&mem.search("borrow notes", &opts).await.expect("search"));
    let hybrid = hybrid_ids(&mem.hybrid_search("borrow notes", &opts).await.expect("hybrid"));
    assert_eq!(lexical.len(), 3);
    assert_eq!(hybrid, lexical);
}

#[tokio::test]
async fn failing_provider_degrades_silently() {
    let (_tmp, mem) = sqlite_with(Arc::new(FailingEmbedding), MemoryConfig::default()).await;
    seed_notes(&mem).await;
    assert_eq!(mem.stats().await.expect("stats").with_embedding, 0);

    let opts = SearchOptions::default();
    let lexical = hit_ids(&mem.search("borrow", &opts).await.expect("search"));
    let hybrid = hybrid_ids(&mem.hybrid_search("borrow", &opts).await.expect("hybrid"));
    assert_eq!(lexical.len(), 2);
    assert_eq!(hybrid, lexical);
}

#[tokio::test]
async fn stalled_provider_is_cut_off_by_the_timeout() {
    let (_tmp, mem) = sqlite_with(Arc::new(StalledEmbedding), fast_timeout_config()).await;

    let bounded = tokio::time::timeout(Duration::from_secs(10), async {
        mem.add(NewMemory::new("borrow checker notes", MemoryLayer::Episodic))
            .await
            .expect("add");
        mem.hybrid_search("borrow", &SearchOptions::default())
            .await
            .expect("hybrid")
    })
    .await
    .expect("timeout should bound both calls");

    assert_eq!(bounded.len(), 1);
    assert!(bounded[0].vector_score.is_none());
    assert!(bounded[0].record.embedding.is_none());
}

#[tokio::test]
async fn vector_search_applies_threshold_and_limit() {
    let (_tmp, mem) = concept_fixture().await;
    seed_fruit(&mem).await;
    mem.add(NewMemory::new("storm rain", MemoryLayer::Episodic))
        .await
        .expect("add");

    let query = ConceptEmbedding::vector("fruit");
    let hits = mem
        .search_by_vector(&query, &SearchOptions::with_limit(1))
        .await
        .expect("vector search");
    assert_eq!(hits.len(), 1);
    assert!((hits[0].score - 1.0).abs() < 1e-6);

    let loose = mem
        .search_by_vector(&query, &SearchOptions::default().similarity_threshold(0.1))
        .await
        .expect("vector search");
    assert_eq!(loose.len(), 3);
    assert!(loose.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn vector_search_rejects_malformed_vectors() {
    let (_tmp, mem) = concept_fixture().await;

    let err = mem
        .search_by_vector(&[], &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(memory_error(&err), Some(MemoryError::Validation(_))));

    let err = mem
        .search_by_vector(&[1.0, 0.0], &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(memory_error(&err), Some(MemoryError::Embedding(_))));
}

#[tokio::test]
async fn filters_restrict_every_path() {
    let (_tmp, mem) = sqlite_fixture().await;
    let tagged = mem
        .add(
            NewMemory::new("deploy checklist", MemoryLayer::Procedural)
                .with_tags(["ops"])
                .with_importance(0.9),
        )
        .await
        .expect("add");
    let other = mem
        .add(
            NewMemory::new("deploy retrospective", MemoryLayer::Reflective)
                .with_importance(0.3),
        )
        .await
        .expect("add");

    let by_tag = mem
        .search("deploy", &SearchOptions::default().tags(["OPS"]))
        .await
        .expect("search");
    assert_eq!(hit_ids(&by_tag), vec![tagged.id.clone()]);

    let by_layer = mem
        .hybrid_search("deploy", &SearchOptions::default().layer(MemoryLayer::Reflective))
        .await
        .expect("hybrid");
    assert_eq!(hybrid_ids(&by_layer), vec![other.id.clone()]);

    let by_importance = mem
        .search("deploy", &SearchOptions::default().min_importance(0.5))
        .await
        .expect("search");
    assert_eq!(hit_ids(&by_importance), vec![tagged.id.clone()]);

    let future = chrono::Utc::now() + chrono::Duration::hours(1);
    let none = mem
        .search(
            "deploy",
            &SearchOptions::default().created_between(Some(future), None),
        )
        .await
        .expect("search");
    assert!(none.is_empty());
}

#[tokio::test]
async fn query_syntax_never_reaches_fts_raw() {
    let (_tmp, mem) = sqlite_fixture().await;
    mem.add(NewMemory::new("quoted \"phrase\" here", MemoryLayer::Episodic))
        .await
        .expect("add");

    for query in ["\"", "AND OR NOT", "phrase*", "-- ;", "   "] {
        mem.search(query, &SearchOptions::default())
            .await
            .unwrap_or_else(|e| panic!("query {query:?} failed: {e:#}"));
        mem.hybrid_search(query, &SearchOptions::default())
            .await
            .unwrap_or_else(|e| panic!("hybrid {query:?} failed: {e:#}"));
    }
}

#[tokio::test]
async fn reindex_backfills_embeddings_written_while_offline() {
    let (tmp, offline) = sqlite_fixture().await;
    offline
        .add(NewMemory::new("Orchard pears", MemoryLayer::Semantic))
        .await
        .expect("add");
    offline
        .add(NewMemory::new("storm warning", MemoryLayer::Episodic))
        .await
        .expect("add");
    offline.close().await;

    let online = SqliteMemory::with_embedder(
        tmp.path(),
        Arc::new(ConceptEmbedding),
        MemoryConfig::default(),
    )
    .await
    .expect("reopen");
    assert_eq!(online.reindex().await.expect("reindex"), 2);
    assert_eq!(online.stats().await.expect("stats").with_embedding, 2);
    assert_eq!(online.reindex().await.expect("second reindex"), 0);

    let hits = online
        .search_by_vector(&ConceptEmbedding::vector("apple"), &SearchOptions::default())
        .await
        .expect("vector search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.content, "Orchard pears");
}
