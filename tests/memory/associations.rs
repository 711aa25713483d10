use super::memory_harness::{sqlite_fixture, system_fixture};
use chrono::{Duration, Utc};
use hippocampus::memory::{
    AssociationType, EncodingContext, Memory, MemoryLayer, NewMemory,
};

async fn pair(mem: &dyn Memory) -> (String, String) {
    let a = mem
        .add(NewMemory::new("first endpoint", MemoryLayer::Semantic))
        .await
        .expect("add");
    let b = mem
        .add(NewMemory::new("second endpoint", MemoryLayer::Semantic))
        .await
        .expect("add");
    (a.id, b.id)
}

#[tokio::test]
async fn associate_twice_keeps_one_edge_with_latest_strength() {
    let (_tmp, mem) = sqlite_fixture().await;
    let (a, b) = pair(&mem).await;

    assert!(mem.associate(&a, &b, 0.4, AssociationType::Causal).await.expect("first"));
    assert!(mem.associate(&a, &b, 0.9, AssociationType::Causal).await.expect("second"));

    let edges = mem.associations_for(&a).await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert!((edges[0].strength - 0.9).abs() < f64::EPSILON);
    assert_eq!(mem.stats().await.expect("stats").associations, 1);

    // Reversed endpoints hit the same edge.
    assert!(mem.associate(&b, &a, 0.2, AssociationType::Causal).await.expect("reversed"));
    let edges = mem.associations_for(&b).await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert!((edges[0].strength - 0.2).abs() < f64::EPSILON);
}

#[tokio::test]
async fn each_type_is_its_own_edge() {
    let (_tmp, mem) = sqlite_fixture().await;
    let (a, b) = pair(&mem).await;
    mem.associate(&a, &b, 0.5, AssociationType::Temporal)
        .await
        .expect("temporal");
    mem.associate(&a, &b, 0.7, AssociationType::Hierarchical)
        .await
        .expect("hierarchical");
    assert_eq!(mem.associations_for(&a).await.expect("edges").len(), 2);
}

#[tokio::test]
async fn strength_is_clamped() {
    let (_tmp, mem) = sqlite_fixture().await;
    let (a, b) = pair(&mem).await;
    mem.associate(&a, &b, 3.0, AssociationType::Similar)
        .await
        .expect("associate");
    let edges = mem.associations_for(&a).await.expect("edges");
    assert!((edges[0].strength - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn missing_or_deleted_endpoint_returns_false() {
    let (_tmp, mem) = sqlite_fixture().await;
    let (a, b) = pair(&mem).await;

    assert!(!mem.associate(&a, "ghost", 0.5, AssociationType::Similar).await.expect("ghost"));
    assert!(!mem.associate(&a, &a, 0.5, AssociationType::Similar).await.expect("self"));

    mem.delete(&b).await.expect("delete");
    assert!(!mem.associate(&a, &b, 0.5, AssociationType::Similar).await.expect("deleted"));
    assert_eq!(mem.stats().await.expect("stats").associations, 0);
}

#[tokio::test]
async fn get_associated_orders_by_strength_and_skips_deleted() {
    let (_tmp, mem) = sqlite_fixture().await;
    let hub = mem
        .add(NewMemory::new("hub", MemoryLayer::Semantic))
        .await
        .expect("add");
    let mut spokes = Vec::new();
    for (content, strength) in [("weak", 0.2), ("strong", 0.9), ("middle", 0.5)] {
        let spoke = mem
            .add(NewMemory::new(content, MemoryLayer::Semantic))
            .await
            .expect("add");
        mem.associate(&hub.id, &spoke.id, strength, AssociationType::Thematic)
            .await
            .expect("associate");
        spokes.push(spoke);
    }

    let linked = mem.get_associated(&hub.id).await.expect("associated");
    let contents: Vec<&str> = linked.iter().map(|(r, _)| r.content.as_str()).collect();
    assert_eq!(contents, vec!["strong", "middle", "weak"]);

    let hub_now = mem.peek(&hub.id).await.expect("peek").expect("present");
    assert_eq!(hub_now.related_ids.len(), 3);
    let spoke_now = mem.peek(&spokes[0].id).await.expect("peek").expect("present");
    assert_eq!(spoke_now.related_ids, vec![hub.id.clone()]);

    mem.delete(&spokes[1].id).await.expect("delete");
    let linked = mem.get_associated(&hub.id).await.expect("associated");
    let contents: Vec<&str> = linked.iter().map(|(r, _)| r.content.as_str()).collect();
    assert_eq!(contents, vec!["middle", "weak"]);
}

#[tokio::test]
async fn emotional_success_is_encoded_above_routine_content() {
    let (_tmp, _store, system) = system_fixture().await;
    let ctx = EncodingContext::default();
    let a = system.self_referential_encode(
        "I successfully fixed the critical bug",
        MemoryLayer::Episodic,
        &ctx,
    );
    let b = system.self_referential_encode("Routine status check", MemoryLayer::Episodic, &ctx);
    assert!(a.importance > b.importance);
    assert_eq!(a.layer, MemoryLayer::Episodic);
    assert_eq!(b.layer, MemoryLayer::Episodic);
}

#[tokio::test]
async fn unrelated_records_apart_in_time_stay_unlinked() {
    let (_tmp, store, system) = system_fixture().await;
    let ctx = EncodingContext::default();

    let b_decision =
        system.self_referential_encode("Routine status check", MemoryLayer::Episodic, &ctx);
    let b = store
        .add(
            b_decision
                .into_new_memory("Routine status check", &[])
                .with_created_at(Utc::now() - Duration::days(3)),
        )
        .await
        .expect("add b");
    let a_decision = system.self_referential_encode(
        "I successfully fixed the critical bug",
        MemoryLayer::Episodic,
        &ctx,
    );
    let a = store
        .add(a_decision.into_new_memory("I successfully fixed the critical bug", &[]))
        .await
        .expect("add a");

    let report = system.auto_associate(&a.id, None).await.expect("auto associate");
    assert_eq!(report.total(), 0);
    assert!(store.get_associated(&a.id).await.expect("associated").is_empty());
    assert!(store.get_associated(&b.id).await.expect("associated").is_empty());
}

#[tokio::test]
async fn same_day_records_get_a_temporal_edge() {
    let (_tmp, store, system) = system_fixture().await;
    let b = store
        .add(NewMemory::new("Routine status check", MemoryLayer::Episodic).with_importance(0.69))
        .await
        .expect("add b");
    let a = store
        .add(
            NewMemory::new("I successfully fixed the critical bug", MemoryLayer::Episodic)
                .with_importance(0.96)
                .with_emotional_weight(4.0 / 3.0),
        )
        .await
        .expect("add a");

    let report = system.auto_associate(&a.id, None).await.expect("auto associate");
    assert_eq!(report.temporal, 1);
    assert_eq!(report.similar, 0);

    let edges = store.associations_for(&a.id).await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].association_type, AssociationType::Temporal);
    assert!((edges[0].strength - 0.5).abs() < f64::EPSILON);
    assert_eq!(edges[0].other_end(&a.id), b.id);

    // Linking again does not duplicate anything.
    let again = system.auto_associate(&a.id, None).await.expect("again");
    assert_eq!(again.total(), 0);
    assert_eq!(store.associations_for(&a.id).await.expect("edges").len(), 1);
}

#[tokio::test]
async fn shared_tag_gives_a_thematic_edge_across_days() {
    let (_tmp, store, system) = system_fixture().await;
    let old = store
        .add(
            NewMemory::new("Routine status check", MemoryLayer::Episodic)
                .with_tags(["oncall"])
                .with_importance(0.2)
                .with_created_at(Utc::now() - Duration::days(3)),
        )
        .await
        .expect("add old");
    let new = store
        .add(
            NewMemory::new("Pager rotation handover", MemoryLayer::Semantic)
                .with_tags(["oncall", "team"])
                .with_importance(0.9),
        )
        .await
        .expect("add new");

    let report = system.auto_associate(&new.id, None).await.expect("auto associate");
    assert_eq!(report.thematic, 1);
    let edges = store.associations_for(&old.id).await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].association_type, AssociationType::Thematic);
    assert!((edges[0].strength - 0.6).abs() < f64::EPSILON);
}

#[tokio::test]
async fn similar_edges_need_the_threshold() {
    let (_tmp, store, system) = system_fixture().await;
    let tags = ["rust", "async", "tokio"];
    let a = store
        .add(
            NewMemory::new("tokio runtime shutdown order", MemoryLayer::Semantic)
                .with_tags(tags)
                .with_created_at(Utc::now() - Duration::days(5)),
        )
        .await
        .expect("add a");
    let b = store
        .add(NewMemory::new("tokio runtime builder flags", MemoryLayer::Semantic).with_tags(tags))
        .await
        .expect("add b");

    let report = system.auto_associate(&b.id, None).await.expect("auto associate");
    assert_eq!(report.similar, 1);
    let edges = store.associations_for(&a.id).await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].association_type, AssociationType::Similar);
    // 0.2 layer + 0.3 tags + 0.2 importance + 0.1 weight
    assert!((edges[0].strength - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn working_memory_keeps_the_seven_most_recent() {
    let (_tmp, store, system) = system_fixture().await;
    let mut ids = Vec::new();
    for i in 0..10 {
        let record = store
            .add(NewMemory::new(format!("item {i}"), MemoryLayer::Episodic))
            .await
            .expect("add");
        system.activate(&record.id).await.expect("activate");
        ids.push(record.id);
    }

    let working = system.working_set();
    assert_eq!(working.len(), 7);
    assert_eq!(working, ids[3..].to_vec());
    for evicted in &ids[..3] {
        assert!(!working.contains(evicted));
    }
}

#[tokio::test]
async fn remember_links_and_activates() {
    let (_tmp, store, system) = system_fixture().await;
    let first = system
        .remember(
            "Deployed the billing service",
            MemoryLayer::Episodic,
            &EncodingContext::default().with_tags(["billing"]),
        )
        .await
        .expect("remember");
    let second = system
        .remember(
            "Billing service latency regression",
            MemoryLayer::Episodic,
            &EncodingContext::default().with_tags(["billing"]),
        )
        .await
        .expect("remember");

    assert!(second.links.total() >= 1);
    let linked = store.get_associated(&second.record.id).await.expect("associated");
    assert!(linked.iter().any(|(r, _)| r.id == first.record.id));
    assert_eq!(
        system.working_set(),
        vec![first.record.id.clone(), second.record.id.clone()]
    );

    // Activation touched the new edge.
    let edges = store.associations_for(&second.record.id).await.expect("edges");
    assert!(edges.iter().all(|e| e.activation_count >= 1));
}

#[tokio::test]
async fn touching_skips_edges_to_deleted_records() {
    let (_tmp, mem) = sqlite_fixture().await;
    let (hub, live) = pair(&mem).await;
    let gone = mem
        .add(NewMemory::new("third endpoint", MemoryLayer::Semantic))
        .await
        .expect("add");
    mem.associate(&hub, &live, 0.5, AssociationType::Causal)
        .await
        .expect("associate");
    mem.associate(&hub, &gone.id, 0.5, AssociationType::Causal)
        .await
        .expect("associate");
    mem.delete(&gone.id).await.expect("delete");

    assert_eq!(mem.touch_associations(&hub).await.expect("touch"), 1);
    assert_eq!(mem.touch_associations(&gone.id).await.expect("touch"), 0);

    let edges = mem.associations_for(&hub).await.expect("edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].activation_count, 1);
}
