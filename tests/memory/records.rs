use std::sync::Arc;

use super::memory_harness::{hit_ids, hybrid_ids, sqlite_fixture};
use chrono::{Duration, Utc};
use hippocampus::error::{MemoryError, memory_error};
use hippocampus::memory::{
    Memory, MemoryEventType, MemoryLayer, NewMemory, RecordUpdate, SearchOptions,
};

#[tokio::test]
async fn add_assigns_id_and_logs_creation() {
    let (_tmp, mem) = sqlite_fixture().await;
    let record = mem
        .add(NewMemory::new("Rust ownership rules", MemoryLayer::Semantic).with_tags(["Rust"]))
        .await
        .expect("add");

    assert!(!record.id.is_empty());
    assert_eq!(record.tags, vec!["rust".to_string()]);
    assert!(record.embedding.is_none());
    assert!(record.expires_at.is_none());
    assert!((record.retention_score - 1.0).abs() < f64::EPSILON);

    let events = mem.events_for(&record.id).await.expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, MemoryEventType::Created);
}

#[tokio::test]
async fn working_layer_gets_a_default_ttl() {
    let (_tmp, mem) = sqlite_fixture().await;
    let record = mem
        .add(NewMemory::new("scratch note", MemoryLayer::Working))
        .await
        .expect("add");
    let expires = record.expires_at.expect("working memories expire");
    let ttl = expires - record.created_at;
    assert_eq!(ttl, Duration::hours(24));
}

#[tokio::test]
async fn get_bumps_access_but_peek_does_not() {
    let (_tmp, mem) = sqlite_fixture().await;
    let record = mem
        .add(NewMemory::new("counter check", MemoryLayer::Episodic))
        .await
        .expect("add");

    let peeked = mem.peek(&record.id).await.expect("peek").expect("present");
    assert_eq!(peeked.access_count, 0);

    let first = mem.get(&record.id).await.expect("get").expect("present");
    assert_eq!(first.access_count, 1);
    assert!(first.last_accessed_at.is_some());
    let second = mem.get(&record.id).await.expect("get").expect("present");
    assert_eq!(second.access_count, 2);
}

#[tokio::test]
async fn search_increments_access_for_every_hit() {
    let (_tmp, mem) = sqlite_fixture().await;
    let a = mem
        .add(NewMemory::new("sqlite tuning notes", MemoryLayer::Semantic))
        .await
        .expect("add");
    let b = mem
        .add(NewMemory::new("sqlite backup notes", MemoryLayer::Semantic))
        .await
        .expect("add");

    let hits = mem
        .search("sqlite", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.record.access_count == 1));

    for id in [&a.id, &b.id] {
        let stored = mem.peek(id).await.expect("peek").expect("present");
        assert_eq!(stored.access_count, 1);
    }
}

#[tokio::test]
async fn update_changes_fields_and_reindexes_content() {
    let (_tmp, mem) = sqlite_fixture().await;
    let record = mem
        .add(NewMemory::new("original wording", MemoryLayer::Episodic).with_tags(["draft"]))
        .await
        .expect("add");

    let changed = mem
        .update(
            &record.id,
            RecordUpdate::default()
                .content("revised phrasing")
                .importance(0.9)
                .tags(["final"]),
        )
        .await
        .expect("update");
    assert!(changed);

    let stored = mem.peek(&record.id).await.expect("peek").expect("present");
    assert_eq!(stored.content, "revised phrasing");
    assert!((stored.importance - 0.9).abs() < f64::EPSILON);
    assert_eq!(stored.tags, vec!["final".to_string()]);

    let old = mem
        .search("original", &SearchOptions::default())
        .await
        .expect("search");
    assert!(old.is_empty());
    let new = mem
        .search("revised", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(hit_ids(&new), vec![record.id.clone()]);

    let events = mem.events_for(&record.id).await.expect("events");
    assert_eq!(events.last().map(|e| e.event_type), Some(MemoryEventType::Updated));
}

#[tokio::test]
async fn update_of_missing_record_returns_false() {
    let (_tmp, mem) = sqlite_fixture().await;
    let changed = mem
        .update("nope", RecordUpdate::default().importance(0.2))
        .await
        .expect("update");
    assert!(!changed);
}

#[tokio::test]
async fn soft_deleted_record_disappears_from_every_read() {
    let (_tmp, mem) = sqlite_fixture().await;
    let doomed = mem
        .add(NewMemory::new("ephemeral kiwi fact", MemoryLayer::Semantic))
        .await
        .expect("add");
    let kept = mem
        .add(NewMemory::new("durable kiwi fact", MemoryLayer::Semantic))
        .await
        .expect("add");

    assert!(mem.delete(&doomed.id).await.expect("delete"));
    assert!(!mem.delete(&doomed.id).await.expect("second delete"));

    assert!(mem.get(&doomed.id).await.expect("get").is_none());
    let lexical = mem
        .search("kiwi", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(hit_ids(&lexical), vec![kept.id.clone()]);
    let hybrid = mem
        .hybrid_search("kiwi", &SearchOptions::default())
        .await
        .expect("hybrid");
    assert_eq!(hybrid_ids(&hybrid), vec![kept.id.clone()]);

    let stats = mem.stats().await.expect("stats");
    assert_eq!(stats.live, 1);
    assert_eq!(stats.deleted, 1);
}

#[tokio::test]
async fn concurrent_deletes_of_one_record_succeed_once() {
    let (_tmp, mem) = sqlite_fixture().await;
    let record = mem
        .add(NewMemory::new("contended", MemoryLayer::Episodic))
        .await
        .expect("add");

    let (a, b) = tokio::join!(mem.delete(&record.id), mem.delete(&record.id));
    let wins = [a.expect("delete"), b.expect("delete")]
        .into_iter()
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);

    let deletions = mem
        .events_for(&record.id)
        .await
        .expect("events")
        .into_iter()
        .filter(|e| e.event_type == MemoryEventType::Deleted)
        .count();
    assert_eq!(deletions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_of_one_record_all_commit() {
    let (_tmp, mem) = sqlite_fixture().await;
    let mem = Arc::new(mem);
    let record = mem
        .add(NewMemory::new("contended counter note", MemoryLayer::Episodic))
        .await
        .expect("add");

    for round in 0..5_u32 {
        let mut tasks = Vec::new();
        for i in 0..8_u32 {
            let mem = Arc::clone(&mem);
            let id = record.id.clone();
            tasks.push(tokio::spawn(async move {
                let importance = f64::from(round * 8 + i) / 40.0;
                mem.update(&id, RecordUpdate::default().importance(importance))
                    .await
            }));
        }
        // Reads that bump access counters write concurrently with the updates.
        let reader = {
            let mem = Arc::clone(&mem);
            tokio::spawn(async move {
                mem.search("contended", &SearchOptions::default()).await
            })
        };

        for task in tasks {
            let updated = task.await.expect("join").unwrap_or_else(|e| panic!("update: {e:#}"));
            assert!(updated);
        }
        reader.await.expect("join").expect("search");
    }

    let updates = mem
        .events_for(&record.id)
        .await
        .expect("events")
        .into_iter()
        .filter(|e| e.event_type == MemoryEventType::Updated)
        .count();
    assert_eq!(updates, 40);
}

#[tokio::test]
async fn update_of_deleted_or_expired_record_returns_false() {
    let (_tmp, mem) = sqlite_fixture().await;
    let deleted = mem
        .add(NewMemory::new("soon gone", MemoryLayer::Episodic))
        .await
        .expect("add");
    mem.delete(&deleted.id).await.expect("delete");
    let expired = mem
        .add(
            NewMemory::new("already stale", MemoryLayer::Episodic)
                .with_created_at(Utc::now() - Duration::hours(2))
                .with_expires_at(Utc::now() - Duration::hours(1)),
        )
        .await
        .expect("add");

    for id in [&deleted.id, &expired.id] {
        let changed = mem
            .update(id, RecordUpdate::default().content("rewritten").tags(["x"]))
            .await
            .expect("update");
        assert!(!changed);
    }
    assert!(
        mem.search("rewritten", &SearchOptions::default())
            .await
            .expect("search")
            .is_empty()
    );
    let events = mem.events_for(&deleted.id).await.expect("events");
    assert!(events.iter().all(|e| e.event_type != MemoryEventType::Updated));
}

#[tokio::test]
async fn expired_records_are_hidden_and_purged() {
    let (_tmp, mem) = sqlite_fixture().await;
    let stale = mem
        .add(
            NewMemory::new("stale plum reminder", MemoryLayer::Working)
                .with_created_at(Utc::now() - Duration::hours(2))
                .with_expires_at(Utc::now() - Duration::hours(1)),
        )
        .await
        .expect("add");

    assert!(mem.get(&stale.id).await.expect("get").is_none());
    let hits = mem
        .search("plum", &SearchOptions::default())
        .await
        .expect("search");
    assert!(hits.is_empty());

    let purged = mem.purge_expired(Utc::now()).await.expect("purge");
    assert_eq!(purged, vec![stale.id.clone()]);
    assert!(mem.purge_expired(Utc::now()).await.expect("purge").is_empty());

    let events = mem.events_for(&stale.id).await.expect("events");
    assert_eq!(events.last().map(|e| e.event_type), Some(MemoryEventType::Expired));
}

#[tokio::test]
async fn invalid_input_is_rejected_as_validation() {
    let (_tmp, mem) = sqlite_fixture().await;

    let err = mem
        .add(NewMemory::new("   ", MemoryLayer::Episodic))
        .await
        .unwrap_err();
    assert!(matches!(memory_error(&err), Some(MemoryError::Validation(_))));

    let err = mem
        .add(NewMemory::new("x", MemoryLayer::Episodic).with_importance(1.5))
        .await
        .unwrap_err();
    assert!(matches!(memory_error(&err), Some(MemoryError::Validation(_))));

    let err = mem
        .search("x", &SearchOptions::with_limit(0))
        .await
        .unwrap_err();
    assert!(matches!(memory_error(&err), Some(MemoryError::Validation(_))));

    let err = mem
        .hybrid_search("x", &SearchOptions::default().min_importance(-0.1))
        .await
        .unwrap_err();
    assert!(matches!(memory_error(&err), Some(MemoryError::Validation(_))));

    assert_eq!(mem.stats().await.expect("stats").live, 0);
}

#[tokio::test]
async fn add_batch_is_all_or_nothing_on_validation() {
    let (_tmp, mem) = sqlite_fixture().await;
    let err = mem
        .add_batch(vec![
            NewMemory::new("fine", MemoryLayer::Episodic),
            NewMemory::new("", MemoryLayer::Episodic),
        ])
        .await
        .unwrap_err();
    assert!(matches!(memory_error(&err), Some(MemoryError::Validation(_))));
    assert_eq!(mem.stats().await.expect("stats").live, 0);

    let stored = mem
        .add_batch(vec![
            NewMemory::new("first", MemoryLayer::Episodic),
            NewMemory::new("second", MemoryLayer::Semantic),
        ])
        .await
        .expect("batch");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].content, "first");
    assert_eq!(stored[1].layer, MemoryLayer::Semantic);
}

#[tokio::test]
async fn records_survive_reopening_the_store() {
    let (tmp, mem) = sqlite_fixture().await;
    let record = mem
        .add(NewMemory::new("persisted across restarts", MemoryLayer::Procedural))
        .await
        .expect("add");
    mem.close().await;

    let reopened = hippocampus::SqliteMemory::new(tmp.path(), hippocampus::MemoryConfig::default())
        .await
        .expect("reopen");
    let stored = reopened.peek(&record.id).await.expect("peek").expect("present");
    assert_eq!(stored.content, "persisted across restarts");
    assert_eq!(stored.layer, MemoryLayer::Procedural);
}
